//! Installer strategies.
//!
//! The orchestrator drives the same state machine whether the real installer
//! binary is present or not. `select_installer` probes once per attempt and
//! picks `CommandInstaller` or `SimulatedInstaller`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

use super::error::UpgradeError;
use super::state::AttemptHandle;
use super::types::UpgradeConfig;
use crate::utils::truncate;

/// Progress reported while the installer runs; it stops at 90% and
/// completion takes it to 100%.
const TICK_START: u8 = 20;
const TICK_END: u8 = 90;
const TICK_STEP: usize = 5;

fn install_ticks() -> impl Iterator<Item = u8> {
    (TICK_START..=TICK_END).step_by(TICK_STEP)
}

fn tick_message(progress: u8) -> String {
    format!("Installing firmware ({}%)", progress)
}

/// Something that can install a staged firmware package
#[async_trait]
pub trait Installer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Install the package, reporting progress through `attempt`.
    ///
    /// Only the `installing` phase is reported here; the orchestrator owns
    /// every other transition.
    async fn install(&self, firmware: &Path, attempt: &AttemptHandle) -> Result<(), UpgradeError>;
}

/// Pick the installer for an attempt.
///
/// Uses the real installer when its binary can be found, the simulator otherwise.
pub fn select_installer(config: &UpgradeConfig) -> Arc<dyn Installer> {
    match which::which(&config.installer) {
        Ok(path) => {
            tracing::info!("Installer found at {}, performing actual installation", path.display());
            Arc::new(CommandInstaller::new(
                path,
                config.tick_interval,
                config.install_timeout,
            ))
        }
        Err(_) => {
            tracing::info!(
                "Installer '{}' not available, simulating installation process",
                config.installer
            );
            Arc::new(SimulatedInstaller::new(config.tick_interval))
        }
    }
}

/// Runs `<program> install <firmware>` as a child process
pub struct CommandInstaller {
    program: PathBuf,
    tick_interval: Duration,
    timeout: Option<Duration>,
}

impl CommandInstaller {
    pub fn new(
        program: impl Into<PathBuf>,
        tick_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            program: program.into(),
            tick_interval,
            timeout,
        }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn install(&self, firmware: &Path, attempt: &AttemptHandle) -> Result<(), UpgradeError> {
        attempt.installing(15, "Starting RAUC installation...").await;

        let mut child = tokio::process::Command::new(&self.program)
            .arg("install")
            .arg(firmware)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Error starting {}: {}", self.program.display(), e);
                UpgradeError::InstallerUnavailable(e.to_string())
            })?;

        tracing::info!(
            "Started {} install {} (pid {:?})",
            self.program.display(),
            firmware.display(),
            child.id()
        );

        // Drain stderr so the child never blocks on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    tracing::warn!("Failed to read installer stderr: {}", e);
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut ticks = install_ticks();

        let exit = loop {
            tokio::select! {
                result = child.wait() => break Some(result),
                _ = interval.tick() => {
                    let progress = ticks.next().unwrap_or(TICK_END);
                    attempt.installing(progress, tick_message(progress)).await;
                }
                _ = wait_deadline(deadline) => break None,
            }
        };

        let Some(exit) = exit else {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill installer after timeout: {}", e);
            }
            let timeout = self.timeout.unwrap_or_default();
            tracing::error!("Installer still running after {:?}, killed", timeout);
            return Err(UpgradeError::InstallerTimedOut(timeout));
        };

        let status = exit.map_err(|e| UpgradeError::InstallerFailed(e.to_string()))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            tracing::info!("Installer finished successfully");
            return Ok(());
        }

        let detail = match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(line) => format!("{}: {}", status, truncate(line.trim(), 200)),
            None => status.to_string(),
        };
        tracing::error!("Installation failed: {}", detail);
        Err(UpgradeError::InstallerFailed(detail))
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Deterministic stand-in used when the installer binary is absent
pub struct SimulatedInstaller {
    tick_interval: Duration,
}

impl SimulatedInstaller {
    pub fn new(tick_interval: Duration) -> Self {
        Self { tick_interval }
    }
}

#[async_trait]
impl Installer for SimulatedInstaller {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn install(&self, _firmware: &Path, attempt: &AttemptHandle) -> Result<(), UpgradeError> {
        attempt.installing(15, "Preparing installation environment...").await;

        for progress in install_ticks() {
            attempt.installing(progress, tick_message(progress)).await;
            tracing::debug!("Installation progress: {}%", progress);
            tokio::time::sleep(self.tick_interval).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::state::UpgradeState;
    use crate::upgrade::types::{StagedFileInfo, StagedUpload, UpgradePhase};

    async fn attempt() -> AttemptHandle {
        let state = UpgradeState::new();
        let staged = StagedUpload {
            firmware_path: PathBuf::from("/tmp/upgrade/firmware.pkg"),
            firmware: StagedFileInfo {
                original_name: "fw.pkg".into(),
                size_bytes: 1,
                sha256: String::new(),
            },
            config_path: None,
            config: None,
        };
        state.begin_attempt(&staged).await.unwrap().0
    }

    #[test]
    fn test_install_ticks() {
        let ticks: Vec<u8> = install_ticks().collect();
        assert_eq!(ticks.first(), Some(&20));
        assert_eq!(ticks.last(), Some(&90));
        assert_eq!(ticks.len(), 15);
    }

    #[test]
    fn test_select_installer_falls_back_to_simulator() {
        let config = UpgradeConfig {
            installer: "definitely-not-an-installer-7f3a".to_string(),
            ..Default::default()
        };
        assert_eq!(select_installer(&config).name(), "simulated");
    }

    #[test]
    fn test_select_installer_uses_binary_when_present() {
        let config = UpgradeConfig {
            installer: "true".to_string(),
            ..Default::default()
        };
        assert_eq!(select_installer(&config).name(), "command");
    }

    #[tokio::test]
    async fn test_simulated_install_reaches_ninety() {
        let attempt = attempt().await;
        SimulatedInstaller::new(Duration::from_millis(1))
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap();

        let status = attempt.snapshot().await;
        assert_eq!(status.status, UpgradePhase::Installing);
        assert_eq!(status.progress, 90);
        assert_eq!(status.message, "Installing firmware (90%)");
    }

    #[tokio::test]
    async fn test_command_install_success() {
        let attempt = attempt().await;
        let installer = CommandInstaller::new(
            which::which("true").unwrap(),
            Duration::from_millis(10),
            Some(Duration::from_secs(10)),
        );
        installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap();

        let status = attempt.snapshot().await;
        assert_eq!(status.status, UpgradePhase::Installing);
        assert!(status.progress >= 15);
    }

    #[tokio::test]
    async fn test_command_install_with_unbounded_timeout() {
        let attempt = attempt().await;
        let installer = CommandInstaller::new(
            which::which("true").unwrap(),
            Duration::from_millis(10),
            Some(Duration::MAX),
        );
        installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_command_install_failure_reports_exit_status() {
        let attempt = attempt().await;
        let installer = CommandInstaller::new(
            which::which("false").unwrap(),
            Duration::from_millis(10),
            None,
        );
        let err = installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InstallerFailed(_)));
        assert!(err.to_string().contains("exit status"));
    }

    #[tokio::test]
    async fn test_command_install_failure_keeps_non_utf8_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-rauc");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '\\377\\nboom: bad signature\\n' >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let attempt = attempt().await;
        let installer = CommandInstaller::new(&script, Duration::from_millis(10), None);
        let err = installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InstallerFailed(_)));
        assert!(err.to_string().ends_with("boom: bad signature"), "{}", err);
    }

    #[tokio::test]
    async fn test_command_install_missing_binary() {
        let attempt = attempt().await;
        let installer = CommandInstaller::new(
            "/nonexistent/bin/rauc",
            Duration::from_millis(10),
            None,
        );
        let err = installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InstallerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_command_install_watchdog_kills_hung_installer() {
        let attempt = attempt().await;
        // `yes` never exits on its own
        let installer = CommandInstaller::new(
            which::which("yes").unwrap(),
            Duration::from_millis(20),
            Some(Duration::from_millis(200)),
        );
        let err = installer
            .install(Path::new("/tmp/upgrade/firmware.pkg"), &attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::InstallerTimedOut(_)));
        let status = attempt.snapshot().await;
        assert!(status.progress >= 20);
        assert!(status.progress <= 90);
    }
}
