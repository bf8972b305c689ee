//! Core types for firmware upgrades.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of the current (or most recent) upgrade attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    /// No upload has been accepted yet
    #[default]
    Idle,
    /// Files staged, installation about to start
    Uploading,
    /// Installer running
    Installing,
    /// Applying an uploaded configuration bundle
    Configuring,
    /// Installation finished, reboot pending
    Completed,
    /// Attempt failed
    Error,
}

impl UpgradePhase {
    /// Terminal phases end an attempt; a new upload may follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradePhase::Completed | UpgradePhase::Error)
    }

    /// An attempt is running and owns the staging area.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UpgradePhase::Uploading | UpgradePhase::Installing | UpgradePhase::Configuring
        )
    }
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradePhase::Idle => "idle",
            UpgradePhase::Uploading => "uploading",
            UpgradePhase::Installing => "installing",
            UpgradePhase::Configuring => "configuring",
            UpgradePhase::Completed => "completed",
            UpgradePhase::Error => "error",
        };
        f.write_str(s)
    }
}

/// A file accepted by the upload receiver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagedFileInfo {
    /// Filename as sent by the client
    pub original_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Snapshot of the upgrade record, as returned to pollers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpgradeStatus {
    pub status: UpgradePhase,
    pub progress: u8,
    pub message: String,
    pub show_reboot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human readable time since the attempt started
    pub elapsed: String,
    pub elapsed_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<StagedFileInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StagedFileInfo>,
}

/// Files staged for one attempt
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub firmware_path: PathBuf,
    pub firmware: StagedFileInfo,
    pub config_path: Option<PathBuf>,
    pub config: Option<StagedFileInfo>,
}

/// Firmware information shown on the upgrade page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpgradeInfo {
    pub firmware_version: String,
    pub build_date: String,
    pub active_bootslot: String,
}

/// Runtime settings for the upgrade subsystem
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Staging directory for uploaded files
    pub upload_dir: PathBuf,
    /// Ceiling for the whole multipart body
    pub max_upload_bytes: u64,
    /// Installer binary name or path
    pub installer: String,
    /// Interval between progress ticks while installing
    pub tick_interval: Duration,
    pub validate_delay: Duration,
    pub configure_delay: Duration,
    /// Watchdog for the installer process; None waits forever
    pub install_timeout: Option<Duration>,
    /// Destination for an applied configuration bundle
    pub config_target: Option<PathBuf>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("/tmp/upgrade"),
            max_upload_bytes: 500 << 20,
            installer: "rauc".to_string(),
            tick_interval: Duration::from_secs(1),
            validate_delay: Duration::from_secs(2),
            configure_delay: Duration::from_secs(2),
            install_timeout: Some(Duration::from_secs(30 * 60)),
            config_target: None,
        }
    }
}

/// Settings for a delayed system action (reboot, factory reset)
#[derive(Debug, Clone)]
pub struct SystemActionConfig {
    pub name: &'static str,
    pub delay: Duration,
    pub command: Vec<String>,
    pub simulate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&UpgradePhase::Configuring).unwrap(),
            "\"configuring\""
        );
        assert_eq!(UpgradePhase::Completed.to_string(), "completed");
    }

    #[test]
    fn test_phase_classification() {
        assert!(!UpgradePhase::Idle.is_active());
        assert!(UpgradePhase::Uploading.is_active());
        assert!(UpgradePhase::Installing.is_active());
        assert!(UpgradePhase::Configuring.is_active());
        assert!(UpgradePhase::Completed.is_terminal());
        assert!(UpgradePhase::Error.is_terminal());
        assert!(!UpgradePhase::Error.is_active());
    }

    #[test]
    fn test_idle_status_json_omits_optionals() {
        let json = serde_json::to_value(UpgradeStatus::default()).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["show_reboot"], false);
        assert!(json.get("error").is_none());
        assert!(json.get("attempt_id").is_none());
    }
}
