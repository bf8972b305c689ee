//! Upgrade error types.
//!
//! Receiver errors are returned synchronously to the uploading client.
//! Installer errors happen inside the background attempt and are only ever
//! recorded in the upgrade status.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Missing firmware part or wrong file extension
    #[error("{0}")]
    InvalidInput(String),

    /// Upload body exceeds the configured ceiling
    #[error("Upload exceeds the maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Filesystem failure while staging uploaded files
    #[error("Failed to {action}: {source}")]
    Storage {
        action: String,
        #[source]
        source: std::io::Error,
    },

    /// Another upload or attempt is already running
    #[error("An upgrade is already in progress")]
    UpgradeInProgress,

    /// The installer process could not be started
    #[error("Failed to start installation: {0}")]
    InstallerUnavailable(String),

    /// The installer exited unsuccessfully
    #[error("Installation failed: {0}")]
    InstallerFailed(String),

    /// The installer did not exit before the watchdog fired
    #[error("Installation timed out after {0:?}")]
    InstallerTimedOut(Duration),

    /// Applying the uploaded configuration failed
    #[error("Failed to apply configuration: {0}")]
    ConfigApplyFailed(String),
}

impl UpgradeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn storage(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            action: action.into(),
            source,
        }
    }

    /// True for errors reported synchronously to the uploader.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::PayloadTooLarge { .. } | Self::UpgradeInProgress
        )
    }
}
