//! UpgradeManager - accepts uploads and runs upgrade attempts in the background.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::Multipart;
use tokio::sync::Mutex;

use super::error::UpgradeError;
use super::installer::{select_installer, Installer};
use super::staging::StagingArea;
use super::state::{AttemptHandle, UpgradeState};
use super::types::{StagedUpload, UpgradeConfig, UpgradeStatus};

pub const COMPLETED_MESSAGE: &str = "Installation completed successfully";

/// Firmware upgrade manager
pub struct UpgradeManager {
    state: UpgradeState,
    staging: StagingArea,
    config: UpgradeConfig,
    upload_lock: Mutex<()>,
}

impl UpgradeManager {
    pub fn new(config: UpgradeConfig) -> Self {
        Self {
            state: UpgradeState::new(),
            staging: StagingArea::new(config.upload_dir.clone(), config.max_upload_bytes),
            config,
            upload_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Current upgrade status snapshot
    pub async fn status(&self) -> UpgradeStatus {
        self.state.snapshot().await
    }

    /// Receive an upload and start an attempt for it.
    ///
    /// Returns the fresh `uploading` snapshot as soon as the files are
    /// staged; installation continues in the background.
    pub async fn upload(&self, multipart: Multipart) -> Result<UpgradeStatus, UpgradeError> {
        let _guard = self
            .upload_lock
            .try_lock()
            .map_err(|_| UpgradeError::UpgradeInProgress)?;

        // Staged files belong to the running attempt until it finishes
        if self.state.is_active().await {
            return Err(UpgradeError::UpgradeInProgress);
        }

        let staged = self.staging.receive(multipart).await?;
        self.start(staged).await
    }

    /// Start an attempt for already staged files.
    pub async fn start(&self, staged: StagedUpload) -> Result<UpgradeStatus, UpgradeError> {
        let (attempt, status) = self.state.begin_attempt(&staged).await?;
        let orchestrator = UpgradeOrchestrator {
            attempt: attempt.clone(),
            installer: select_installer(&self.config),
            staged,
            config: self.config.clone(),
        };

        let handle = tokio::spawn(orchestrator.run());

        // A panicking attempt must not leave the record stuck in an active phase
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!("Upgrade task for attempt {} aborted: {}", attempt.id(), e);
                attempt
                    .fail(&UpgradeError::InstallerFailed("upgrade task aborted".to_string()))
                    .await;
            }
        });

        tracing::info!("Upload accepted, starting upgrade process");
        Ok(status)
    }
}

/// Drives one attempt from `uploading` to `completed` or `error`
struct UpgradeOrchestrator {
    attempt: AttemptHandle,
    installer: Arc<dyn Installer>,
    staged: StagedUpload,
    config: UpgradeConfig,
}

impl UpgradeOrchestrator {
    async fn run(self) {
        tracing::info!(
            "Starting upgrade process for {} using {} installer",
            self.staged.firmware_path.display(),
            self.installer.name()
        );

        match self.drive().await {
            Ok(()) => tracing::info!("Upgrade process completed"),
            Err(e) => {
                tracing::error!("Upgrade process failed: {}", e);
                self.attempt.fail(&e).await;
            }
        }
    }

    async fn drive(&self) -> Result<(), UpgradeError> {
        self.attempt.installing(5, "Starting installation process...").await;

        tracing::info!("Validating firmware package: {}", self.staged.firmware_path.display());
        tokio::time::sleep(self.config.validate_delay).await;
        self.attempt.installing(10, "Validating firmware package...").await;

        self.installer
            .install(&self.staged.firmware_path, &self.attempt)
            .await?;

        let mut message = COMPLETED_MESSAGE.to_string();

        if let Some(config_path) = &self.staged.config_path {
            self.attempt.configuring(95, "Applying configuration...").await;
            tracing::info!("Applying configuration: {}", config_path.display());

            // Not fatal: the firmware is already installed
            if let Err(e) = apply_config(config_path, self.config.config_target.as_deref()).await {
                tracing::warn!("{}", e);
                message = format!(
                    "{}, but configuration was not applied: {}",
                    COMPLETED_MESSAGE, e
                );
            }
            tokio::time::sleep(self.config.configure_delay).await;
        }

        self.attempt.complete(message).await;
        Ok(())
    }
}

/// Copy a staged configuration bundle into place.
async fn apply_config(source: &Path, target: Option<&Path>) -> Result<(), UpgradeError> {
    let Some(target) = target else {
        tracing::info!(
            "No configuration target set, leaving {} staged",
            source.display()
        );
        return Ok(());
    };

    let fail = |e: std::io::Error| {
        UpgradeError::ConfigApplyFailed(format!("{}: {}", target.display(), e))
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let tmp = PathBuf::from(format!("{}.new", target.display()));
    tokio::fs::copy(source, &tmp).await.map_err(fail)?;
    tokio::fs::rename(&tmp, target).await.map_err(fail)?;

    tracing::info!("Configuration applied to {}", target.display());
    Ok(())
}
