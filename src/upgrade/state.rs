//! UpgradeState - the shared upgrade record.
//!
//! The record sits behind a single lock. Readers get whole-record clones and
//! every transition writes all of its fields inside one write guard, so a
//! poller never sees a phase paired with another phase's progress or message.

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::UpgradeError;
use super::types::{StagedUpload, UpgradePhase, UpgradeStatus};
use crate::utils::format_duration;

pub const UPLOADED_MESSAGE: &str = "Files uploaded successfully, starting installation...";

/// Shared handle to the upgrade record
#[derive(Debug, Clone, Default)]
pub struct UpgradeState {
    inner: Arc<RwLock<UpgradeStatus>>,
}

impl UpgradeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of the record.
    ///
    /// Elapsed time of a running attempt is recomputed for the copy.
    pub async fn snapshot(&self) -> UpgradeStatus {
        let mut status = self.inner.read().await.clone();
        if status.status.is_active() {
            refresh_elapsed(&mut status);
        }
        status
    }

    /// Start a fresh attempt for the staged files.
    ///
    /// Rejected while another attempt is active. The active check and the
    /// reset happen under the same guard.
    pub async fn begin_attempt(
        &self,
        staged: &StagedUpload,
    ) -> Result<(AttemptHandle, UpgradeStatus), UpgradeError> {
        let mut status = self.inner.write().await;
        if status.status.is_active() {
            return Err(UpgradeError::UpgradeInProgress);
        }

        let id = Uuid::new_v4();
        *status = UpgradeStatus {
            status: UpgradePhase::Uploading,
            progress: 0,
            message: UPLOADED_MESSAGE.to_string(),
            show_reboot: false,
            error: None,
            elapsed: format_duration(0),
            elapsed_secs: 0,
            attempt_id: Some(id),
            started_at: Some(chrono::Utc::now()),
            firmware: Some(staged.firmware.clone()),
            config: staged.config.clone(),
        };

        tracing::info!(
            "Upgrade attempt {} started for {}",
            id,
            staged.firmware.original_name
        );
        Ok((self.attempt(id), status.clone()))
    }

    /// Whether an attempt is running.
    pub async fn is_active(&self) -> bool {
        self.inner.read().await.status.is_active()
    }

    /// Write handle for one attempt.
    pub fn attempt(&self, id: Uuid) -> AttemptHandle {
        AttemptHandle {
            state: self.clone(),
            id,
        }
    }

    /// Report progress within `installing` or `configuring`.
    ///
    /// Progress never decreases and stays below 100 until completion.
    pub async fn advance(
        &self,
        attempt: Uuid,
        phase: UpgradePhase,
        progress: u8,
        message: impl Into<String>,
    ) {
        debug_assert!(matches!(phase, UpgradePhase::Installing | UpgradePhase::Configuring));
        let message = message.into();
        self.transition(attempt, phase, |status| {
            status.progress = status.progress.max(progress.min(99));
            status.message = message;
        })
        .await;
    }

    /// Finish the attempt successfully.
    pub async fn complete(&self, attempt: Uuid, message: impl Into<String>) {
        let message = message.into();
        self.transition(attempt, UpgradePhase::Completed, |status| {
            status.progress = 100;
            status.message = message;
            status.show_reboot = true;
        })
        .await;
    }

    /// Finish the attempt with an error. Progress stays where it stopped.
    pub async fn fail(&self, attempt: Uuid, err: &UpgradeError) {
        let message = err.to_string();
        self.transition(attempt, UpgradePhase::Error, |status| {
            status.error = Some(format!("Error: {}", message));
            status.message = message;
        })
        .await;
    }

    async fn transition<F>(&self, attempt: Uuid, to: UpgradePhase, update: F)
    where
        F: FnOnce(&mut UpgradeStatus),
    {
        let mut status = self.inner.write().await;

        if status.attempt_id != Some(attempt) {
            tracing::warn!("Ignoring update from stale upgrade attempt {}", attempt);
            return;
        }
        if !is_allowed(status.status, to) {
            tracing::warn!(
                "Ignoring invalid upgrade transition {} -> {}",
                status.status,
                to
            );
            return;
        }

        status.status = to;
        update(&mut *status);
        refresh_elapsed(&mut *status);

        tracing::info!(
            "Upgrade status updated: {}, {}%, {}",
            status.status,
            status.progress,
            status.message
        );
        if status.status.is_terminal() {
            tracing::info!(
                "Upgrade attempt {} finished as {} after {}",
                attempt,
                status.status,
                status.elapsed
            );
        }
    }
}

/// The writer side of one attempt, owned by its background task
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    state: UpgradeState,
    id: Uuid,
}

impl AttemptHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn installing(&self, progress: u8, message: impl Into<String>) {
        self.state
            .advance(self.id, UpgradePhase::Installing, progress, message)
            .await;
    }

    pub async fn configuring(&self, progress: u8, message: impl Into<String>) {
        self.state
            .advance(self.id, UpgradePhase::Configuring, progress, message)
            .await;
    }

    pub async fn complete(&self, message: impl Into<String>) {
        self.state.complete(self.id, message).await;
    }

    pub async fn fail(&self, err: &UpgradeError) {
        self.state.fail(self.id, err).await;
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> UpgradeStatus {
        self.state.snapshot().await
    }
}

fn is_allowed(from: UpgradePhase, to: UpgradePhase) -> bool {
    use UpgradePhase::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Uploading, Installing)
            | (Installing, Installing)
            | (Installing, Configuring)
            | (Configuring, Configuring)
            | (Installing, Completed)
            | (Configuring, Completed)
            | (Uploading, Error)
            | (Installing, Error)
            | (Configuring, Error)
    )
}

fn refresh_elapsed(status: &mut UpgradeStatus) {
    if let Some(started_at) = status.started_at {
        let secs = (chrono::Utc::now() - started_at).num_seconds().max(0);
        status.elapsed_secs = secs as u64;
        status.elapsed = format_duration(secs);
    }
}
