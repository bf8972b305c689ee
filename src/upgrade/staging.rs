//! Upload receiver - validates and stages uploaded firmware and config files.
//!
//! Parts are streamed to `*.part` files and only renamed over the staged
//! names once the whole upload has been accepted, so a rejected or broken
//! upload never replaces previously staged files.
//!
//! The area itself is not locked; `UpgradeManager` serializes uploads.

use std::path::{Path, PathBuf};

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::error::UpgradeError;
use super::types::{StagedFileInfo, StagedUpload};
use crate::utils::format_bytes;

pub const FIRMWARE_FIELD: &str = "firmware";
pub const CONFIG_FIELD: &str = "config";
pub const FIRMWARE_FILENAME: &str = "firmware.pkg";
pub const CONFIG_FILENAME: &str = "config.cfg";

/// Kind of uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Firmware,
    Config,
}

impl PartKind {
    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            FIRMWARE_FIELD => Some(Self::Firmware),
            CONFIG_FIELD => Some(Self::Config),
            _ => None,
        }
    }

    /// Required filename suffix, compared case-insensitively
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Firmware => ".pkg",
            Self::Config => ".cfg",
        }
    }

    fn staged_name(&self) -> &'static str {
        match self {
            Self::Firmware => FIRMWARE_FILENAME,
            Self::Config => CONFIG_FILENAME,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Config => "configuration",
        }
    }
}

/// Check a client supplied filename against the part's extension.
pub fn validate_filename(kind: PartKind, filename: &str) -> Result<(), UpgradeError> {
    if filename.to_lowercase().ends_with(kind.extension()) {
        Ok(())
    } else {
        Err(UpgradeError::invalid(format!(
            "Invalid {} file. File must have {} extension",
            kind.label(),
            kind.extension()
        )))
    }
}

/// The staging directory and the upload ceiling
pub struct StagingArea {
    dir: PathBuf,
    max_bytes: u64,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn firmware_path(&self) -> PathBuf {
        self.dir.join(FIRMWARE_FILENAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILENAME)
    }

    /// Open a session for one upload.
    pub async fn session(&self) -> Result<StagingSession<'_>, UpgradeError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UpgradeError::storage("prepare upload directory", e))?;

        Ok(StagingSession {
            area: self,
            received: 0,
            firmware: None,
            config: None,
        })
    }

    /// Receive a multipart upload with a `firmware` part and an optional `config` part.
    pub async fn receive(&self, mut multipart: Multipart) -> Result<StagedUpload, UpgradeError> {
        let mut session = self.session().await?;
        let limit = self.max_bytes;

        let result = async {
            while let Some(mut field) = multipart
                .next_field()
                .await
                .map_err(|e| multipart_error(e, limit))?
            {
                let Some(kind) = field.name().and_then(PartKind::from_field) else {
                    tracing::debug!("Ignoring unexpected upload field {:?}", field.name());
                    continue;
                };

                let filename = field.file_name().unwrap_or_default().to_string();
                if kind == PartKind::Config && filename.is_empty() {
                    // Browsers send an empty part when the optional input is left blank
                    continue;
                }

                tracing::debug!("Receiving {} file: {}", kind.label(), filename);
                let mut part = session.start_part(kind, &filename).await?;
                while let Some(chunk) =
                    field.chunk().await.map_err(|e| multipart_error(e, limit))?
                {
                    session.write(&mut part, &chunk).await?;
                }
                session.finish_part(part).await?;
            }
            Ok::<_, UpgradeError>(())
        }
        .await;

        match result {
            Ok(()) => session.commit().await,
            Err(e) => {
                session.abort().await;
                Err(e)
            }
        }
    }
}

fn multipart_error(err: MultipartError, limit: u64) -> UpgradeError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UpgradeError::PayloadTooLarge { limit }
    } else {
        tracing::warn!("Error parsing upload form: {}", err);
        UpgradeError::invalid("Failed to parse upload form")
    }
}

/// A part being written to its `.part` file
pub struct PartWriter {
    kind: PartKind,
    original_name: String,
    path: PathBuf,
    file: tokio::fs::File,
    hasher: Sha256,
    size: u64,
}

struct FinishedPart {
    path: PathBuf,
    info: StagedFileInfo,
}

/// One upload in progress
pub struct StagingSession<'a> {
    area: &'a StagingArea,
    received: u64,
    firmware: Option<FinishedPart>,
    config: Option<FinishedPart>,
}

impl StagingSession<'_> {
    /// Validate a part's filename and open its temporary file.
    pub async fn start_part(
        &mut self,
        kind: PartKind,
        filename: &str,
    ) -> Result<PartWriter, UpgradeError> {
        if kind == PartKind::Firmware && filename.is_empty() {
            return Err(UpgradeError::invalid("No firmware file provided"));
        }
        validate_filename(kind, filename)?;

        let already = match kind {
            PartKind::Firmware => self.firmware.is_some(),
            PartKind::Config => self.config.is_some(),
        };
        if already {
            return Err(UpgradeError::invalid(format!(
                "More than one {} file provided",
                kind.label()
            )));
        }

        let path = self.area.dir.join(format!("{}.part", kind.staged_name()));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| UpgradeError::storage(format!("create {} file", kind.label()), e))?;

        Ok(PartWriter {
            kind,
            original_name: filename.to_string(),
            path,
            file,
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Append a chunk, enforcing the total upload ceiling.
    pub async fn write(&mut self, part: &mut PartWriter, chunk: &[u8]) -> Result<(), UpgradeError> {
        self.received += chunk.len() as u64;
        if self.received > self.area.max_bytes {
            return Err(UpgradeError::PayloadTooLarge {
                limit: self.area.max_bytes,
            });
        }

        part.hasher.update(chunk);
        part.size += chunk.len() as u64;
        part.file
            .write_all(chunk)
            .await
            .map_err(|e| UpgradeError::storage(format!("save {} file", part.kind.label()), e))
    }

    pub async fn finish_part(&mut self, part: PartWriter) -> Result<(), UpgradeError> {
        let PartWriter {
            kind,
            original_name,
            path,
            mut file,
            hasher,
            size,
        } = part;

        file.flush()
            .await
            .map_err(|e| UpgradeError::storage(format!("save {} file", kind.label()), e))?;
        file.sync_all()
            .await
            .map_err(|e| UpgradeError::storage(format!("save {} file", kind.label()), e))?;

        let info = StagedFileInfo {
            original_name,
            size_bytes: size,
            sha256: format!("{:x}", hasher.finalize()),
        };
        tracing::info!(
            "{} file received: {} ({}, sha256 {})",
            kind.label(),
            info.original_name,
            format_bytes(info.size_bytes),
            info.sha256
        );

        let finished = FinishedPart { path, info };
        match kind {
            PartKind::Firmware => self.firmware = Some(finished),
            PartKind::Config => self.config = Some(finished),
        }
        Ok(())
    }

    /// Move the received parts over the staged files.
    ///
    /// A previously staged config is removed when this upload has none.
    pub async fn commit(mut self) -> Result<StagedUpload, UpgradeError> {
        let Some(firmware) = self.firmware.take() else {
            self.abort().await;
            return Err(UpgradeError::invalid("No firmware file provided"));
        };
        let config = self.config.take();

        let firmware_path = self.area.firmware_path();
        let config_path = self.area.config_path();

        if let Err(e) = tokio::fs::rename(&firmware.path, &firmware_path).await {
            remove_quietly(&firmware.path).await;
            if let Some(c) = &config {
                remove_quietly(&c.path).await;
            }
            return Err(UpgradeError::storage("save firmware file", e));
        }
        tracing::info!("Firmware file saved to {}", firmware_path.display());

        let config_info = match config {
            Some(c) => {
                if let Err(e) = tokio::fs::rename(&c.path, &config_path).await {
                    remove_quietly(&c.path).await;
                    return Err(UpgradeError::storage("save configuration file", e));
                }
                tracing::info!("Config file saved to {}", config_path.display());
                Some(c.info)
            }
            None => {
                match tokio::fs::remove_file(&config_path).await {
                    Ok(()) => tracing::debug!("Removed stale {}", config_path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(UpgradeError::storage("remove stale configuration file", e))
                    }
                }
                None
            }
        };

        Ok(StagedUpload {
            firmware_path,
            firmware: firmware.info,
            config_path: config_info.as_ref().map(|_| config_path),
            config: config_info,
        })
    }

    /// Drop everything received so far.
    pub async fn abort(&mut self) {
        for kind in [PartKind::Firmware, PartKind::Config] {
            remove_quietly(&self.area.dir.join(format!("{}.part", kind.staged_name()))).await;
        }
        self.firmware = None;
        self.config = None;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
