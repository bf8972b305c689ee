//! Firmware upgrade subsystem.
//!
//! An upload is staged to disk, then a background attempt drives it through
//! `installing`, an optional `configuring` step, and ends in `completed` or
//! `error`. Clients poll the shared status record while that happens.

mod action;
mod error;
mod info;
mod installer;
mod orchestrator;
mod staging;
mod state;
mod types;

pub use action::SystemAction;
pub use error::UpgradeError;
pub use info::{config_backup, firmware_info, BACKUP_FILENAME};
pub use orchestrator::UpgradeManager;
pub use types::{SystemActionConfig, UpgradeConfig, UpgradeInfo, UpgradeStatus};
