//! appliance-webui - Web management API for network appliances.
//!
//! Provides:
//! - Firmware upload with background installation and progress polling
//! - Reboot into the new firmware
//! - Configuration backup download
//! - Factory reset
//!
//! # Authentication
//!
//! Set `auth_token` in the config file or the `WEBUI_AUTH_TOKEN` environment
//! variable. When set, all API requests (except `/health`) must include the
//! token in the `X-Webui-Token` header.
//!
//! # Configuration
//!
//! YAML file (see `config.rs`) with command-line and environment overrides:
//! - `WEBUI_AUTH_TOKEN`: Authentication token
//! - `WEBUI_PORT`: Listen port (default: 8080)
//! - `RUST_LOG`: Log level (default: appliance_webui=info,tower_http=info)

mod cli;
mod config;
mod error;
mod routes;
mod upgrade;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use config::AppConfig;
use error::Result;
use upgrade::{SystemAction, UpgradeManager};

/// Application state shared across all request handlers.
pub struct AppState {
    pub upgrade: UpgradeManager,
    pub reboot: SystemAction,
    pub factory_reset: SystemAction,
    /// Authentication token (None disables authentication).
    pub auth_token: Option<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            upgrade: UpgradeManager::new(config.upgrade_config()?),
            reboot: SystemAction::new(config.reboot.to_runtime("reboot", config.debug)?),
            factory_reset: SystemAction::new(
                config.factory_reset.to_runtime("factory-reset", config.debug)?,
            ),
            auth_token: config.auth_token.clone(),
            start_time: chrono::Utc::now(),
        })
    }

    /// Returns the number of seconds since the server started.
    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.start_time).num_seconds()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "appliance_webui=debug,tower_http=debug"
    } else {
        "appliance_webui=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.load_config()?;
    serve(config).await
}

async fn serve(config: AppConfig) -> Result<()> {
    if config.auth_token.is_some() {
        tracing::info!("Authentication enabled");
    } else {
        tracing::warn!(
            "No auth token set - authentication disabled. \
             This is insecure for production use."
        );
    }
    if config.debug {
        tracing::info!("Debug mode: reboot and factory reset are simulated");
    }

    let state = Arc::new(AppState::new(&config)?);
    let max_upload_bytes = state.upgrade.config().max_upload_bytes;
    tracing::info!(
        "Staging uploads in {} (limit {})",
        state.upgrade.config().upload_dir.display(),
        utils::format_bytes(max_upload_bytes)
    );

    let app = Router::new()
        .merge(routes::create_routes(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.listen, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("appliance-webui v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
