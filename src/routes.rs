//! HTTP routes for the appliance web API.
//!
//! All endpoints require authentication via the `X-Webui-Token` header,
//! except for `/health` which stays public for monitoring probes.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, DefaultBodyLimit, FromRequestParts, Multipart, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::upgrade::{
    config_backup, firmware_info, UpgradeError, UpgradeInfo, UpgradeStatus, BACKUP_FILENAME,
};
use crate::utils::format_duration;
use crate::AppState;

/// Header carrying the API token
pub const AUTH_HEADER: &str = "X-Webui-Token";

/// Room for multipart boundaries and part headers on top of the file ceiling
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const NO_CACHE: [(header::HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

/// Creates the router with all API routes.
///
/// `max_upload_bytes` bounds the file content of one upload; the transport
/// limit on the upload route sits just above it.
pub fn create_routes(max_upload_bytes: u64) -> Router<Arc<AppState>> {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    Router::new()
        // Public routes (no auth required)
        .route("/health", get(health))
        // Protected routes (auth required via AuthenticatedState extractor)
        .route("/upgrade", get(upgrade_page))
        .route(
            "/upgrade/upload",
            post(upgrade_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/upgrade/status", get(upgrade_status))
        .route("/upgrade/reboot", post(upgrade_reboot))
        .route("/upgrade/config", get(upgrade_config_download))
        .route("/factory-reset", post(factory_reset))
}

/// Custom extractor that validates authentication before allowing access to state.
///
/// When no token is configured, authentication is disabled (development mode).
pub struct AuthenticatedState(pub Arc<AppState>);

impl FromRequestParts<Arc<AppState>> for AuthenticatedState {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_token) = &state.auth_token else {
            tracing::debug!("No auth token configured, authentication disabled");
            return Ok(AuthenticatedState(Arc::clone(state)));
        };

        let provided_token = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok());

        match provided_token {
            Some(token) if token == expected_token => Ok(AuthenticatedState(Arc::clone(state))),
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("Invalid authentication token")),
            )),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new(format!("Missing {} header", AUTH_HEADER))),
            )),
        }
    }
}

/// Standard API error response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    error: String,
}

impl ApiError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        let status = match &self {
            UpgradeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            UpgradeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UpgradeError::UpgradeInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_client_error() {
            tracing::warn!("Upgrade request rejected: {}", self);
        } else {
            tracing::error!("Upgrade request failed: {}", self);
        }

        (status, Json(ApiError::new(self.to_string()))).into_response()
    }
}

/// GET /health - Simple health check (public, no auth required)
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "appliance-webui",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": format_duration(state.uptime_seconds()),
    }))
}

#[derive(Debug, Serialize)]
struct UpgradePage {
    info: UpgradeInfo,
    status: UpgradeStatus,
}

/// GET /upgrade - Running firmware and current upgrade status
async fn upgrade_page(AuthenticatedState(state): AuthenticatedState) -> impl IntoResponse {
    let info = firmware_info(&state.upgrade.config().installer).await;
    Json(UpgradePage {
        info,
        status: state.upgrade.status().await,
    })
}

/// POST /upgrade/upload - Stage firmware (and optional config) and start the upgrade
///
/// Returns 202 with the fresh status; poll GET /upgrade/status for progress.
async fn upgrade_upload(
    AuthenticatedState(state): AuthenticatedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UpgradeStatus>), UpgradeError> {
    let multipart = multipart.map_err(|e| {
        tracing::debug!("Rejected upload body: {}", e);
        UpgradeError::invalid("Failed to parse upload form")
    })?;

    let status = state.upgrade.upload(multipart).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// GET /upgrade/status - Current upgrade status
async fn upgrade_status(AuthenticatedState(state): AuthenticatedState) -> Json<UpgradeStatus> {
    Json(state.upgrade.status().await)
}

/// POST /upgrade/reboot - Acknowledge and reboot after a short delay
async fn upgrade_reboot(AuthenticatedState(state): AuthenticatedState) -> impl IntoResponse {
    tracing::info!("Reboot requested");
    state.reboot.trigger();

    Json(serde_json::json!({
        "status": "rebooting",
        "message": "System is rebooting..."
    }))
}

/// GET /upgrade/config - Download a backup of the running configuration
async fn upgrade_config_download(
    AuthenticatedState(state): AuthenticatedState,
) -> impl IntoResponse {
    let info = firmware_info(&state.upgrade.config().installer).await;
    let backup = config_backup(&info);

    (
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", BACKUP_FILENAME),
            ),
        ],
        backup,
    )
}

/// POST /factory-reset - Acknowledge and reset after a delay
async fn factory_reset(AuthenticatedState(state): AuthenticatedState) -> impl IntoResponse {
    tracing::warn!("Factory reset requested");
    state.factory_reset.trigger();

    (StatusCode::OK, NO_CACHE, "Reset command received")
}
