//! Admin API: block list management, suspicious flags and on-demand scans

use crate::abuse::{self, BlockError};
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use ipwarden_common::{BlockIpRequest, BlockStatus, ErrorBody};
use serde::Deserialize;

const DEFAULT_FLAG_LIMIT: usize = 50;
const MAX_FLAG_LIMIT: usize = 1000;

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blocked", get(list_blocked).post(add_blocked))
        .route("/blocked/{ip}", delete(remove_blocked))
        .route("/flags", get(list_flags))
        .route("/scan", post(run_scan))
}

/// Validate the bearer token; the admin API is disabled without one configured
fn validate_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(admin_token) = state.config.admin_token.as_deref() else {
        return false;
    };

    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t == admin_token)
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody::new("Unauthorized"))).into_response()
}

fn block_error_response(e: BlockError) -> Response {
    match e {
        BlockError::InvalidAddress(e) => {
            (StatusCode::BAD_REQUEST, Json(ErrorBody::new(e.to_string()))).into_response()
        }
        BlockError::Store(e) => {
            tracing::error!(error = %e, "Block list update failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody::new("Block list unavailable")),
            )
                .into_response()
        }
    }
}

fn store_unavailable(what: &str, e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "{} failed", what);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody::new(format!("{} unavailable", what))),
    )
        .into_response()
}

/// POST /blocked - 201 when added, 200 when already present
async fn add_blocked(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BlockIpRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    match abuse::block_ip(state.blocklist.as_ref(), &body.ip).await {
        Ok(response) => {
            let status = match response.status {
                BlockStatus::Added => StatusCode::CREATED,
                BlockStatus::AlreadyBlocked => StatusCode::OK,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => block_error_response(e),
    }
}

/// DELETE /blocked/{ip}
async fn remove_blocked(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ip): Path<String>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    match abuse::unblock_ip(state.blocklist.as_ref(), &ip).await {
        Ok(response) if response.removed => Json(response).into_response(),
        Ok(response) => (StatusCode::NOT_FOUND, Json(response)).into_response(),
        Err(e) => block_error_response(e),
    }
}

/// GET /blocked
async fn list_blocked(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    match state.blocklist.list().await {
        Ok(blocked) => Json(blocked).into_response(),
        Err(e) => store_unavailable("Block list", e),
    }
}

#[derive(Debug, Deserialize)]
struct FlagsQuery {
    limit: Option<usize>,
}

/// GET /flags?limit=N - most recent first
async fn list_flags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FlagsQuery>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    let limit = query.limit.unwrap_or(DEFAULT_FLAG_LIMIT).min(MAX_FLAG_LIMIT);
    match state.flags.recent(limit).await {
        Ok(flags) => Json(flags).into_response(),
        Err(e) => store_unavailable("Flag store", e),
    }
}

/// POST /scan - run one scan over the configured window
async fn run_scan(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    match state.scanner.run_scan(state.config.scan_window).await {
        Ok(report) => {
            tracing::info!(
                created = report.created,
                existing = report.existing,
                "Manual scan complete"
            );
            Json(report).into_response()
        }
        Err(e) => store_unavailable("Scan", e),
    }
}
