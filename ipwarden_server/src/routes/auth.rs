//! Login endpoint
//!
//! Stands in for a real credential check. Its purpose is to be the
//! rate-checked sensitive endpoint: the ingress middleware applies the login
//! rate rule before this handler runs.

use crate::routes::AppState;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use ipwarden_common::ErrorBody;

/// Build the login router on the configured path
pub fn router(login_path: &str) -> Router<AppState> {
    Router::new().route(login_path, any(login))
}

async fn login(method: Method) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "Use POST for login.").into_response();
    }

    (StatusCode::OK, Json(ErrorBody::new("Login attempt accepted (demo)."))).into_response()
}
