//! Ingress middleware - runs every public request through the pipeline

use crate::abuse::RateLimitResult;
use crate::pipeline::{RequestInfo, Verdict};
use crate::routes::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use ipwarden_common::{constants, ErrorBody};
use std::net::SocketAddr;

const BLOCKED_MESSAGE: &str = "Forbidden: Your IP has been blocked.";
const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Try again soon.";

/// Track the request; reject blocked and rate-limited callers
pub async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let info = request_info(&request, state.config.identity_header.as_deref());

    match state.pipeline.evaluate(&info).await {
        Verdict::Forbidden { .. } => (StatusCode::FORBIDDEN, BLOCKED_MESSAGE).into_response(),
        Verdict::TooManyRequests { result, .. } => rate_limit_response(&result),
        Verdict::Admitted(_) => next.run(request).await,
    }
}

/// Pull the pipeline's view of a request out of the HTTP layer.
///
/// The identity header is read only when one is configured.
fn request_info(request: &Request, identity_header: Option<&str>) -> RequestInfo {
    let headers = request.headers();

    RequestInfo {
        forwarded_for: header_value(headers, constants::FORWARDED_FOR_HEADER),
        peer: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        identity: identity_header
            .and_then(|name| header_value(headers, name))
            .filter(|id| !id.trim().is_empty()),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Rate limit error response
fn rate_limit_response(result: &RateLimitResult) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(result.reset_in_secs));
    for (name, value) in result.headers() {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            headers.insert(name, value);
        }
    }

    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(ErrorBody::new(RATE_LIMITED_MESSAGE)),
    )
        .into_response()
}
