//! Rate limiter middleware.
//!
//! Runs before every route; paths without a policy go straight through.

use crate::{
    models::rate_limit::{RateLimitDecision, RateLimitKey},
    services::rate_limit::RateLimiter,
};
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Placeholder identity when no forwarded-for header is present.
const FALLBACK_IP: &str = "127.0.0.1";

/// Client identity from the first `X-Forwarded-For` hop. The header is taken
/// at face value; nothing verifies the proxy chain.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_IP)
        .to_string()
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if limiter.policy(path).is_none() {
        return next.run(request).await;
    }

    let key = RateLimitKey::new(client_ip(request.headers()), path);
    match limiter.check(&key).await {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Limited { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many requests" })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        RateLimitDecision::Blacklisted => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "You have been blacklisted from this service" })),
        )
            .into_response(),
    }
}
