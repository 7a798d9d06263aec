//! API routes

pub mod account;
pub mod execute;
pub mod health;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/health", get(health::health));

    let api_v1_routes = Router::new()
        .route(
            "/operations/:operation_id/execute",
            post(execute::execute_operation),
        )
        .route("/account/balance", get(account::get_balance))
        .route("/account/ledger", get(account::get_ledger));

    let webhook_routes = Router::new().route("/webhooks/payment", post(webhooks::payment));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .nest("/v1", api_v1_routes)
        // Execute payloads are bounded again inside the gateway; this cap
        // stops oversized bodies before they are buffered
        .layer(DefaultBodyLimit::max(state.config.max_input_bytes * 4))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_client_ip_prefers_cf_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.2"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn test_extract_client_ip_takes_first_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.9".to_string()));
    }
}
