//! Metered operation execution endpoint

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{bearer_token, hash_api_key};
use crate::error::ApiError;
use crate::routes::extract_client_ip;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub input: Value,
}

/// `POST /v1/operations/:operation_id/execute`
///
/// Limiter order is load-bearing: the address limiter runs before
/// credential resolution so unauthenticated traffic is bounded too.
pub async fn execute_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let ip = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let ip_decision = state.ip_limiter.check_ip(&ip).await;
    if !ip_decision.allowed {
        return ApiError::RateLimited(ip_decision).into_response();
    }

    let credential = match resolve_credential(&state, &headers).await {
        Ok(credential) => credential,
        Err(e) => return e.into_response(),
    };

    let key_decision = state.key_limiter.check_api_key(&credential.key_id).await;
    if !key_decision.allowed {
        return ApiError::RateLimited(key_decision).into_response();
    }

    match state
        .gateway
        .execute(credential.account_id, &operation_id, &request.input)
        .await
    {
        Ok(outcome) => Json(json!({
            "ok": true,
            "requestId": outcome.request_id,
            "output": outcome.output,
            "creditsCharged": outcome.credits_charged,
            "usage": {
                "tokens": outcome.tokens,
                "creditsCharged": outcome.credits_charged,
            },
            "latencyMs": outcome.latency_ms,
        }))
        .into_response(),
        Err(e) => e.error.into_response_with_id(e.request_id),
    }
}

pub(crate) async fn resolve_credential(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::auth::Credential, ApiError> {
    let raw_key = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    state
        .credentials
        .resolve(&hash_api_key(raw_key))
        .await?
        .ok_or(ApiError::Unauthorized)
}
