//! Payment webhook
//!
//! The payment processor posts signed notifications here. The body is
//! verified against `X-Payment-Signature` (HMAC-SHA256 over the raw bytes)
//! before anything is parsed; redeliveries of a processed transaction
//! return 200 without crediting again.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tollgate_billing::{verify_payment_signature, TopupOutcome};
use tollgate_shared::AccountId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub external_transaction_id: String,
    pub account_id: AccountId,
    pub amount_usd_cents: i64,
}

/// `POST /webhooks/payment`
pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Payment webhook received");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Payment webhook missing signature header");
            ApiError::Unauthorized
        })?;

    if !verify_payment_signature(&state.config.payment_webhook_secret, &body, signature) {
        tracing::warn!("Payment webhook signature verification failed");
        return Err(ApiError::Unauthorized);
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid payment event: {}", e)))?;

    if event.amount_usd_cents <= 0 {
        return Err(ApiError::BadRequest(
            "payment amount must be positive".to_string(),
        ));
    }

    let outcome = state
        .topups
        .apply_verified_topup(
            &event.external_transaction_id,
            event.account_id,
            event.amount_usd_cents,
        )
        .await
        .map_err(ApiError::from)?;

    let status = match outcome {
        TopupOutcome::Credited(credits) => {
            tracing::info!(
                account_id = %event.account_id,
                external_transaction_id = %event.external_transaction_id,
                credits,
                "Payment credited"
            );
            "credited"
        }
        TopupOutcome::Duplicate => "duplicate",
    };

    Ok(Json(json!({ "ok": true, "status": status })))
}
