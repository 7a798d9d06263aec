//! API error types and handling
//!
//! Every error response carries a `requestId` for support correlation and an
//! opaque `code`. Backend failures collapse into `RUNTIME_ERROR` so target
//! identity never reaches a client.

use axum::{
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tollgate_billing::{BillingError, RateLimitDecision};
use tollgate_shared::StoreError;
use uuid::Uuid;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation
    #[error("Validation error at {path}: {message}")]
    Validation { path: String, message: String },
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Request input exceeds the allowed size")]
    RequestTooLarge,

    // Resources
    #[error("Resource not found")]
    NotFound,

    // Funds
    #[error("Insufficient credits")]
    InsufficientCredits { balance: i64, needed: i64 },
    #[error("Monthly quota exceeded")]
    QuotaExceeded {
        allowance: i64,
        used: i64,
        needed: i64,
        next_reset_at: OffsetDateTime,
    },

    // Rate limiting
    #[error("Too many requests")]
    RateLimited(RateLimitDecision),

    // Upstream (already collapsed, no target identity)
    #[error("Operation failed to execute")]
    Upstream,

    // Internal
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "VALIDATION_ERROR",
            ApiError::RequestTooLarge => "REQUEST_TOO_LARGE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            ApiError::QuotaExceeded { .. } => "MONTHLY_QUOTA_EXCEEDED",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::Upstream => "RUNTIME_ERROR",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation { .. } | ApiError::BadRequest(_) | ApiError::RequestTooLarge => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InsufficientCredits { .. } | ApiError::QuotaExceeded { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the error response reusing a request id minted earlier in the
    /// request's lifecycle (the gateway's run record id).
    pub fn into_response_with_id(self, request_id: Uuid) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let ApiError::QuotaExceeded {
            allowance,
            used,
            needed,
            next_reset_at,
        } = &self
        {
            error["allowance"] = json!(allowance);
            error["used"] = json!(used);
            error["needed"] = json!(needed);
            error["nextResetAt"] = json!(next_reset_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| String::new()));
        }

        let body = Json(json!({
            "ok": false,
            "error": error,
            "requestId": request_id,
        }));

        if let ApiError::RateLimited(decision) = &self {
            let headers = [
                (
                    header::RETRY_AFTER,
                    decision.retry_after_seconds.unwrap_or(1).to_string(),
                ),
                (
                    HeaderName::from_static("x-ratelimit-limit"),
                    decision.limit.to_string(),
                ),
                (
                    HeaderName::from_static("x-ratelimit-remaining"),
                    decision.remaining.to_string(),
                ),
                (
                    HeaderName::from_static("x-ratelimit-reset"),
                    decision.reset_at.to_string(),
                ),
            ];
            return (status, headers, body).into_response();
        }

        (status, body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with_id(Uuid::new_v4())
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientBalance { balance, needed } => {
                ApiError::InsufficientCredits { balance, needed }
            }
            BillingError::MonthlyQuotaExceeded {
                allowance,
                used,
                needed,
                next_reset_at,
            } => ApiError::QuotaExceeded {
                allowance,
                used,
                needed,
                next_reset_at,
            },
            BillingError::InvalidAmount(msg) => ApiError::BadRequest(msg),
            BillingError::Store(err) => err.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(_) | StoreError::OperationNotFound(_) => ApiError::NotFound,
            StoreError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
