//! Billing error types

use thiserror::Error;
use time::OffsetDateTime;
use tollgate_shared::StoreError;

/// Billing-specific errors.
///
/// The two funds failures are distinct variants so the gateway can tell the
/// caller whether to top up or wait for the next cycle.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Insufficient credits: balance {balance}, needed {needed}")]
    InsufficientBalance { balance: i64, needed: i64 },

    #[error("Monthly quota exceeded: {used}/{allowance} used, needed {needed}")]
    MonthlyQuotaExceeded {
        allowance: i64,
        used: i64,
        needed: i64,
        next_reset_at: OffsetDateTime,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BillingResult<T> = Result<T, BillingError>;
