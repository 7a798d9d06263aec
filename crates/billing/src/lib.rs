//! TollGate Billing
//!
//! Credit accounting for the execution gateway: the append-only ledger,
//! lazy monthly cycle rollover, idempotent payment top-ups, and fixed
//! window rate limiting.

pub mod cycle;
pub mod error;
pub mod ledger;
pub mod rate_limit;
pub mod topup;

pub use cycle::{add_calendar_month, BillingCycleManager, CycleState};
pub use error::{BillingError, BillingResult};
pub use ledger::{BalanceSnapshot, GrantOutcome, Ledger};
pub use rate_limit::{
    MemoryWindowStore, RateLimitDecision, RateLimiter, RateWindowStore, WINDOW_SECONDS,
};
pub use topup::{
    credits_for_usd_cents, verify_payment_signature, TopupOutcome, TopupRecorder,
};
