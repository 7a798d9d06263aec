//! Common types used across TollGate

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Account ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Subscription plan for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Scale,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

impl Plan {
    /// Monthly credit allowance included with this plan.
    ///
    /// The allowance is a spending cap per billing cycle, independent of the
    /// prepaid balance: a charge must fit under both.
    pub fn monthly_allowance(&self) -> i64 {
        match self {
            Self::Free => 500,
            Self::Starter => 5_000,
            Self::Pro => 50_000,
            Self::Scale => 250_000,
        }
    }

    /// One-time signup bonus in credits
    pub fn signup_bonus(&self) -> i64 {
        match self {
            Self::Free => 100,
            Self::Starter => 100,
            Self::Pro => 500,
            Self::Scale => 500,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Starter => write!(f, "starter"),
            Self::Pro => write!(f, "pro"),
            Self::Scale => write!(f, "scale"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "scale" => Ok(Self::Scale),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// A paying identity with a prepaid credit balance and a monthly allowance.
///
/// Invariants held by the store layer:
/// - `prepaid_balance >= 0` after every committed operation
/// - `monthly_used <= monthly_allowance` after every committed charge
/// - `cycle_anchor` only ever advances forward in whole-month steps
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub prepaid_balance: i64,
    pub monthly_allowance: i64,
    pub monthly_used: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub cycle_anchor: OffsetDateTime,
    pub plan: Plan,
    pub bonus_granted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Create a fresh account on the given plan, anchored at `now`
    pub fn new(plan: Plan, now: OffsetDateTime) -> Self {
        Self {
            id: AccountId::new(),
            prepaid_balance: 0,
            monthly_allowance: plan.monthly_allowance(),
            monthly_used: 0,
            cycle_anchor: now,
            plan,
            bonus_granted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Kind of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Bonus,
    Topup,
    Usage,
    Refund,
    Reset,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bonus => write!(f, "bonus"),
            Self::Topup => write!(f, "topup"),
            Self::Usage => write!(f, "usage"),
            Self::Refund => write!(f, "refund"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Immutable, append-only audit record of one balance-affecting event.
///
/// Written best-effort after the account mutation commits; a failed write
/// is surfaced for alerting but never rolls the mutation back.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Signed credits: negative for usage, positive for credits in
    pub amount: i64,
    pub reason: String,
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl LedgerEntry {
    pub fn new(
        account_id: AccountId,
        kind: EntryKind,
        amount: i64,
        reason: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind,
            amount,
            reason: reason.into(),
            correlation_id,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

// =============================================================================
// Top-up idempotency
// =============================================================================

/// Dedupe guard for external payment notifications.
///
/// Inserted before the account is credited; deleted again (compensation) if
/// the credit fails so a legitimate retry is not permanently blocked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopupReceipt {
    pub external_transaction_id: String,
    pub account_id: AccountId,
    pub amount: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}

// =============================================================================
// Execution operations
// =============================================================================

/// How the target list for an operation is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Only the first configured target is attempted
    Primary,
    /// All configured targets are attempted in order
    Failover,
}

impl Default for RoutingMode {
    fn default() -> Self {
        Self::Failover
    }
}

/// An opaque, interchangeable backend target.
///
/// Target identity is internal routing detail and must never reach a caller;
/// both fields are registered with the redaction filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub id: String,
    pub endpoint: String,
}

/// A billable operation: schema-validated input, an instruction template,
/// and an ordered target list with a cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Slug used in the execute URL
    pub id: String,
    pub name: String,
    /// JSON-Schema for the request's `input` field
    pub input_schema: serde_json::Value,
    /// Instruction template; `{{name}}` placeholders are substituted with
    /// the normalized input variables
    pub template: String,
    pub routing: RoutingMode,
    pub targets: Vec<ExecutionTarget>,
    /// Conservative upper-bound cost reserved before any backend call
    pub max_cost_credits: i64,
    /// Floor applied when reconciling actual cost
    pub min_cost_credits: i64,
    /// Backend work units that convert to one credit
    pub work_units_per_credit: i64,
}

impl Operation {
    /// The ordered target list for this operation's routing mode
    pub fn resolved_targets(&self) -> Vec<ExecutionTarget> {
        match self.routing {
            RoutingMode::Primary => self.targets.iter().take(1).cloned().collect(),
            RoutingMode::Failover => self.targets.clone(),
        }
    }
}

// =============================================================================
// Run records
// =============================================================================

/// Terminal status of one gateway request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-request execution audit record, internal only.
///
/// `resolved_target_id` records which backend actually served the request
/// and is never returned to the caller beyond the bare `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub request_id: Uuid,
    pub account_id: AccountId,
    pub operation_id: String,
    pub status: RunStatus,
    pub status_code: i32,
    pub latency_ms: i64,
    pub resolved_target_id: Option<String>,
    pub sanitized_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_plan_allowances_are_ordered() {
        assert!(Plan::Free.monthly_allowance() < Plan::Starter.monthly_allowance());
        assert!(Plan::Starter.monthly_allowance() < Plan::Pro.monthly_allowance());
        assert!(Plan::Pro.monthly_allowance() < Plan::Scale.monthly_allowance());
    }

    #[test]
    fn test_plan_round_trip() {
        for plan in [Plan::Free, Plan::Starter, Plan::Pro, Plan::Scale] {
            assert_eq!(Plan::from_str(&plan.to_string()).unwrap(), plan);
        }
        assert!(Plan::from_str("platinum").is_err());
    }

    #[test]
    fn test_new_account_defaults() {
        let now = OffsetDateTime::now_utc();
        let account = Account::new(Plan::Pro, now);
        assert_eq!(account.prepaid_balance, 0);
        assert_eq!(account.monthly_used, 0);
        assert_eq!(account.monthly_allowance, Plan::Pro.monthly_allowance());
        assert_eq!(account.cycle_anchor, now);
        assert!(!account.bonus_granted);
    }

    #[test]
    fn test_primary_routing_uses_single_target() {
        let op = Operation {
            id: "summarize".into(),
            name: "Summarize".into(),
            input_schema: serde_json::json!({"type": "object"}),
            template: "{{text}}".into(),
            routing: RoutingMode::Primary,
            targets: vec![
                ExecutionTarget { id: "t1".into(), endpoint: "http://a".into() },
                ExecutionTarget { id: "t2".into(), endpoint: "http://b".into() },
            ],
            max_cost_credits: 10,
            min_cost_credits: 1,
            work_units_per_credit: 1000,
        };
        assert_eq!(op.resolved_targets().len(), 1);
        assert_eq!(op.resolved_targets()[0].id, "t1");

        let failover = Operation { routing: RoutingMode::Failover, ..op };
        assert_eq!(failover.resolved_targets().len(), 2);
    }
}
