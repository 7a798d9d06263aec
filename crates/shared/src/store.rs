//! Store abstraction over the durable account state.
//!
//! Every Account mutation is expressed as a single atomic conditional
//! update: the predicate and the write happen in one store call, never as a
//! read-then-write pair. Concurrent requests for the same account therefore
//! never observe a stale balance between check and write, regardless of the
//! backing implementation.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StoreResult;
use crate::types::{Account, AccountId, LedgerEntry, Operation, Plan, RunRecord, TopupReceipt};

#[async_trait]
pub trait Store: Send + Sync {
    // -- Accounts ------------------------------------------------------------

    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn get_account(&self, id: AccountId) -> StoreResult<Account>;

    /// Atomically decrement `prepaid_balance` and increment `monthly_used`
    /// by `cost`, but only while `prepaid_balance >= cost` and
    /// `monthly_used + cost <= monthly_allowance` both hold at the moment of
    /// the update. Returns the new balance, or `None` if the predicate
    /// failed (the caller classifies which half failed).
    async fn charge_if_covered(&self, id: AccountId, cost: i64) -> StoreResult<Option<i64>>;

    /// Unconditionally increment `prepaid_balance`; returns the new balance
    async fn credit(&self, id: AccountId, amount: i64) -> StoreResult<i64>;

    /// Increment `prepaid_balance` and decrement `monthly_used` by `amount`,
    /// flooring `monthly_used` at zero
    async fn apply_refund(&self, id: AccountId, amount: i64) -> StoreResult<()>;

    /// Credit `amount` and set the bonus flag in one conditional update that
    /// only applies while the flag is unset. Returns the new balance, or
    /// `None` if the bonus was already granted.
    async fn grant_bonus_once(&self, id: AccountId, amount: i64) -> StoreResult<Option<i64>>;

    /// Advance the cycle anchor and zero `monthly_used`, conditional on the
    /// anchor still being `expected_anchor`. Returns `false` when another
    /// writer rolled the account over first.
    async fn commit_rollover(
        &self,
        id: AccountId,
        expected_anchor: OffsetDateTime,
        new_anchor: OffsetDateTime,
    ) -> StoreResult<bool>;

    /// Update the plan and its monthly allowance; `monthly_used` is
    /// deliberately left untouched
    async fn set_plan(&self, id: AccountId, plan: Plan, allowance: i64) -> StoreResult<()>;

    /// All account ids, for the sweep job
    async fn list_account_ids(&self) -> StoreResult<Vec<AccountId>>;

    // -- Ledger --------------------------------------------------------------

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Most recent entries first
    async fn list_ledger_entries(
        &self,
        id: AccountId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>>;

    // -- Top-up idempotency --------------------------------------------------

    /// Insert the receipt; returns `false` when a receipt with the same
    /// `external_transaction_id` already exists (duplicate delivery)
    async fn insert_topup_receipt(&self, receipt: &TopupReceipt) -> StoreResult<bool>;

    /// Compensating delete so a failed credit can be retried
    async fn delete_topup_receipt(&self, external_transaction_id: &str) -> StoreResult<()>;

    // -- Operations ----------------------------------------------------------

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()>;

    async fn get_operation(&self, id: &str) -> StoreResult<Operation>;

    // -- Run records ---------------------------------------------------------

    async fn insert_run_record(&self, record: &RunRecord) -> StoreResult<()>;
}
