//! Credit ledger service
//!
//! Sole owner of account balance mutations. Every charge, refund, top-up,
//! and bonus goes through here: the store layer provides the atomic
//! conditional updates, this service adds failure classification, quota
//! rollover on the charge path, and best-effort audit entries.

use std::sync::Arc;

use time::OffsetDateTime;
use tollgate_shared::{
    Account, AccountId, EntryKind, LedgerEntry, Plan, Store,
};

use crate::cycle::{add_calendar_month, BillingCycleManager, CycleState};
use crate::error::{BillingError, BillingResult};

/// Outcome of a one-time grant attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantOutcome {
    pub granted: bool,
    pub balance: i64,
}

/// Account balance as reported to the owner
#[derive(Debug, Clone, Copy)]
pub struct BalanceSnapshot {
    pub prepaid_balance: i64,
    pub monthly_allowance: i64,
    pub monthly_used: i64,
    pub next_reset_at: OffsetDateTime,
}

/// Atomic balance/quota mutation primitives
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    cycles: Arc<BillingCycleManager>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let cycles = Arc::new(BillingCycleManager::new(store.clone()));
        Self { store, cycles }
    }

    /// Charge `cost` credits against both the prepaid balance and the
    /// monthly quota in one conditional update. Returns the new balance.
    ///
    /// On predicate failure a non-atomic diagnostic re-read classifies the
    /// cause. Under extreme concurrency the classification can misreport
    /// (state moved between the failed update and the re-read); that only
    /// affects the error message, never correctness.
    pub async fn charge(
        &self,
        id: AccountId,
        cost: i64,
        reason: &str,
        correlation_id: Option<String>,
    ) -> BillingResult<i64> {
        if cost <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "charge cost must be positive, got {}",
                cost
            )));
        }

        // Land any due quota reset before enforcing the quota
        self.cycles.get_or_rollover_state(id).await?;

        match self.store.charge_if_covered(id, cost).await? {
            Some(new_balance) => {
                self.append_entry(LedgerEntry::new(
                    id,
                    EntryKind::Usage,
                    -cost,
                    reason,
                    correlation_id,
                ))
                .await;
                tracing::debug!(account_id = %id, cost, new_balance, "Charge committed");
                Ok(new_balance)
            }
            None => Err(self.classify_charge_failure(id, cost).await?),
        }
    }

    /// Return `amount` credits, unwinding the quota usage as well.
    /// No-op for non-positive amounts.
    pub async fn refund(
        &self,
        id: AccountId,
        amount: i64,
        reason: &str,
        correlation_id: Option<String>,
    ) -> BillingResult<()> {
        if amount <= 0 {
            return Ok(());
        }

        self.store.apply_refund(id, amount).await?;
        self.append_entry(LedgerEntry::new(
            id,
            EntryKind::Refund,
            amount,
            reason,
            correlation_id,
        ))
        .await;
        tracing::debug!(account_id = %id, amount, "Refund committed");
        Ok(())
    }

    /// Credit purchased credits; returns the new balance. Used for
    /// self-service, admin, and verified payment top-ups alike.
    pub async fn topup(&self, id: AccountId, amount: i64, reason: &str) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "topup amount must be positive, got {}",
                amount
            )));
        }

        let new_balance = self.store.credit(id, amount).await?;
        self.append_entry(LedgerEntry::new(id, EntryKind::Topup, amount, reason, None))
            .await;
        tracing::info!(account_id = %id, amount, new_balance, "Top-up credited");
        Ok(new_balance)
    }

    /// One-time signup bonus; safe to call repeatedly. The flag check and
    /// the credit are a single conditional update.
    pub async fn grant_once(&self, id: AccountId, amount: i64) -> BillingResult<GrantOutcome> {
        match self.store.grant_bonus_once(id, amount).await? {
            Some(balance) => {
                self.append_entry(LedgerEntry::new(
                    id,
                    EntryKind::Bonus,
                    amount,
                    "signup bonus",
                    None,
                ))
                .await;
                tracing::info!(account_id = %id, amount, "Signup bonus granted");
                Ok(GrantOutcome { granted: true, balance })
            }
            None => {
                let account = self.store.get_account(id).await?;
                Ok(GrantOutcome {
                    granted: false,
                    balance: account.prepaid_balance,
                })
            }
        }
    }

    /// Create an account on `plan` and grant its signup bonus
    pub async fn open_account(&self, plan: Plan) -> BillingResult<Account> {
        let account = Account::new(plan, OffsetDateTime::now_utc());
        self.store.insert_account(&account).await?;
        self.grant_once(account.id, plan.signup_bonus()).await?;
        self.store.get_account(account.id).await.map_err(Into::into)
    }

    /// Balance snapshot for reporting; applies any due rollover first so
    /// quota fields are never stale
    pub async fn balance(&self, id: AccountId) -> BillingResult<BalanceSnapshot> {
        let state: CycleState = self.cycles.get_or_rollover_state(id).await?;
        let account = self.store.get_account(id).await?;
        Ok(BalanceSnapshot {
            prepaid_balance: account.prepaid_balance,
            monthly_allowance: state.allowance,
            monthly_used: state.used,
            next_reset_at: state.next_reset_at,
        })
    }

    /// Recent ledger entries, newest first
    pub async fn history(&self, id: AccountId, limit: i64) -> BillingResult<Vec<LedgerEntry>> {
        self.store
            .list_ledger_entries(id, limit)
            .await
            .map_err(Into::into)
    }

    /// Diagnostic re-read after a failed charge predicate
    async fn classify_charge_failure(&self, id: AccountId, cost: i64) -> BillingResult<BillingError> {
        let account = self.store.get_account(id).await?;
        if account.monthly_used + cost > account.monthly_allowance {
            Ok(BillingError::MonthlyQuotaExceeded {
                allowance: account.monthly_allowance,
                used: account.monthly_used,
                needed: cost,
                next_reset_at: add_calendar_month(account.cycle_anchor),
            })
        } else {
            Ok(BillingError::InsufficientBalance {
                balance: account.prepaid_balance,
                needed: cost,
            })
        }
    }

    /// Audit write; failures alert but never unwind the account mutation
    async fn append_entry(&self, entry: LedgerEntry) {
        if let Err(e) = self.store.append_ledger_entry(&entry).await {
            tracing::error!(
                account_id = %entry.account_id,
                kind = %entry.kind,
                amount = entry.amount,
                error = %e,
                "Failed to write ledger entry"
            );
        }
    }
}
