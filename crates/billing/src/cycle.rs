//! Billing cycle management
//!
//! Monthly quotas reset on a sliding per-account schedule anchored at
//! `cycle_anchor`. Rollover is lazy: any read or charge path that finds the
//! account past its reset boundary advances the anchor in whole-month steps
//! and zeroes `monthly_used`, persisting once. Accounts dormant for any
//! number of cycles self-heal on their next touch; the worker sweep only
//! makes resets proactive, it is not required for correctness.

use std::sync::Arc;

use time::OffsetDateTime;
use tollgate_shared::{AccountId, EntryKind, LedgerEntry, Plan, Store};

use crate::error::BillingResult;

/// Current cycle state for an account, after any due rollover has landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleState {
    pub allowance: i64,
    pub used: i64,
    pub anchor: OffsetDateTime,
    pub next_reset_at: OffsetDateTime,
}

/// Add one calendar month, preserving day-of-month where possible.
///
/// Day-of-month is clamped to the target month's length, so Jan 31 advances
/// to Feb 28 (or 29 in leap years).
pub fn add_calendar_month(t: OffsetDateTime) -> OffsetDateTime {
    let date = t.date();
    let mut year = date.year();
    let month = date.month().next();
    if month == time::Month::January {
        year += 1;
    }
    let day = date.day().min(time::util::days_in_year_month(year, month));
    // Clamped day is always valid for (year, month)
    let new_date = time::Date::from_calendar_date(year, month, day).unwrap_or(date);
    t.replace_date(new_date)
}

/// Per-account lazy monthly rollover
pub struct BillingCycleManager {
    store: Arc<dyn Store>,
}

impl BillingCycleManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Read the account's cycle state, applying any due rollover first
    pub async fn get_or_rollover_state(&self, id: AccountId) -> BillingResult<CycleState> {
        let (state, _) = self.rollover_at(id, OffsetDateTime::now_utc()).await?;
        Ok(state)
    }

    /// Batch-scan all accounts and apply due rollovers; returns the number
    /// of accounts actually reset. Proactive only, see module docs.
    pub async fn sweep_due_accounts(&self) -> BillingResult<usize> {
        let now = OffsetDateTime::now_utc();
        let ids = self.store.list_account_ids().await?;

        let mut reset_count = 0;
        for id in ids {
            match self.rollover_at(id, now).await {
                Ok((_, true)) => reset_count += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    // Keep sweeping the rest
                    tracing::error!(account_id = %id, error = %e, "Sweep rollover failed");
                }
            }
        }

        tracing::info!(reset_count, "Completed billing cycle sweep");
        Ok(reset_count)
    }

    /// Switch the account's plan, updating the monthly allowance
    /// immediately. `monthly_used` is deliberately untouched so a plan
    /// switch cannot be used to bypass the quota mid-cycle.
    pub async fn change_plan(&self, id: AccountId, plan: Plan) -> BillingResult<()> {
        self.store
            .set_plan(id, plan, plan.monthly_allowance())
            .await?;
        tracing::info!(account_id = %id, plan = %plan, "Plan changed");
        Ok(())
    }

    /// Rollover core with an injected clock. Returns the final state and
    /// whether a rollover actually landed.
    async fn rollover_at(
        &self,
        id: AccountId,
        now: OffsetDateTime,
    ) -> BillingResult<(CycleState, bool)> {
        loop {
            let account = self.store.get_account(id).await?;
            let mut anchor = account.cycle_anchor;
            let mut next_reset_at = add_calendar_month(anchor);

            if now < next_reset_at {
                return Ok((
                    CycleState {
                        allowance: account.monthly_allowance,
                        used: account.monthly_used,
                        anchor,
                        next_reset_at,
                    },
                    false,
                ));
            }

            // Due: advance the anchor in whole-month steps past `now`,
            // then persist the final state once.
            while next_reset_at <= now {
                anchor = next_reset_at;
                next_reset_at = add_calendar_month(anchor);
            }

            if self
                .store
                .commit_rollover(id, account.cycle_anchor, anchor)
                .await?
            {
                tracing::info!(
                    account_id = %id,
                    anchor = %anchor,
                    forfeited_used = account.monthly_used,
                    "Billing cycle rolled over"
                );

                let entry = LedgerEntry::new(
                    id,
                    EntryKind::Reset,
                    0,
                    "monthly quota reset",
                    None,
                );
                if let Err(e) = self.store.append_ledger_entry(&entry).await {
                    tracing::error!(account_id = %id, error = %e, "Failed to write reset ledger entry");
                }

                return Ok((
                    CycleState {
                        allowance: account.monthly_allowance,
                        used: 0,
                        anchor,
                        next_reset_at,
                    },
                    true,
                ));
            }
            // Another writer rolled the account over first; re-read.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use tollgate_shared::{Account, MemoryStore};

    async fn seed(store: &Arc<MemoryStore>, anchor: OffsetDateTime, used: i64) -> AccountId {
        let mut account = Account::new(Plan::Pro, anchor);
        account.monthly_used = used;
        store.insert_account(&account).await.unwrap();
        account.id
    }

    fn manager(store: &Arc<MemoryStore>) -> BillingCycleManager {
        BillingCycleManager::new(store.clone() as Arc<dyn Store>)
    }

    #[test]
    fn test_add_calendar_month_preserves_day() {
        let t = datetime!(2024-03-15 10:30:00 UTC);
        assert_eq!(add_calendar_month(t), datetime!(2024-04-15 10:30:00 UTC));
    }

    #[test]
    fn test_add_calendar_month_clamps_to_month_length() {
        assert_eq!(
            add_calendar_month(datetime!(2024-01-31 00:00:00 UTC)),
            datetime!(2024-02-29 00:00:00 UTC)
        );
        assert_eq!(
            add_calendar_month(datetime!(2023-01-31 00:00:00 UTC)),
            datetime!(2023-02-28 00:00:00 UTC)
        );
        assert_eq!(
            add_calendar_month(datetime!(2024-12-31 23:59:59 UTC)),
            datetime!(2025-01-31 23:59:59 UTC)
        );
    }

    #[tokio::test]
    async fn test_no_rollover_within_cycle() {
        let store = Arc::new(MemoryStore::new());
        let anchor = datetime!(2024-06-01 00:00:00 UTC);
        let id = seed(&store, anchor, 42).await;

        let (state, reset) = manager(&store)
            .rollover_at(id, datetime!(2024-06-20 00:00:00 UTC))
            .await
            .unwrap();
        assert!(!reset);
        assert_eq!(state.used, 42);
        assert_eq!(state.anchor, anchor);
        assert_eq!(state.next_reset_at, datetime!(2024-07-01 00:00:00 UTC));
    }

    #[tokio::test]
    async fn test_multi_cycle_dormancy_heals_in_one_call() {
        let store = Arc::new(MemoryStore::new());
        let anchor = datetime!(2024-01-10 08:00:00 UTC);
        let id = seed(&store, anchor, 500).await;

        // Three full periods plus a bit
        let now = datetime!(2024-04-11 00:00:00 UTC);
        let (state, reset) = manager(&store).rollover_at(id, now).await.unwrap();

        assert!(reset);
        assert_eq!(state.used, 0);
        assert_eq!(state.anchor, datetime!(2024-04-10 08:00:00 UTC));
        assert_eq!(state.next_reset_at, datetime!(2024-05-10 08:00:00 UTC));

        // Persisted, not just computed
        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.cycle_anchor, datetime!(2024-04-10 08:00:00 UTC));
        assert_eq!(account.monthly_used, 0);
    }

    #[tokio::test]
    async fn test_rollover_exactly_on_boundary() {
        let store = Arc::new(MemoryStore::new());
        let anchor = datetime!(2024-06-01 00:00:00 UTC);
        let id = seed(&store, anchor, 10).await;

        // now == next_reset_at triggers the reset
        let (state, reset) = manager(&store)
            .rollover_at(id, datetime!(2024-07-01 00:00:00 UTC))
            .await
            .unwrap();
        assert!(reset);
        assert_eq!(state.anchor, datetime!(2024-07-01 00:00:00 UTC));
        assert_eq!(state.used, 0);
    }

    #[tokio::test]
    async fn test_sweep_counts_only_due_accounts() {
        let store = Arc::new(MemoryStore::new());
        let old = OffsetDateTime::now_utc() - time::Duration::days(90);
        seed(&store, old, 5).await;
        seed(&store, old, 7).await;
        seed(&store, OffsetDateTime::now_utc(), 3).await;

        let count = manager(&store).sweep_due_accounts().await.unwrap();
        assert_eq!(count, 2);

        // Second sweep finds nothing due
        let count = manager(&store).sweep_due_accounts().await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_change_plan_does_not_reset_usage() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, OffsetDateTime::now_utc(), 400).await;

        manager(&store).change_plan(id, Plan::Scale).await.unwrap();

        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.monthly_allowance, Plan::Scale.monthly_allowance());
        assert_eq!(account.monthly_used, 400);
    }
}
