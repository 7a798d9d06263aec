//! In-memory store (for development and tests, without Postgres).
//!
//! All maps live behind a single async `RwLock`, so each trait method's
//! predicate-and-write runs under one write guard and is atomic with respect
//! to every other caller, matching the conditional-update contract of the
//! Postgres implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::types::{Account, AccountId, LedgerEntry, Operation, Plan, RunRecord, TopupReceipt};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    ledger: Vec<LedgerEntry>,
    receipts: HashMap<String, TopupReceipt>,
    operations: HashMap<String, Operation>,
    runs: Vec<RunRecord>,
}

/// Process-local implementation of [`Store`]
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of run records written so far (test observability)
    pub async fn run_record_count(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    /// Snapshot of run records (test observability)
    pub async fn run_records(&self) -> Vec<RunRecord> {
        self.inner.read().await.runs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Account> {
        let inner = self.inner.read().await;
        inner
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn charge_if_covered(&self, id: AccountId, cost: i64) -> StoreResult<Option<i64>> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;

        if account.prepaid_balance >= cost
            && account.monthly_used + cost <= account.monthly_allowance
        {
            account.prepaid_balance -= cost;
            account.monthly_used += cost;
            account.updated_at = OffsetDateTime::now_utc();
            Ok(Some(account.prepaid_balance))
        } else {
            Ok(None)
        }
    }

    async fn credit(&self, id: AccountId, amount: i64) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.prepaid_balance += amount;
        account.updated_at = OffsetDateTime::now_utc();
        Ok(account.prepaid_balance)
    }

    async fn apply_refund(&self, id: AccountId, amount: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.prepaid_balance += amount;
        account.monthly_used = (account.monthly_used - amount).max(0);
        account.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn grant_bonus_once(&self, id: AccountId, amount: i64) -> StoreResult<Option<i64>> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        if account.bonus_granted {
            return Ok(None);
        }
        account.bonus_granted = true;
        account.prepaid_balance += amount;
        account.updated_at = OffsetDateTime::now_utc();
        Ok(Some(account.prepaid_balance))
    }

    async fn commit_rollover(
        &self,
        id: AccountId,
        expected_anchor: OffsetDateTime,
        new_anchor: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        if account.cycle_anchor != expected_anchor {
            return Ok(false);
        }
        account.cycle_anchor = new_anchor;
        account.monthly_used = 0;
        account.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn set_plan(&self, id: AccountId, plan: Plan, allowance: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.plan = plan;
        account.monthly_allowance = allowance;
        account.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list_account_ids(&self) -> StoreResult<Vec<AccountId>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.keys().copied().collect())
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.ledger.push(entry.clone());
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        id: AccountId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<LedgerEntry> = inner
            .ledger
            .iter()
            .filter(|e| e.account_id == id)
            .cloned()
            .collect();
        entries.reverse();
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn insert_topup_receipt(&self, receipt: &TopupReceipt) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner
            .receipts
            .contains_key(&receipt.external_transaction_id)
        {
            return Ok(false);
        }
        inner
            .receipts
            .insert(receipt.external_transaction_id.clone(), receipt.clone());
        Ok(true)
    }

    async fn delete_topup_receipt(&self, external_transaction_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.receipts.remove(external_transaction_id);
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .operations
            .insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn get_operation(&self, id: &str) -> StoreResult<Operation> {
        let inner = self.inner.read().await;
        inner
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::OperationNotFound(id.to_string()))
    }

    async fn insert_run_record(&self, record: &RunRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.runs.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Plan;

    async fn seeded_account(store: &MemoryStore, balance: i64, allowance: i64) -> AccountId {
        let mut account = Account::new(Plan::Pro, OffsetDateTime::now_utc());
        account.prepaid_balance = balance;
        account.monthly_allowance = allowance;
        store.insert_account(&account).await.unwrap();
        account.id
    }

    #[tokio::test]
    async fn test_charge_respects_balance_predicate() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 10, 100).await;

        assert_eq!(store.charge_if_covered(id, 7).await.unwrap(), Some(3));
        // 4 > remaining 3
        assert_eq!(store.charge_if_covered(id, 4).await.unwrap(), None);
        assert_eq!(store.charge_if_covered(id, 3).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_charge_respects_quota_predicate() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 1_000, 5).await;

        assert_eq!(store.charge_if_covered(id, 5).await.unwrap(), Some(995));
        // Plenty of balance, but the allowance is spent
        assert_eq!(store.charge_if_covered(id, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refund_floors_monthly_used_at_zero() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 100, 100).await;

        store.charge_if_covered(id, 10).await.unwrap();
        store.apply_refund(id, 25).await.unwrap();

        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.prepaid_balance, 115);
        assert_eq!(account.monthly_used, 0);
    }

    #[tokio::test]
    async fn test_bonus_granted_exactly_once() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 0, 100).await;

        assert_eq!(store.grant_bonus_once(id, 50).await.unwrap(), Some(50));
        assert_eq!(store.grant_bonus_once(id, 50).await.unwrap(), None);
        assert_eq!(store.get_account(id).await.unwrap().prepaid_balance, 50);
    }

    #[tokio::test]
    async fn test_rollover_commit_is_conditional_on_anchor() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 0, 100).await;
        let account = store.get_account(id).await.unwrap();
        let stale = account.cycle_anchor - time::Duration::days(30);
        let next = account.cycle_anchor + time::Duration::days(30);

        assert!(!store.commit_rollover(id, stale, next).await.unwrap());
        assert!(store
            .commit_rollover(id, account.cycle_anchor, next)
            .await
            .unwrap());
        assert_eq!(store.get_account(id).await.unwrap().cycle_anchor, next);
    }

    #[tokio::test]
    async fn test_topup_receipt_dedupes() {
        let store = MemoryStore::new();
        let id = seeded_account(&store, 0, 100).await;
        let receipt = TopupReceipt {
            external_transaction_id: "evt_123".into(),
            account_id: id,
            amount: 500,
            processed_at: OffsetDateTime::now_utc(),
        };

        assert!(store.insert_topup_receipt(&receipt).await.unwrap());
        assert!(!store.insert_topup_receipt(&receipt).await.unwrap());

        store.delete_topup_receipt("evt_123").await.unwrap();
        assert!(store.insert_topup_receipt(&receipt).await.unwrap());
    }
}
