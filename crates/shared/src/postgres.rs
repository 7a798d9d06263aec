//! Postgres-backed store.
//!
//! Each conditional mutation is a single `UPDATE ... WHERE <predicate>`
//! statement; the predicate is evaluated by the database at the moment of
//! the write, so concurrent spenders on the same account serialize on the
//! row instead of racing a read-then-write pair.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::types::{
    Account, AccountId, LedgerEntry, Operation, Plan, RoutingMode, RunRecord, TopupReceipt,
};

/// Durable implementation of [`Store`] over a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, prepaid_balance, monthly_allowance, monthly_used,
                cycle_anchor, plan, bonus_granted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.id)
        .bind(account.prepaid_balance)
        .bind(account.monthly_allowance)
        .bind(account.monthly_used)
        .bind(account.cycle_anchor)
        .bind(account.plan)
        .bind(account.bonus_granted)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Account> {
        let account: Option<Account> = sqlx::query_as(
            r#"
            SELECT id, prepaid_balance, monthly_allowance, monthly_used,
                   cycle_anchor, plan, bonus_granted, created_at, updated_at
            FROM accounts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or(StoreError::AccountNotFound(id))
    }

    async fn charge_if_covered(&self, id: AccountId, cost: i64) -> StoreResult<Option<i64>> {
        // Predicate and write in one statement; no row means the predicate
        // failed (or the account does not exist, which the caller's
        // diagnostic re-read distinguishes).
        let new_balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET prepaid_balance = prepaid_balance - $2,
                monthly_used = monthly_used + $2,
                updated_at = NOW()
            WHERE id = $1
              AND prepaid_balance >= $2
              AND monthly_used + $2 <= monthly_allowance
            RETURNING prepaid_balance
            "#,
        )
        .bind(id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await?;

        Ok(new_balance.map(|(b,)| b))
    }

    async fn credit(&self, id: AccountId, amount: i64) -> StoreResult<i64> {
        let new_balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET prepaid_balance = prepaid_balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING prepaid_balance
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        new_balance
            .map(|(b,)| b)
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn apply_refund(&self, id: AccountId, amount: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET prepaid_balance = prepaid_balance + $2,
                monthly_used = GREATEST(monthly_used - $2, 0),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    async fn grant_bonus_once(&self, id: AccountId, amount: i64) -> StoreResult<Option<i64>> {
        let new_balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET bonus_granted = true,
                prepaid_balance = prepaid_balance + $2,
                updated_at = NOW()
            WHERE id = $1 AND bonus_granted = false
            RETURNING prepaid_balance
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        Ok(new_balance.map(|(b,)| b))
    }

    async fn commit_rollover(
        &self,
        id: AccountId,
        expected_anchor: OffsetDateTime,
        new_anchor: OffsetDateTime,
    ) -> StoreResult<bool> {
        // Losing a race here is fine: the winner already advanced the anchor
        // and zeroed the counter, the caller re-reads.
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET cycle_anchor = $3, monthly_used = 0, updated_at = NOW()
            WHERE id = $1 AND cycle_anchor = $2
            "#,
        )
        .bind(id)
        .bind(expected_anchor)
        .bind(new_anchor)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_plan(&self, id: AccountId, plan: Plan, allowance: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET plan = $2, monthly_allowance = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(plan)
        .bind(allowance)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    async fn list_account_ids(&self) -> StoreResult<Vec<AccountId>> {
        let rows: Vec<(AccountId,)> = sqlx::query_as("SELECT id FROM accounts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, account_id, kind, amount, reason, correlation_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(&entry.reason)
        .bind(&entry.correlation_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        id: AccountId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let entries: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, account_id, kind, amount, reason, correlation_id, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn insert_topup_receipt(&self, receipt: &TopupReceipt) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO topup_receipts (
                external_transaction_id, account_id, amount, processed_at
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_transaction_id) DO NOTHING
            "#,
        )
        .bind(&receipt.external_transaction_id)
        .bind(receipt.account_id)
        .bind(receipt.amount)
        .bind(receipt.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_topup_receipt(&self, external_transaction_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM topup_receipts WHERE external_transaction_id = $1")
            .bind(external_transaction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()> {
        let targets = serde_json::to_value(&operation.targets)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let routing = serde_json::to_value(operation.routing)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO operations (
                id, name, input_schema, template, routing, targets,
                max_cost_credits, min_cost_credits, work_units_per_credit
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                input_schema = EXCLUDED.input_schema,
                template = EXCLUDED.template,
                routing = EXCLUDED.routing,
                targets = EXCLUDED.targets,
                max_cost_credits = EXCLUDED.max_cost_credits,
                min_cost_credits = EXCLUDED.min_cost_credits,
                work_units_per_credit = EXCLUDED.work_units_per_credit
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.name)
        .bind(&operation.input_schema)
        .bind(&operation.template)
        .bind(routing)
        .bind(targets)
        .bind(operation.max_cost_credits)
        .bind(operation.min_cost_credits)
        .bind(operation.work_units_per_credit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_operation(&self, id: &str) -> StoreResult<Operation> {
        type OperationRow = (
            String,
            String,
            serde_json::Value,
            String,
            serde_json::Value,
            serde_json::Value,
            i64,
            i64,
            i64,
        );

        let row: Option<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, name, input_schema, template, routing, targets,
                   max_cost_credits, min_cost_credits, work_units_per_credit
            FROM operations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (
            id,
            name,
            input_schema,
            template,
            routing,
            targets,
            max_cost_credits,
            min_cost_credits,
            work_units_per_credit,
        ) = row.ok_or_else(|| StoreError::OperationNotFound(id.to_string()))?;

        let routing: RoutingMode = serde_json::from_value(routing)
            .map_err(|e| StoreError::Database(format!("invalid routing mode: {}", e)))?;
        let targets = serde_json::from_value(targets)
            .map_err(|e| StoreError::Database(format!("invalid target list: {}", e)))?;

        Ok(Operation {
            id,
            name,
            input_schema,
            template,
            routing,
            targets,
            max_cost_credits,
            min_cost_credits,
            work_units_per_credit,
        })
    }

    async fn insert_run_record(&self, record: &RunRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO run_records (
                request_id, account_id, operation_id, status, status_code,
                latency_ms, resolved_target_id, sanitized_error, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.request_id)
        .bind(record.account_id)
        .bind(&record.operation_id)
        .bind(record.status)
        .bind(record.status_code)
        .bind(record.latency_ms)
        .bind(&record.resolved_target_id)
        .bind(&record.sanitized_error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
