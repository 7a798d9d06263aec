//! Account balance and ledger history endpoints

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tollgate_shared::LedgerEntry;

use crate::error::ApiResult;
use crate::routes::execute::resolve_credential;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub ok: bool,
    pub prepaid_balance: i64,
    pub monthly_allowance: i64,
    pub monthly_used: i64,
    pub next_reset_at: String,
}

/// `GET /v1/account/balance`
///
/// The read itself lands any due monthly rollover, so a dormant account
/// sees fresh quota here without ever charging.
pub async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<BalanceResponse>> {
    let credential = resolve_credential(&state, &headers).await?;
    let snapshot = state.ledger.balance(credential.account_id).await?;

    Ok(Json(BalanceResponse {
        ok: true,
        prepaid_balance: snapshot.prepaid_balance,
        monthly_allowance: snapshot.monthly_allowance,
        monthly_used: snapshot.monthly_used,
        next_reset_at: snapshot
            .next_reset_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::new()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryView {
    pub kind: String,
    pub amount: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub ok: bool,
    pub entries: Vec<LedgerEntryView>,
}

/// `GET /v1/account/ledger?limit=N`
pub async fn get_ledger(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<LedgerResponse>> {
    let credential = resolve_credential(&state, &headers).await?;
    let limit = query.limit.clamp(1, 500);
    let entries = state.ledger.history(credential.account_id, limit).await?;

    Ok(Json(LedgerResponse {
        ok: true,
        entries: entries.iter().map(view_of).collect(),
    }))
}

fn view_of(entry: &LedgerEntry) -> LedgerEntryView {
    LedgerEntryView {
        kind: entry.kind.to_string(),
        amount: entry.amount,
        reason: entry.reason.clone(),
        correlation_id: entry.correlation_id.clone(),
        created_at: entry
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::new()),
    }
}
