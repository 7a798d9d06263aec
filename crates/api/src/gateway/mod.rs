//! Execution gateway
//!
//! Runs one billed operation end to end: normalize and validate the input,
//! render the instruction template, reserve the operation's worst-case cost,
//! call the target chain with transient-failure fallback, reconcile the true
//! cost, and write a run record. The caller only ever sees the request id,
//! the output, and the credits charged; target identity stays inside.
//!
//! Per-request state machine:
//! `PENDING -> RESERVED -> CALLING(target_i) -> {CALLING(target_i+1) | SUCCESS | FAILED}`
//!
//! Reservation and refund are two independent atomic ledger operations; no
//! lock is held across the backend call, so `monthly_used` briefly reflects
//! the full reservation until reconciliation lands.

pub mod backend;
pub mod input;
pub mod template;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use time::OffsetDateTime;
use tollgate_shared::{AccountId, ExecutionTarget, Operation, RunRecord, RunStatus, Store};
use uuid::Uuid;

use crate::error::ApiError;
use crate::redaction::RedactionFilter;
use tollgate_billing::Ledger;

use backend::{BackendError, BackendResponse, ExecutionBackend};

/// Successful execution result, already redacted
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub request_id: Uuid,
    pub output: String,
    pub credits_charged: i64,
    /// Reported backend usage, when the serving target reported any
    pub tokens: Option<i64>,
    pub latency_ms: i64,
}

/// Failure with the request id minted for this request, for response
/// correlation
#[derive(Debug)]
pub struct GatewayError {
    pub request_id: Uuid,
    pub error: ApiError,
}

impl GatewayError {
    fn new(request_id: Uuid, error: ApiError) -> Self {
        Self { request_id, error }
    }
}

pub struct ExecutionGateway {
    store: Arc<dyn Store>,
    ledger: Ledger,
    backend: Arc<dyn ExecutionBackend>,
    max_input_bytes: usize,
    call_timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Ledger,
        backend: Arc<dyn ExecutionBackend>,
        max_input_bytes: usize,
        backend_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            ledger,
            backend,
            max_input_bytes,
            call_timeout: Duration::from_millis(backend_timeout_ms),
        }
    }

    pub async fn execute(
        &self,
        account_id: AccountId,
        operation_id: &str,
        raw_input: &Value,
    ) -> Result<ExecutionOutcome, GatewayError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let fail = |error: ApiError| GatewayError::new(request_id, error);

        let input_size = serde_json::to_string(raw_input)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        if input_size > self.max_input_bytes {
            return Err(fail(ApiError::RequestTooLarge));
        }

        let operation = self
            .store
            .get_operation(operation_id)
            .await
            .map_err(|e| fail(e.into()))?;
        let filter = RedactionFilter::for_targets(&operation.targets);

        let vars = input::normalize(raw_input, &operation.input_schema)
            .and_then(|vars| {
                input::validate(&Value::Object(vars.clone()), &operation.input_schema)
                    .map(|()| vars)
            })
            .map_err(|v| {
                fail(ApiError::Validation {
                    path: v.path,
                    message: v.message,
                })
            })?;
        let prompt = template::render(&operation.template, &vars);

        let targets = operation.resolved_targets();
        if targets.is_empty() {
            tracing::error!(operation_id, "Operation has no execution targets");
            return Err(fail(ApiError::Internal));
        }

        // Reserve the worst case before any backend work
        let reservation = operation.max_cost_credits;
        self.ledger
            .charge(
                account_id,
                reservation,
                &format!("reservation for {}", operation.id),
                Some(request_id.to_string()),
            )
            .await
            .map_err(|e| fail(e.into()))?;

        match self.call_with_fallback(&targets, &prompt).await {
            Ok((response, served_by)) => {
                let cost = reconciled_cost(&operation, response.work_units).min(reservation);
                let excess = reservation - cost;
                if excess > 0 {
                    if let Err(e) = self
                        .ledger
                        .refund(
                            account_id,
                            excess,
                            "reservation reconciliation",
                            Some(request_id.to_string()),
                        )
                        .await
                    {
                        tracing::error!(
                            account_id = %account_id,
                            request_id = %request_id,
                            error = %e,
                            "Reconciliation refund failed, account overcharged"
                        );
                    }
                }

                let latency_ms = started.elapsed().as_millis() as i64;
                self.write_run_record(RunRecord {
                    request_id,
                    account_id,
                    operation_id: operation.id.clone(),
                    status: RunStatus::Success,
                    status_code: 200,
                    latency_ms,
                    resolved_target_id: Some(served_by),
                    sanitized_error: None,
                    created_at: OffsetDateTime::now_utc(),
                })
                .await;

                tracing::info!(
                    account_id = %account_id,
                    request_id = %request_id,
                    operation_id = %operation.id,
                    credits_charged = cost,
                    latency_ms,
                    "Operation executed"
                );

                Ok(ExecutionOutcome {
                    request_id,
                    output: filter.redact(&response.output),
                    credits_charged: cost,
                    tokens: response.work_units,
                    latency_ms,
                })
            }
            Err(last_error) => {
                // Terminal failure: the full reservation goes back
                if let Err(e) = self
                    .ledger
                    .refund(
                        account_id,
                        reservation,
                        "execution failed",
                        Some(request_id.to_string()),
                    )
                    .await
                {
                    tracing::error!(
                        account_id = %account_id,
                        request_id = %request_id,
                        error = %e,
                        "Failed to refund reservation after execution failure"
                    );
                }

                let sanitized = filter.redact(&last_error.to_string());
                let latency_ms = started.elapsed().as_millis() as i64;
                tracing::warn!(
                    account_id = %account_id,
                    request_id = %request_id,
                    operation_id = %operation.id,
                    error = %sanitized,
                    "Operation failed on all targets"
                );

                self.write_run_record(RunRecord {
                    request_id,
                    account_id,
                    operation_id: operation.id.clone(),
                    status: RunStatus::Failed,
                    status_code: 502,
                    latency_ms,
                    resolved_target_id: None,
                    sanitized_error: Some(sanitized),
                    created_at: OffsetDateTime::now_utc(),
                })
                .await;

                Err(fail(ApiError::Upstream))
            }
        }
    }

    /// Walk the target chain. Transient failures move on to the next
    /// target; a fatal failure or an exhausted chain aborts with the last
    /// error.
    async fn call_with_fallback(
        &self,
        targets: &[ExecutionTarget],
        prompt: &str,
    ) -> Result<(BackendResponse, String), BackendError> {
        let mut last_error = BackendError::Connect("no target attempted".to_string());

        for (index, target) in targets.iter().enumerate() {
            let call = self.backend.invoke(target, prompt);
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            };

            match result {
                Ok(response) => return Ok((response, target.id.clone())),
                Err(e) if e.is_transient() && index + 1 < targets.len() => {
                    tracing::warn!(
                        target_index = index,
                        error = %e,
                        "Transient target failure, trying next target"
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn write_run_record(&self, record: RunRecord) {
        if let Err(e) = self.store.insert_run_record(&record).await {
            tracing::error!(
                request_id = %record.request_id,
                error = %e,
                "Failed to write run record"
            );
        }
    }
}

/// True cost from reported usage: `max(min_cost, ceil(units / per_credit))`
fn reconciled_cost(operation: &Operation, work_units: Option<i64>) -> i64 {
    let per_credit = operation.work_units_per_credit.max(1);
    // work_units comes off the wire, so the ceiling add must not overflow
    let from_usage = match work_units {
        Some(units) if units > 0 => units.saturating_add(per_credit - 1) / per_credit,
        _ => 0,
    };
    from_usage.max(operation.min_cost_credits)
}
