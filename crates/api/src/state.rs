//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;
use tollgate_billing::{Ledger, RateLimiter, TopupRecorder};

use crate::auth::CredentialResolver;
use crate::config::Config;
use crate::gateway::ExecutionGateway;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledger: Ledger,
    pub topups: TopupRecorder,
    pub gateway: Arc<ExecutionGateway>,
    pub credentials: Arc<dyn CredentialResolver>,
    /// Bounds unauthenticated traffic, checked before credential resolution
    pub ip_limiter: RateLimiter,
    /// Per-credential limiter, checked after resolution
    pub key_limiter: RateLimiter,
    /// Present when backed by Postgres; health checks ping it
    pub pool: Option<PgPool>,
}
