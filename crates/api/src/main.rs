//! TollGate API server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tollgate_api::auth::MemoryCredentialResolver;
use tollgate_api::gateway::backend::HttpBackend;
use tollgate_api::gateway::ExecutionGateway;
use tollgate_api::routes::create_router;
use tollgate_api::{AppState, Config};
use tollgate_billing::{Ledger, RateLimiter, TopupRecorder};
use tollgate_shared::{MemoryStore, PgStore, Plan, Store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let (store, pool): (Arc<dyn Store>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            let pool = tollgate_shared::create_pool(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            tollgate_shared::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            (Arc::new(PgStore::new(pool.clone())), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let ledger = Ledger::new(store.clone());
    let topups = TopupRecorder::new(store.clone(), ledger.clone());
    let backend = Arc::new(HttpBackend::new(config.backend_timeout_ms));
    let gateway = Arc::new(ExecutionGateway::new(
        store.clone(),
        ledger.clone(),
        backend,
        config.max_input_bytes,
        config.backend_timeout_ms,
    ));

    let credentials = Arc::new(MemoryCredentialResolver::new());
    if let Ok(dev_key) = std::env::var("DEV_API_KEY") {
        let account = ledger
            .open_account(Plan::Free)
            .await
            .context("failed to open dev account")?;
        credentials.register_key(&dev_key, account.id).await;
        tracing::info!(account_id = %account.id, "Registered DEV_API_KEY for a fresh account");
    }

    let ip_limiter = RateLimiter::new();
    let key_limiter = RateLimiter::new();
    spawn_limiter_cleanup(ip_limiter.clone(), key_limiter.clone());

    let state = AppState {
        config: config.clone(),
        ledger,
        topups,
        gateway,
        credentials,
        ip_limiter,
        key_limiter,
        pool,
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "TollGate API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drop stale rate-limit windows every few minutes
fn spawn_limiter_cleanup(ip_limiter: RateLimiter, key_limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            ip_limiter.cleanup().await;
            key_limiter.cleanup().await;
        }
    });
}
