//! TollGate background worker
//!
//! Runs the proactive billing-cycle sweep on a schedule. Rollovers are lazy
//! on every charge and balance read, so this worker is not required for
//! correctness; it only resets dormant accounts ahead of their next touch.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tollgate_billing::BillingCycleManager;
use tollgate_shared::{PgStore, Store};
use tracing_subscriber::EnvFilter;

/// Default: every 15 minutes
const DEFAULT_SWEEP_SCHEDULE: &str = "0 */15 * * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);
    let schedule =
        env::var("SWEEP_SCHEDULE").unwrap_or_else(|_| DEFAULT_SWEEP_SCHEDULE.to_string());

    let pool = tollgate_shared::create_pool(&database_url, max_connections)
        .await
        .context("failed to connect to database")?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let cycles = Arc::new(BillingCycleManager::new(store));

    let scheduler = JobScheduler::new().await?;
    let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
        let cycles = cycles.clone();
        Box::pin(async move {
            match cycles.sweep_due_accounts().await {
                Ok(reset_count) => {
                    tracing::info!(reset_count, "Billing cycle sweep finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Billing cycle sweep failed");
                }
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(schedule = %schedule, "TollGate worker started");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
