//! Background worker wiring: the marketplace drain loop, the catalog
//! refresh loop, a webhook polling-fallback tick, and the terminal-row GC
//! sweep. Each runs as its own spawned task against a clone of the shared
//! pool/config — mirrors `mqk-daemon/src/state.rs`'s `spawn_heartbeat`
//! shape (one `tokio::spawn` per independent background concern).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use inv_catalog::CatalogWorker;
use inv_drain::DrainWorker;
use tracing::{error, info};

use crate::state::AppState;

/// Polling fallback interval for missed webhook deliveries (spec.md §6:
/// "every 3 minutes per tenant"). Reference data isn't tenant-scoped in this
/// schema (see `inv_catalog::CATALOG_SYSTEM_TENANT`), so this is
/// implemented as one global tick rather than one per tenant: it simply
/// drains the catalog queue early so a HIGH-priority row a missed webhook
/// would have enqueued doesn't wait for the full 5-minute cron interval.
const WEBHOOK_POLL_FALLBACK_SECS: u64 = 180;

const GC_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub fn spawn_background_workers(state: Arc<AppState>) {
    let drain = Arc::new(DrainWorker::new(
        state.pool.clone(),
        state.adapters.clone(),
        state.drain_config(),
    ));
    {
        let drain = drain.clone();
        tokio::spawn(async move { drain.run_forever().await });
    }

    let catalog = Arc::new(CatalogWorker::new(
        state.pool.clone(),
        state.catalog_source.clone(),
        state.catalog_config(),
    ));
    {
        let catalog = catalog.clone();
        tokio::spawn(async move { catalog.run_forever().await });
    }

    {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(WEBHOOK_POLL_FALLBACK_SECS));
            loop {
                ticker.tick().await;
                if let Err(err) = catalog.drain_once(Utc::now()).await {
                    error!(error = %err, "webhook polling fallback drain failed");
                }
            }
        });
    }

    {
        let pool = state.pool.clone();
        let retention_days = inv_catalog::DEFAULT_GC_RETENTION_DAYS;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(GC_SWEEP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                match inv_catalog::gc_terminal_rows(&pool, retention_days).await {
                    Ok(summary) => info!(
                        marketplace_outbox_deleted = summary.marketplace_outbox_deleted,
                        catalog_outbox_deleted = summary.catalog_outbox_deleted,
                        "gc sweep complete"
                    ),
                    Err(err) => error!(error = %err, "gc sweep failed"),
                }
            }
        });
    }
}
