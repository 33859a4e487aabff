//! Shared runtime state for inv-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::collections::HashMap;
use std::sync::Arc;

use inv_provider::ProviderAdapter;
use inv_provider_a::ProviderAAdapter;
use inv_provider_b::ProviderBAdapter;
use inv_schemas::Provider;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers and background
/// workers.
pub struct AppState {
    pub pool: PgPool,
    pub adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    /// The single upstream reference-data source catalog refreshes fetch
    /// from (see `inv_catalog::CatalogWorker`'s `source` field) — modeled
    /// here as Provider B's live reqwest-backed client, since reference data
    /// comes from one real upstream catalog API rather than per-provider.
    pub catalog_source: Arc<dyn ProviderAdapter>,
    pub config: inv_config::Config,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, config: inv_config::Config) -> Self {
        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(Provider::A, Arc::new(ProviderAAdapter::new()));

        let base_url = std::env::var("INV_PROVIDER_B_BASE_URL")
            .unwrap_or_else(|_| "https://api.provider-b.example".to_string());
        let api_key = config
            .provider_credentials
            .get("b")
            .map(|c| c.api_key.clone())
            .unwrap_or_default();
        let provider_b: Arc<dyn ProviderAdapter> =
            Arc::new(ProviderBAdapter::new(base_url, api_key));
        adapters.insert(Provider::B, provider_b.clone());

        Self {
            pool,
            adapters,
            catalog_source: provider_b,
            config,
            build: BuildInfo {
                service: "inv-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn drain_config(&self) -> inv_drain::DrainConfig {
        let mut cfg = inv_drain::DrainConfig::defaults();
        cfg.batch_size = self.config.outbox_batch_size as i64;
        cfg.max_attempts = self.config.max_attempts;
        cfg.backoff_base_ms = self.config.backoff_base_ms;
        cfg.backoff_cap_ms = self.config.backoff_cap_ms;
        if let Some(rl) = self.config.rate_limits.get("a") {
            cfg.rate_limit_capacity = rl.capacity;
            cfg.rate_limit_window_ms = rl.window_ms;
        }
        cfg
    }

    pub fn catalog_config(&self) -> inv_catalog::CatalogConfig {
        let mut cfg = inv_catalog::CatalogConfig::defaults();
        cfg.stale_threshold_days = self.config.stale_threshold_days;
        cfg.max_attempts = self.config.max_attempts;
        cfg.backoff_base_ms = self.config.backoff_base_ms;
        cfg.backoff_cap_ms = self.config.backoff_cap_ms;
        cfg
    }
}
