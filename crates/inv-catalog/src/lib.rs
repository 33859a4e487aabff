//! Catalog reference-data refresh worker (C7): staleness-driven enqueue plus
//! a priority-ordered drain loop that keeps `reference_parts`/`colors`/
//! `categories`/`part_colors`/`part_prices` from going stale, and a
//! webhook-triggered fast path for single-row refreshes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use inv_provider::{AdapterError, ProviderAdapter, ReferenceEntity, ReferenceKind};
use inv_schemas::{CatalogPriority, CatalogRefreshMessage, CatalogTableName, Condition};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Reference-data fetches aren't scoped to a tenant, but the rate limiter's
/// bucket key is `(tenant_id, provider)` — this nil UUID is the conventional
/// "system" tenant used only for catalog refresh acquisition/reporting.
pub const CATALOG_SYSTEM_TENANT: Uuid = Uuid::nil();

pub const DEFAULT_STALE_THRESHOLD_DAYS: i64 = 30;
pub const DEFAULT_GC_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
pub struct CatalogConfig {
    pub batch_size: i64,
    pub stale_threshold_days: i64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_cap_ms: u64,
    pub rate_limit_capacity: i32,
    pub rate_limit_window_ms: i64,
    pub poll_interval_secs: u64,
}

impl CatalogConfig {
    /// Cron-every-5-min, batch-of-10, yielding <= 120 upstream fetches/hour.
    pub fn defaults() -> Self {
        Self {
            batch_size: 10,
            stale_threshold_days: DEFAULT_STALE_THRESHOLD_DAYS,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 5 * 60 * 1_000,
            backoff_jitter_cap_ms: 5_000,
            rate_limit_capacity: 5,
            rate_limit_window_ms: 1_000,
            poll_interval_secs: 5 * 60,
        }
    }
}

fn default_priority(table: CatalogTableName) -> CatalogPriority {
    match table {
        CatalogTableName::Category => CatalogPriority::Low,
        _ => CatalogPriority::Medium,
    }
}

fn to_reference_kind(table: CatalogTableName) -> ReferenceKind {
    match table {
        CatalogTableName::Part => ReferenceKind::Part,
        CatalogTableName::PartColor => ReferenceKind::PartColor,
        CatalogTableName::PriceGuide => ReferenceKind::PriceGuide,
        CatalogTableName::Color => ReferenceKind::Color,
        CatalogTableName::Category => ReferenceKind::Category,
    }
}

fn condition_to_str(c: Condition) -> &'static str {
    match c {
        Condition::New => "new",
        Condition::Used => "used",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogBatchReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed_permanent: usize,
    pub errors: usize,
}

pub struct CatalogWorker {
    pool: PgPool,
    source: Arc<dyn ProviderAdapter>,
    config: CatalogConfig,
}

impl CatalogWorker {
    pub fn new(pool: PgPool, source: Arc<dyn ProviderAdapter>, config: CatalogConfig) -> Self {
        Self {
            pool,
            source,
            config,
        }
    }

    /// `checkAndEnqueue`: enqueues a refresh only if the hint is missing or
    /// stale and no non-terminal row already covers the same key triple (the
    /// partial unique index makes the second condition free).
    pub async fn check_and_enqueue(
        &self,
        table_name: CatalogTableName,
        primary_key: &str,
        secondary_key: Option<&str>,
        last_fetched_hint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<CatalogRefreshMessage>> {
        if !inv_db::catalog::is_stale(last_fetched_hint, now, self.config.stale_threshold_days) {
            return Ok(None);
        }
        inv_db::catalog::enqueue(
            &self.pool,
            table_name,
            primary_key,
            secondary_key,
            default_priority(table_name),
            last_fetched_hint,
            now,
        )
        .await
        .context("check_and_enqueue failed")
    }

    /// Webhook-triggered refresh: always enqueues HIGH priority regardless of
    /// staleness, then synchronously attempts a single-message drain so the
    /// notification is responsive rather than waiting for the next cron tick.
    pub async fn webhook_triggered_refresh(
        &self,
        table_name: CatalogTableName,
        primary_key: &str,
        secondary_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let message = inv_db::catalog::enqueue(
            &self.pool,
            table_name,
            primary_key,
            secondary_key,
            CatalogPriority::High,
            None,
            now,
        )
        .await
        .context("webhook_triggered_refresh enqueue failed")?;

        if let Some(message) = message {
            // The single-message claim reuses claim_batch with batch_size=1;
            // priority=high plus next_attempt_at=now guarantees it's first.
            let claimed = inv_db::catalog::claim_batch(&self.pool, 1, now).await?;
            if let Some(claimed_message) = claimed.into_iter().find(|m| m.message_id == message.message_id) {
                self.process_message(claimed_message, now).await?;
            }
        }
        Ok(())
    }

    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<CatalogBatchReport> {
        let claimed = inv_db::catalog::claim_batch(&self.pool, self.config.batch_size, now)
            .await
            .context("catalog drain_once claim_batch failed")?;

        let mut report = CatalogBatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for message in claimed {
            let message_id = message.message_id;
            match self.process_message(message, now).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.rescheduled += 1,
                Err(err) => {
                    tracing::error!(%message_id, error = %err, "catalog worker failed to process refresh message");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn run_forever(&self) -> ! {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.poll_interval_secs,
        ));
        loop {
            ticker.tick().await;
            let now = Utc::now();
            match self.drain_once(now).await {
                Ok(report) => {
                    if report.claimed > 0 {
                        tracing::info!(
                            claimed = report.claimed,
                            succeeded = report.succeeded,
                            rescheduled = report.rescheduled,
                            errors = report.errors,
                            "catalog refresh batch complete"
                        );
                    }
                }
                Err(err) => tracing::error!(error = %err, "catalog refresh batch failed"),
            }
        }
    }

    /// Returns `Ok(true)` on success, `Ok(false)` if rescheduled or
    /// terminally failed after exhausting retries.
    async fn process_message(&self, message: CatalogRefreshMessage, now: DateTime<Utc>) -> Result<bool> {
        let mut bucket = inv_db::ratelimit_store::load_or_init_bucket(
            &self.pool,
            CATALOG_SYSTEM_TENANT,
            self.source.provider(),
            self.config.rate_limit_capacity,
            self.config.rate_limit_window_ms,
            now,
        )
        .await
        .context("catalog load_or_init_bucket failed")?;

        let acquire = inv_ratelimit::try_acquire(&mut bucket, now);
        inv_db::ratelimit_store::save_bucket(&self.pool, &bucket).await?;

        let retry_after_ms = match acquire {
            inv_ratelimit::AcquireOutcome::Granted => None,
            inv_ratelimit::AcquireOutcome::Denied { retry_after_ms } => Some(retry_after_ms),
        };
        if let Some(retry_after_ms) = retry_after_ms {
            let jitter = inv_clock::jitter_ms(self.config.backoff_jitter_cap_ms);
            let next_attempt_at =
                now + ChronoDuration::milliseconds(retry_after_ms as i64 + jitter as i64);
            let mut conn = self.pool.acquire().await?;
            sqlx::query(
                "update catalog_refresh_outbox set status = 'pending', next_attempt_at = $2 where message_id = $1",
            )
            .bind(message.message_id)
            .bind(next_attempt_at)
            .execute(&mut *conn)
            .await
            .context("catalog rate-limit revert failed")?;
            return Ok(false);
        }

        let kind = to_reference_kind(message.table_name);
        let result = self
            .source
            .fetch_reference(kind, &message.primary_key, message.secondary_key.as_deref())
            .await;

        let call_outcome = match &result {
            Ok(_) => inv_ratelimit::CallOutcome::Ok,
            Err(AdapterError::RateLimited) | Err(AdapterError::Transient(_)) => {
                inv_ratelimit::CallOutcome::TransientFail
            }
            Err(_) => inv_ratelimit::CallOutcome::PermanentFail,
        };
        inv_ratelimit::report(&mut bucket, call_outcome, now);
        inv_db::ratelimit_store::save_bucket(&self.pool, &bucket).await?;

        match result {
            Ok(entity) => {
                self.upsert_entity(&entity, now).await?;
                inv_db::catalog::mark_succeeded(&self.pool, message.message_id).await?;
                Ok(true)
            }
            Err(err) => {
                let mut conn = self.pool.acquire().await.context("acquire conn for catalog reschedule failed")?;
                let attempt_for_backoff = message.attempt as u32 + 1;
                let backoff_ms = inv_clock::backoff_with_jitter(
                    attempt_for_backoff,
                    self.config.backoff_base_ms,
                    self.config.backoff_cap_ms,
                    self.config.backoff_jitter_cap_ms,
                );
                let next_attempt_at = now + ChronoDuration::milliseconds(backoff_ms as i64);
                let status = inv_db::catalog::reschedule_or_fail(
                    &mut conn,
                    message.message_id,
                    self.config.max_attempts,
                    next_attempt_at,
                    &err.to_string(),
                )
                .await
                .context("catalog reschedule_or_fail failed")?;
                let _ = status;
                Ok(false)
            }
        }
    }

    async fn upsert_entity(&self, entity: &ReferenceEntity, now: DateTime<Utc>) -> Result<()> {
        match entity {
            ReferenceEntity::Part(p) => {
                inv_db::catalog::upsert_part(&self.pool, &p.part_number, &p.name, &p.category_id, now).await
            }
            ReferenceEntity::Color(c) => {
                inv_db::catalog::upsert_color(&self.pool, &c.color_id, &c.name, now).await
            }
            ReferenceEntity::Category(cat) => {
                inv_db::catalog::upsert_category(&self.pool, &cat.category_id, &cat.name, now).await
            }
            ReferenceEntity::PartColor(pc) => {
                inv_db::catalog::upsert_part_color(&self.pool, &pc.part_number, &pc.color_id, now).await
            }
            ReferenceEntity::PartPrice(pp) => {
                inv_db::catalog::upsert_part_price(
                    &self.pool,
                    &pp.part_number,
                    &pp.color_id,
                    condition_to_str(pp.condition),
                    pp.stock,
                    pp.avg_price_micros,
                    now,
                )
                .await
            }
        }
    }
}

/// GC terminal rows from both outboxes older than `retention_days`, wired to
/// `inv_db::gc_terminal_outbox_rows`. Exposed here so the daemon scheduler
/// can run catalog + marketplace GC with the same retention constant.
pub async fn gc_terminal_rows(pool: &PgPool, retention_days: i64) -> Result<inv_db::GcSummary> {
    inv_db::gc_terminal_outbox_rows(pool, retention_days).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_is_low_for_categories_medium_otherwise() {
        assert_eq!(default_priority(CatalogTableName::Category), CatalogPriority::Low);
        assert_eq!(default_priority(CatalogTableName::Part), CatalogPriority::Medium);
        assert_eq!(default_priority(CatalogTableName::Color), CatalogPriority::Medium);
        assert_eq!(default_priority(CatalogTableName::PartColor), CatalogPriority::Medium);
        assert_eq!(default_priority(CatalogTableName::PriceGuide), CatalogPriority::Medium);
    }

    #[test]
    fn reference_kind_mapping_round_trips_table_names() {
        assert!(matches!(to_reference_kind(CatalogTableName::Part), ReferenceKind::Part));
        assert!(matches!(to_reference_kind(CatalogTableName::Color), ReferenceKind::Color));
        assert!(matches!(
            to_reference_kind(CatalogTableName::Category),
            ReferenceKind::Category
        ));
        assert!(matches!(
            to_reference_kind(CatalogTableName::PartColor),
            ReferenceKind::PartColor
        ));
        assert!(matches!(
            to_reference_kind(CatalogTableName::PriceGuide),
            ReferenceKind::PriceGuide
        ));
    }

    #[test]
    fn condition_to_str_matches_item_module_convention() {
        assert_eq!(condition_to_str(Condition::New), "new");
        assert_eq!(condition_to_str(Condition::Used), "used");
    }
}
