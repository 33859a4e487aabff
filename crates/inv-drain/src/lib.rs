//! Marketplace outbox drain worker (C6): claims due outbox rows under the
//! CAS lease, gates each dispatch through the rate limiter, invokes the
//! configured `ProviderAdapter`, and advances the item's sync cursor on
//! success. Runs as a scheduled loop — see `run_forever` — but every step is
//! independently callable for tests.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use inv_provider::{AdapterError, CreateLotPayload, ProviderAdapter, UpdateDelta};
use inv_ratelimit::{AcquireOutcome, CallOutcome};
use inv_schemas::{
    InventoryItem, MarketplaceOutboxMessage, OutboxKind, OutboxStatus, Provider,
    ProviderSyncState, ProviderSyncStatus,
};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct DrainConfig {
    pub batch_size: i64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_cap_ms: u64,
    pub rate_limit_capacity: i32,
    pub rate_limit_window_ms: i64,
    pub poll_interval_secs: u64,
}

impl DrainConfig {
    pub fn defaults() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 5 * 60 * 1_000,
            backoff_jitter_cap_ms: 5_000,
            rate_limit_capacity: 5,
            rate_limit_window_ms: 1_000,
            poll_interval_secs: 30,
        }
    }
}

/// What the drain loop actually did with a claimed row. Not returned to the
/// caller directly — folded into `DrainBatchReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Succeeded,
    Rescheduled,
    FailedPermanent,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrainBatchReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed_permanent: usize,
    pub errors: usize,
}

impl DrainBatchReport {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Succeeded => self.succeeded += 1,
            MessageOutcome::Rescheduled => self.rescheduled += 1,
            MessageOutcome::FailedPermanent => self.failed_permanent += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectiveOp {
    Create,
    Update,
    Delete,
    /// `delete` requested but there was never an external lot — nothing to do.
    DeleteNoop,
}

/// Reconciles the outbox row's recorded intent against the item's current
/// external-mapping state, per the create/update downgrade-upgrade rule.
fn effective_operation(kind: OutboxKind, external_lot_id: Option<&str>) -> EffectiveOp {
    match (kind, external_lot_id) {
        (OutboxKind::Create, Some(_)) => EffectiveOp::Update,
        (OutboxKind::Update, None) => EffectiveOp::Create,
        (OutboxKind::Delete, None) => EffectiveOp::DeleteNoop,
        (OutboxKind::Create, None) => EffectiveOp::Create,
        (OutboxKind::Update, Some(_)) => EffectiveOp::Update,
        (OutboxKind::Delete, Some(_)) => EffectiveOp::Delete,
    }
}

fn build_create_payload(item: &InventoryItem) -> CreateLotPayload {
    CreateLotPayload {
        part_number: item.part_number.clone(),
        color_id: item.color_id.clone(),
        condition: item.condition,
        quantity_available: item.quantity_available,
        price_micros: item.price_micros,
        location: item.location.clone(),
    }
}

/// Provider A speaks signed deltas; Provider B defaults to a relative delta
/// (the spec allows an absolute encoding too, but the net-change delta is
/// always available and avoids a second read of `quantity_available`).
fn build_update_delta(provider: Provider, delta: i64) -> UpdateDelta {
    match provider {
        Provider::A => UpdateDelta::SignedDelta(delta),
        Provider::B => UpdateDelta::AbsoluteOrRelative {
            absolute_quantity: None,
            relative_quantity: Some(delta),
        },
    }
}

fn classify_call_outcome<T>(result: &Result<T, AdapterError>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Ok,
        Err(AdapterError::RateLimited) | Err(AdapterError::Transient(_)) => {
            CallOutcome::TransientFail
        }
        Err(AdapterError::PermanentValidation(_))
        | Err(AdapterError::MissingExternalMapping(_))
        | Err(AdapterError::NotFound) => CallOutcome::PermanentFail,
    }
}

fn is_permanent(err: &AdapterError) -> bool {
    matches!(
        err,
        AdapterError::PermanentValidation(_) | AdapterError::MissingExternalMapping(_) | AdapterError::NotFound
    )
}

pub struct DrainWorker {
    pool: PgPool,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    config: DrainConfig,
}

impl DrainWorker {
    pub fn new(
        pool: PgPool,
        adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
        config: DrainConfig,
    ) -> Self {
        Self {
            pool,
            adapters,
            config,
        }
    }

    /// Claim and process one batch. Individual message failures are logged
    /// and counted, never propagated — one bad row must not stall the batch.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DrainBatchReport> {
        let claimed = inv_db::outbox::claim_batch(&self.pool, self.config.batch_size, now)
            .await
            .context("drain_once claim_batch failed")?;

        let mut report = DrainBatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for message in claimed {
            let message_id = message.message_id;
            match self.process_message(message, now).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    tracing::error!(%message_id, error = %err, "drain worker failed to process outbox message");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run `drain_once` on a fixed interval until the process is killed.
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
                            failed_permanent = report.failed_permanent,
                            errors = report.errors,
                            "drain batch complete"
                        );
                    }
                }
                Err(err) => tracing::error!(error = %err, "drain batch failed"),
            }
        }
    }

    async fn process_message(
        &self,
        message: MarketplaceOutboxMessage,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome> {
        let delta = inv_db::ledger::compute_delta_window(
            &self.pool,
            message.item_id,
            message.from_seq_exclusive,
            message.to_seq_inclusive,
        )
        .await
        .context("compute_delta_window failed")?;

        let item = match inv_db::item::fetch_item(&self.pool, message.item_id).await? {
            Some(item) => item,
            None => {
                self.finalize_permanent_failure(&message, "item no longer exists", now)
                    .await?;
                return Ok(MessageOutcome::FailedPermanent);
            }
        };

        let sync_state = item
            .marketplace_sync
            .get(&message.provider)
            .cloned()
            .unwrap_or_else(ProviderSyncState::pending);

        let effective_op = effective_operation(message.kind, sync_state.external_lot_id.as_deref());
        if effective_op == EffectiveOp::DeleteNoop {
            self.finalize_success(&message, &item, now, None).await?;
            return Ok(MessageOutcome::Succeeded);
        }

        let mut bucket = inv_db::ratelimit_store::load_or_init_bucket(
            &self.pool,
            item.tenant_id,
            message.provider,
            self.config.rate_limit_capacity,
            self.config.rate_limit_window_ms,
            now,
        )
        .await
        .context("load_or_init_bucket failed")?;

        let acquire = inv_ratelimit::try_acquire(&mut bucket, now);
        inv_db::ratelimit_store::save_bucket(&self.pool, &bucket)
            .await
            .context("save_bucket after acquire failed")?;

        let retry_after_ms = match acquire {
            AcquireOutcome::Granted => None,
            AcquireOutcome::Denied { retry_after_ms } => Some(retry_after_ms),
        };
        if let Some(retry_after_ms) = retry_after_ms {
            let jitter = inv_clock::jitter_ms(self.config.backoff_jitter_cap_ms);
            let next_attempt_at =
                now + ChronoDuration::milliseconds(retry_after_ms as i64 + jitter as i64);
            inv_db::outbox::revert_to_pending_without_attempt(
                &self.pool,
                message.message_id,
                next_attempt_at,
            )
            .await
            .context("revert_to_pending_without_attempt failed")?;
            return Ok(MessageOutcome::Rescheduled);
        }

        let adapter = self
            .adapters
            .get(&message.provider)
            .with_context(|| format!("no adapter configured for provider {}", message.provider))?
            .clone();

        let idempotency_key = message.idempotency_key.clone();
        let call_result: Result<Option<String>, AdapterError> = match effective_op {
            EffectiveOp::Create => adapter
                .create_lot(item.tenant_id, build_create_payload(&item), &idempotency_key)
                .await
                .map(|r| Some(r.external_lot_id)),
            EffectiveOp::Update => {
                let external_lot_id = sync_state.external_lot_id.clone().unwrap_or_default();
                let delta_arg = build_update_delta(message.provider, delta);
                adapter
                    .update_lot(item.tenant_id, &external_lot_id, delta_arg, &idempotency_key)
                    .await
                    .map(|_| None)
            }
            EffectiveOp::Delete => {
                let external_lot_id = sync_state.external_lot_id.clone().unwrap_or_default();
                adapter
                    .delete_lot(item.tenant_id, &external_lot_id, &idempotency_key)
                    .await
                    .map(|_| None)
            }
            EffectiveOp::DeleteNoop => unreachable!("handled above"),
        };

        let call_outcome = classify_call_outcome(&call_result);
        inv_ratelimit::report(&mut bucket, call_outcome, now);
        inv_db::ratelimit_store::save_bucket(&self.pool, &bucket)
            .await
            .context("save_bucket after report failed")?;

        match call_result {
            Ok(external_lot_id) => {
                self.finalize_success(&message, &item, now, external_lot_id)
                    .await?;
                Ok(MessageOutcome::Succeeded)
            }
            Err(err) if is_permanent(&err) => {
                self.finalize_permanent_failure(&message, &err.to_string(), now)
                    .await?;
                Ok(MessageOutcome::FailedPermanent)
            }
            Err(err) => {
                let mut conn = self.pool.acquire().await.context("acquire conn for reschedule failed")?;
                let attempt_for_backoff = message.attempt as u32 + 1;
                let backoff_ms = inv_clock::backoff_with_jitter(
                    attempt_for_backoff,
                    self.config.backoff_base_ms,
                    self.config.backoff_cap_ms,
                    self.config.backoff_jitter_cap_ms,
                );
                let next_attempt_at = now + ChronoDuration::milliseconds(backoff_ms as i64);
                let status = inv_db::outbox::reschedule_or_fail(
                    &mut conn,
                    message.message_id,
                    self.config.max_attempts,
                    next_attempt_at,
                    &err.to_string(),
                )
                .await
                .context("reschedule_or_fail failed")?;
                drop(conn);

                if status == OutboxStatus::Failed {
                    self.mark_item_sync_failed(message.item_id, message.provider, &err.to_string(), now)
                        .await?;
                    Ok(MessageOutcome::FailedPermanent)
                } else {
                    Ok(MessageOutcome::Rescheduled)
                }
            }
        }
    }

    /// Marks the outbox row `succeeded` and advances the item's per-provider
    /// sync cursor, both in one transaction.
    async fn finalize_success(
        &self,
        message: &MarketplaceOutboxMessage,
        item: &InventoryItem,
        now: DateTime<Utc>,
        external_lot_id: Option<String>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let marked = inv_db::outbox::mark_succeeded(&mut *tx, message.message_id).await?;
        if !marked {
            tx.rollback().await.ok();
            return Ok(());
        }

        let post_available = inv_db::ledger::get_entry_at(&mut *tx, message.item_id, message.to_seq_inclusive)
            .await?
            .map(|e| e.post_available)
            .unwrap_or(item.quantity_available);

        let prev_state = item
            .marketplace_sync
            .get(&message.provider)
            .cloned()
            .unwrap_or_else(ProviderSyncState::pending);

        let next_state = ProviderSyncState {
            external_lot_id: external_lot_id.or(prev_state.external_lot_id),
            status: ProviderSyncStatus::Synced,
            last_sync_attempt_at: Some(now),
            last_synced_seq: message.to_seq_inclusive,
            last_synced_available: post_available,
            last_error: None,
        };
        inv_db::item::set_provider_sync_state(&mut *tx, message.item_id, message.provider, &next_state)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_permanent_failure(
        &self,
        message: &MarketplaceOutboxMessage,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        inv_db::outbox::mark_failed_permanent(&mut *tx, message.message_id, last_error).await?;
        if let Some(item) = inv_db::item::fetch_item(&mut *tx, message.item_id).await? {
            let mut state = item
                .marketplace_sync
                .get(&message.provider)
                .cloned()
                .unwrap_or_else(ProviderSyncState::pending);
            state.status = ProviderSyncStatus::Failed;
            state.last_error = Some(last_error.to_string());
            state.last_sync_attempt_at = Some(now);
            inv_db::item::set_provider_sync_state(&mut *tx, message.item_id, message.provider, &state)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_item_sync_failed(
        &self,
        item_id: Uuid,
        provider: Provider,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(item) = inv_db::item::fetch_item(&mut *tx, item_id).await? {
            let mut state = item
                .marketplace_sync
                .get(&provider)
                .cloned()
                .unwrap_or_else(ProviderSyncState::pending);
            state.status = ProviderSyncStatus::Failed;
            state.last_error = Some(last_error.to_string());
            state.last_sync_attempt_at = Some(now);
            inv_db::item::set_provider_sync_state(&mut *tx, item_id, provider, &state).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_operation_downgrades_create_with_existing_mapping() {
        assert_eq!(
            effective_operation(OutboxKind::Create, Some("ext-1")),
            EffectiveOp::Update
        );
    }

    #[test]
    fn effective_operation_upgrades_update_without_mapping() {
        assert_eq!(effective_operation(OutboxKind::Update, None), EffectiveOp::Create);
    }

    #[test]
    fn effective_operation_delete_without_mapping_is_noop() {
        assert_eq!(effective_operation(OutboxKind::Delete, None), EffectiveOp::DeleteNoop);
    }

    #[test]
    fn effective_operation_passes_through_unambiguous_cases() {
        assert_eq!(effective_operation(OutboxKind::Create, None), EffectiveOp::Create);
        assert_eq!(
            effective_operation(OutboxKind::Update, Some("ext-1")),
            EffectiveOp::Update
        );
        assert_eq!(
            effective_operation(OutboxKind::Delete, Some("ext-1")),
            EffectiveOp::Delete
        );
    }

    #[test]
    fn build_update_delta_uses_signed_for_provider_a() {
        assert!(matches!(
            build_update_delta(Provider::A, -3),
            UpdateDelta::SignedDelta(-3)
        ));
    }

    #[test]
    fn build_update_delta_uses_relative_for_provider_b() {
        match build_update_delta(Provider::B, 5) {
            UpdateDelta::AbsoluteOrRelative {
                absolute_quantity,
                relative_quantity,
            } => {
                assert_eq!(absolute_quantity, None);
                assert_eq!(relative_quantity, Some(5));
            }
            other => panic!("expected AbsoluteOrRelative, got {other:?}"),
        }
    }

    #[test]
    fn classify_call_outcome_maps_rate_limited_to_transient() {
        let result: Result<(), AdapterError> = Err(AdapterError::RateLimited);
        assert_eq!(classify_call_outcome(&result), CallOutcome::TransientFail);
    }

    #[test]
    fn classify_call_outcome_maps_permanent_errors() {
        let missing: Result<(), AdapterError> =
            Err(AdapterError::MissingExternalMapping("x".to_string()));
        assert_eq!(classify_call_outcome(&missing), CallOutcome::PermanentFail);
        let not_found: Result<(), AdapterError> = Err(AdapterError::NotFound);
        assert_eq!(classify_call_outcome(&not_found), CallOutcome::PermanentFail);
    }

    #[test]
    fn classify_call_outcome_maps_success() {
        let ok: Result<(), AdapterError> = Ok(());
        assert_eq!(classify_call_outcome(&ok), CallOutcome::Ok);
    }
}
