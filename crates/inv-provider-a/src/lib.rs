//! Deterministic in-process adapter for Marketplace-A's signed-delta API.
//! Used in sandbox/test deployments and as the reference implementation of
//! the idempotency contract — every effectful call is deduped through
//! `DedupCache` before it touches internal state.

use async_trait::async_trait;
use inv_provider::{
    AdapterError, CreateLotPayload, CreateLotResult, DedupCache, DedupOutcome, ProviderAdapter,
    ReferenceEntity, ReferenceKind, UpdateDelta,
};
use inv_schemas::Provider;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LotState {
    quantity: i64,
}

/// Sandbox adapter for Marketplace-A. Maintains quantities in-memory,
/// keyed by the external lot id it assigns on create.
pub struct ProviderAAdapter {
    lots: Mutex<BTreeMap<String, LotState>>,
    next_lot_seq: AtomicU64,
    dedup: DedupCache,
}

impl Default for ProviderAAdapter {
    fn default() -> Self {
        Self {
            lots: Mutex::new(BTreeMap::new()),
            next_lot_seq: AtomicU64::new(1),
            dedup: DedupCache::with_default_ttl(),
        }
    }
}

impl ProviderAAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn derive_lot_id(&self) -> String {
        let n = self.next_lot_seq.fetch_add(1, Ordering::SeqCst);
        format!("a-lot-{n}")
    }
}

#[async_trait]
impl ProviderAdapter for ProviderAAdapter {
    fn provider(&self) -> Provider {
        Provider::A
    }

    async fn create_lot(
        &self,
        _tenant_id: Uuid,
        payload: CreateLotPayload,
        idempotency_key: &str,
    ) -> Result<CreateLotResult, AdapterError> {
        if let Some(DedupOutcome::Created(external_lot_id)) = self.dedup.get(idempotency_key) {
            return Ok(CreateLotResult { external_lot_id });
        }

        let external_lot_id = self.derive_lot_id();
        self.lots.lock().expect("lots mutex poisoned").insert(
            external_lot_id.clone(),
            LotState {
                quantity: payload.quantity_available,
            },
        );
        self.dedup.record(
            idempotency_key,
            DedupOutcome::Created(external_lot_id.clone()),
        );
        Ok(CreateLotResult { external_lot_id })
    }

    async fn update_lot(
        &self,
        _tenant_id: Uuid,
        external_lot_id: &str,
        delta: UpdateDelta,
        idempotency_key: &str,
    ) -> Result<(), AdapterError> {
        if self.dedup.get(idempotency_key).is_some() {
            return Ok(());
        }

        let delta_qty = match delta {
            UpdateDelta::SignedDelta(d) => d,
            UpdateDelta::AbsoluteOrRelative { .. } => {
                return Err(AdapterError::PermanentValidation(
                    "provider A only accepts signed-delta updates".to_string(),
                ));
            }
        };

        let mut lots = self.lots.lock().expect("lots mutex poisoned");
        let lot = lots
            .get_mut(external_lot_id)
            .ok_or(AdapterError::MissingExternalMapping(format!(
                "no lot {external_lot_id} on provider A"
            )))?;
        let new_quantity = lot.quantity + delta_qty;
        if new_quantity < 0 {
            return Err(AdapterError::PermanentValidation(
                "resulting quantity would be negative".to_string(),
            ));
        }
        lot.quantity = new_quantity;
        drop(lots);
        self.dedup.record(idempotency_key, DedupOutcome::Updated);
        Ok(())
    }

    async fn delete_lot(
        &self,
        _tenant_id: Uuid,
        external_lot_id: &str,
        idempotency_key: &str,
    ) -> Result<(), AdapterError> {
        if self.dedup.get(idempotency_key).is_some() {
            return Ok(());
        }
        self.lots
            .lock()
            .expect("lots mutex poisoned")
            .remove(external_lot_id);
        self.dedup.record(idempotency_key, DedupOutcome::Deleted);
        Ok(())
    }

    async fn fetch_reference(
        &self,
        _kind: ReferenceKind,
        _primary_key: &str,
        _secondary_key: Option<&str>,
    ) -> Result<ReferenceEntity, AdapterError> {
        Err(AdapterError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(qty: i64) -> CreateLotPayload {
        CreateLotPayload {
            part_number: "3001".to_string(),
            color_id: "5".to_string(),
            condition: inv_schemas::Condition::New,
            quantity_available: qty,
            price_micros: Some(250_000),
            location: None,
        }
    }

    #[tokio::test]
    async fn create_then_update_applies_signed_delta() {
        let adapter = ProviderAAdapter::new();
        let created = adapter
            .create_lot(Uuid::new_v4(), payload(10), "k1")
            .await
            .unwrap();
        adapter
            .update_lot(
                Uuid::new_v4(),
                &created.external_lot_id,
                UpdateDelta::SignedDelta(-3),
                "k2",
            )
            .await
            .unwrap();
        let lots = adapter.lots.lock().unwrap();
        assert_eq!(lots[&created.external_lot_id].quantity, 7);
    }

    #[tokio::test]
    async fn repeated_create_with_same_key_is_idempotent() {
        let adapter = ProviderAAdapter::new();
        let first = adapter
            .create_lot(Uuid::new_v4(), payload(10), "same-key")
            .await
            .unwrap();
        let second = adapter
            .create_lot(Uuid::new_v4(), payload(999), "same-key")
            .await
            .unwrap();
        assert_eq!(first.external_lot_id, second.external_lot_id);
        assert_eq!(adapter.lots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_lot_is_missing_mapping() {
        let adapter = ProviderAAdapter::new();
        let err = adapter
            .update_lot(
                Uuid::new_v4(),
                "no-such-lot",
                UpdateDelta::SignedDelta(1),
                "k1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingExternalMapping(_)));
    }

    #[tokio::test]
    async fn update_with_wrong_delta_model_is_permanent_validation() {
        let adapter = ProviderAAdapter::new();
        let created = adapter
            .create_lot(Uuid::new_v4(), payload(10), "k1")
            .await
            .unwrap();
        let err = adapter
            .update_lot(
                Uuid::new_v4(),
                &created.external_lot_id,
                UpdateDelta::AbsoluteOrRelative {
                    absolute_quantity: Some(5),
                    relative_quantity: None,
                },
                "k2",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::PermanentValidation(_)));
    }

    #[tokio::test]
    async fn delete_of_unknown_lot_succeeds() {
        let adapter = ProviderAAdapter::new();
        adapter
            .delete_lot(Uuid::new_v4(), "no-such-lot", "k1")
            .await
            .unwrap();
    }
}
