//! A `ProviderAdapter` whose responses are scripted ahead of time, for
//! exercising `inv-drain`/`inv-catalog` retry and classification logic
//! without a real upstream. Mirrors `inv-provider-a`'s in-memory adapter in
//! shape, but where that adapter is deterministic-by-formula, this one is
//! deterministic-by-script: each call pops the next queued outcome and
//! panics if the queue runs dry, so a test's call count must match its
//! script exactly.

use std::sync::Mutex;

use async_trait::async_trait;
use inv_provider::{
    AdapterError, CreateLotPayload, CreateLotResult, ProviderAdapter, ReferenceEntity,
    ReferenceKind, UpdateDelta,
};
use inv_schemas::Provider;
use uuid::Uuid;

type CreateLotOutcome = Result<CreateLotResult, AdapterError>;
type UnitOutcome = Result<(), AdapterError>;
type ReferenceOutcome = Result<ReferenceEntity, AdapterError>;

/// One recorded call, for tests that want to assert on call order/args
/// rather than just outcomes.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    CreateLot {
        tenant_id: Uuid,
        idempotency_key: String,
    },
    UpdateLot {
        tenant_id: Uuid,
        external_lot_id: String,
        idempotency_key: String,
    },
    DeleteLot {
        tenant_id: Uuid,
        external_lot_id: String,
        idempotency_key: String,
    },
    FetchReference {
        primary_key: String,
        secondary_key: Option<String>,
    },
}

#[derive(Default)]
pub struct ScriptedAdapter {
    provider: Option<Provider>,
    create_lot: Mutex<Vec<CreateLotOutcome>>,
    update_lot: Mutex<Vec<UnitOutcome>>,
    delete_lot: Mutex<Vec<UnitOutcome>>,
    fetch_reference: Mutex<Vec<ReferenceOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..Default::default()
        }
    }

    /// Queue outcomes in call order (first push -> first pop).
    pub fn push_create_lot(&self, outcome: CreateLotOutcome) -> &Self {
        self.create_lot.lock().expect("poisoned").insert(0, outcome);
        self
    }

    pub fn push_update_lot(&self, outcome: UnitOutcome) -> &Self {
        self.update_lot.lock().expect("poisoned").insert(0, outcome);
        self
    }

    pub fn push_delete_lot(&self, outcome: UnitOutcome) -> &Self {
        self.delete_lot.lock().expect("poisoned").insert(0, outcome);
        self
    }

    pub fn push_fetch_reference(&self, outcome: ReferenceOutcome) -> &Self {
        self.fetch_reference
            .lock()
            .expect("poisoned")
            .insert(0, outcome);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("poisoned").clone()
    }

    fn pop<T>(queue: &Mutex<Vec<Result<T, AdapterError>>>, what: &str) -> Result<T, AdapterError> {
        queue
            .lock()
            .expect("poisoned")
            .pop()
            .unwrap_or_else(|| panic!("ScriptedAdapter: no scripted outcome left for {what}"))
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider.expect("ScriptedAdapter::new must set a provider")
    }

    async fn create_lot(
        &self,
        tenant_id: Uuid,
        _payload: CreateLotPayload,
        idempotency_key: &str,
    ) -> Result<CreateLotResult, AdapterError> {
        self.calls.lock().expect("poisoned").push(RecordedCall::CreateLot {
            tenant_id,
            idempotency_key: idempotency_key.to_string(),
        });
        Self::pop(&self.create_lot, "create_lot")
    }

    async fn update_lot(
        &self,
        tenant_id: Uuid,
        external_lot_id: &str,
        _delta: UpdateDelta,
        idempotency_key: &str,
    ) -> Result<(), AdapterError> {
        self.calls.lock().expect("poisoned").push(RecordedCall::UpdateLot {
            tenant_id,
            external_lot_id: external_lot_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
        });
        Self::pop(&self.update_lot, "update_lot")
    }

    async fn delete_lot(
        &self,
        tenant_id: Uuid,
        external_lot_id: &str,
        idempotency_key: &str,
    ) -> Result<(), AdapterError> {
        self.calls.lock().expect("poisoned").push(RecordedCall::DeleteLot {
            tenant_id,
            external_lot_id: external_lot_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
        });
        Self::pop(&self.delete_lot, "delete_lot")
    }

    async fn fetch_reference(
        &self,
        _kind: ReferenceKind,
        primary_key: &str,
        secondary_key: Option<&str>,
    ) -> Result<ReferenceEntity, AdapterError> {
        self.calls
            .lock()
            .expect("poisoned")
            .push(RecordedCall::FetchReference {
                primary_key: primary_key.to_string(),
                secondary_key: secondary_key.map(|s| s.to_string()),
            });
        Self::pop(&self.fetch_reference, "fetch_reference")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pops_outcomes_in_push_order() {
        let adapter = ScriptedAdapter::new(Provider::A);
        adapter.push_create_lot(Ok(CreateLotResult {
            external_lot_id: "lot-1".to_string(),
        }));
        adapter.push_create_lot(Err(AdapterError::RateLimited));

        let payload = CreateLotPayload {
            part_number: "3001".to_string(),
            color_id: "1".to_string(),
            condition: inv_schemas::Condition::New,
            quantity_available: 5,
            price_micros: None,
            location: None,
        };

        let first = adapter
            .create_lot(Uuid::new_v4(), payload.clone(), "k1")
            .await
            .expect("first call scripted to succeed");
        assert_eq!(first.external_lot_id, "lot-1");

        let second = adapter.create_lot(Uuid::new_v4(), payload, "k2").await;
        assert!(matches!(second, Err(AdapterError::RateLimited)));

        assert_eq!(adapter.calls().len(), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "no scripted outcome left")]
    async fn panics_when_script_runs_dry() {
        let adapter = ScriptedAdapter::new(Provider::B);
        let payload = CreateLotPayload {
            part_number: "3001".to_string(),
            color_id: "1".to_string(),
            condition: inv_schemas::Condition::New,
            quantity_available: 5,
            price_micros: None,
            location: None,
        };
        let _ = adapter.create_lot(Uuid::new_v4(), payload, "k1").await;
    }
}
