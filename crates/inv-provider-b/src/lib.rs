//! Live HTTP adapter for Marketplace-B's absolute-or-relative quantity API.
//!
//! Unlike Marketplace-A's deterministic sandbox, this adapter reaches a real
//! upstream over HTTP and must classify transport/status errors into the
//! shared taxonomy before they leave this crate — nothing reqwest-specific
//! crosses the `ProviderAdapter` boundary.

use async_trait::async_trait;
use inv_provider::{
    AdapterError, CreateLotPayload, CreateLotResult, DedupCache, DedupOutcome, ProviderAdapter,
    ReferenceEntity, ReferenceKind, UpdateDelta,
};
use inv_schemas::Provider;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const ADAPTER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProviderBAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    dedup: DedupCache,
}

#[derive(Serialize)]
struct CreateLotBody<'a> {
    part_number: &'a str,
    color_id: &'a str,
    condition: &'a str,
    quantity: i64,
    price_micros: Option<i64>,
    location: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateLotResponse {
    id: String,
}

#[derive(Serialize)]
struct UpdateLotBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    absolute_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    relative_quantity: Option<i64>,
}

impl ProviderBAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(ADAPTER_CALL_TIMEOUT)
                .build()
                .expect("reqwest client builder invariants hold"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            dedup: DedupCache::with_default_ttl(),
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Classify an HTTP status code into the shared error taxonomy. Isolated
/// from the network call so it's independently testable.
fn classify_status(status: reqwest::StatusCode, body: &str) -> AdapterError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AdapterError::RateLimited;
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return AdapterError::NotFound;
    }
    if status.is_client_error() {
        if body.to_lowercase().contains("color") && body.to_lowercase().contains("mapping") {
            return AdapterError::MissingExternalMapping(body.to_string());
        }
        return AdapterError::PermanentValidation(body.to_string());
    }
    AdapterError::Transient(format!("upstream status {status}"))
}

fn classify_transport_error(err: &reqwest::Error) -> AdapterError {
    if err.is_timeout() || err.is_connect() {
        AdapterError::Transient(err.to_string())
    } else {
        AdapterError::Transient(err.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for ProviderBAdapter {
    fn provider(&self) -> Provider {
        Provider::B
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

        let condition = match payload.condition {
            inv_schemas::Condition::New => "new",
            inv_schemas::Condition::Used => "used",
        };
        let body = CreateLotBody {
            part_number: &payload.part_number,
            color_id: &payload.color_id,
            condition,
            quantity: payload.quantity_available,
            price_micros: payload.price_micros,
            location: payload.location.as_deref(),
        };

        let resp = self
            .client
            .post(format!("{}/lots", self.base_url))
            .header("Authorization", self.auth_header_value())
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        let parsed: CreateLotResponse = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Transient(format!("malformed create response: {e}")))?;
        self.dedup.record(
            idempotency_key,
            DedupOutcome::Created(parsed.id.clone()),
        );
        Ok(CreateLotResult {
            external_lot_id: parsed.id,
        })
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

        let body = match delta {
            UpdateDelta::AbsoluteOrRelative {
                absolute_quantity,
                relative_quantity,
            } => UpdateLotBody {
                absolute_quantity,
                relative_quantity,
            },
            UpdateDelta::SignedDelta(_) => {
                return Err(AdapterError::PermanentValidation(
                    "provider B does not accept signed-delta updates".to_string(),
                ));
            }
        };

        let resp = self
            .client
            .patch(format!("{}/lots/{external_lot_id}", self.base_url))
            .header("Authorization", self.auth_header_value())
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
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

        let resp = self
            .client
            .delete(format!("{}/lots/{external_lot_id}", self.base_url))
            .header("Authorization", self.auth_header_value())
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        self.dedup.record(idempotency_key, DedupOutcome::Deleted);
        Ok(())
    }

    async fn fetch_reference(
        &self,
        kind: ReferenceKind,
        primary_key: &str,
        secondary_key: Option<&str>,
    ) -> Result<ReferenceEntity, AdapterError> {
        let table = match kind {
            ReferenceKind::Part => "parts",
            ReferenceKind::PartColor => "part-colors",
            ReferenceKind::PriceGuide => "price-guide",
            ReferenceKind::Color => "colors",
            ReferenceKind::Category => "categories",
        };
        let mut url = format!("{}/reference/{table}/{primary_key}", self.base_url);
        if let Some(secondary) = secondary_key {
            url.push_str(&format!("/{secondary}"));
        }

        let resp = self
            .client
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        match kind {
            ReferenceKind::Part => serde_json::from_str(&text)
                .map(ReferenceEntity::Part)
                .map_err(reference_parse_error),
            ReferenceKind::Color => serde_json::from_str(&text)
                .map(ReferenceEntity::Color)
                .map_err(reference_parse_error),
            ReferenceKind::Category => serde_json::from_str(&text)
                .map(ReferenceEntity::Category)
                .map_err(reference_parse_error),
            ReferenceKind::PartColor => serde_json::from_str(&text)
                .map(ReferenceEntity::PartColor)
                .map_err(reference_parse_error),
            ReferenceKind::PriceGuide => serde_json::from_str(&text)
                .map(ReferenceEntity::PartPrice)
                .map_err(reference_parse_error),
        }
    }
}

fn reference_parse_error(e: serde_json::Error) -> AdapterError {
    AdapterError::Transient(format!("malformed reference response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_classifies_as_rate_limited() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err, AdapterError::RateLimited);
    }

    #[test]
    fn missing_color_mapping_is_classified_distinctly() {
        let err = classify_status(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            "no color mapping found for this part",
        );
        assert!(matches!(err, AdapterError::MissingExternalMapping(_)));
    }

    #[test]
    fn other_client_errors_are_permanent_validation() {
        let err = classify_status(reqwest::StatusCode::BAD_REQUEST, "invalid part number");
        assert!(matches!(err, AdapterError::PermanentValidation(_)));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(matches!(err, AdapterError::Transient(_)));
    }

    #[tokio::test]
    async fn update_with_signed_delta_is_rejected() {
        let adapter = ProviderBAdapter::new("http://localhost:0", "test-key");
        let err = adapter
            .update_lot(Uuid::new_v4(), "lot-1", UpdateDelta::SignedDelta(5), "k1")
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::PermanentValidation(_)));
    }
}
