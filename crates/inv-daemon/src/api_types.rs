//! Request and response types for all inv-daemon HTTP endpoints.
//!
//! These types are `Serialize`/`Deserialize` so Axum can JSON-encode and
//! decode them directly. No business logic lives here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Always returned with 200 on the webhook endpoint — spec.md §6 requires
/// the response to stay 200 even when the notification was a no-op
/// internally (duplicate delivery, unmapped event type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
