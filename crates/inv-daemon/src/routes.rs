//! Axum router and all HTTP handlers for inv-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use inv_schemas::{CatalogTableName, Provider, WebhookNotification};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    api_types::{ErrorResponse, HealthResponse, WebhookAck},
    state::AppState,
};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let payload_max = state.config.webhook_payload_max_bytes;

    let webhook_router = Router::new()
        .route("/webhook/{provider}/{tenant_token}", post(webhook))
        .layer(DefaultBodyLimit::max(payload_max));

    Router::new()
        .route("/v1/healthz", get(health))
        .merge(webhook_router)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/healthz
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /webhook/:provider/:tenant_token  (spec.md §6)
// ---------------------------------------------------------------------------
//
// Always 200 unless the token is malformed (400) or the body is too large
// (413, enforced by the `DefaultBodyLimit` layer above). A wrong method on
// this path falls through to Axum's built-in 405, since only `post` is
// registered here. Internal errors — DB failures, an event type with no
// catalog-table mapping, an unrecognized tenant token — are swallowed and
// logged rather than surfaced, so a probing or misconfigured sender never
// learns anything from the response. A notification older than
// `MAX_NOTIFICATION_AGE` (spec.md §4.5) is acked and recorded but never
// dispatched to the catalog refresh worker.

pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    Path((provider_str, tenant_token)): Path<(String, String)>,
    Json(body): Json<WebhookNotification>,
) -> Response {
    if !is_well_formed_token(&tenant_token) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "malformed tenant token".to_string(),
            }),
        )
            .into_response();
    }

    let Some(provider) = Provider::parse(&provider_str) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "unrecognized provider".to_string(),
            }),
        )
            .into_response();
    };

    let tenant_id = match inv_db::tenant::resolve_webhook_token(&st.pool, &tenant_token).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(token = %tenant_token, "webhook token not recognized; acking without action");
            return (StatusCode::OK, Json(WebhookAck { ok: true })).into_response();
        }
        Err(err) => {
            error!(error = %err, "failed to resolve webhook token");
            return (StatusCode::OK, Json(WebhookAck { ok: true })).into_response();
        }
    };

    if let Err(err) = process_webhook(&st, tenant_id, provider, &body).await {
        error!(error = %err, "webhook processing failed");
    }

    (StatusCode::OK, Json(WebhookAck { ok: true })).into_response()
}

/// A deliberately loose syntactic check — not a lookup. Distinguishes "this
/// cannot possibly be a token" (400) from "well-formed but unknown" (still
/// 200, per spec.md §6).
fn is_well_formed_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 128
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `eventType` names the reference table the notification concerns (e.g.
/// `"part"`, `"partColor"`, `"priceGuide"`, `"color"`, `"category"`); the
/// webhook body carries no explicit table name, so this mapping is the only
/// place that association lives.
fn event_type_to_table(event_type: &str) -> Option<CatalogTableName> {
    match event_type.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
        "part" => Some(CatalogTableName::Part),
        "partcolor" => Some(CatalogTableName::PartColor),
        "priceguide" | "partprice" => Some(CatalogTableName::PriceGuide),
        "color" => Some(CatalogTableName::Color),
        "category" => Some(CatalogTableName::Category),
        _ => None,
    }
}

/// spec.md §4.5: notifications older than this are acked but never processed.
const MAX_NOTIFICATION_AGE: Duration = Duration::hours(1);

async fn process_webhook(
    st: &AppState,
    tenant_id: Uuid,
    provider: Provider,
    body: &WebhookNotification,
) -> anyhow::Result<()> {
    let is_new = inv_db::webhook::record_receipt(
        &st.pool,
        tenant_id,
        &body.event_type,
        &body.resource_id,
        body.timestamp,
    )
    .await?;

    if !is_new {
        info!(
            provider = %provider,
            event_type = %body.event_type,
            resource_id = %body.resource_id,
            "duplicate webhook delivery; skipping"
        );
        return Ok(());
    }

    if Utc::now() - body.timestamp > MAX_NOTIFICATION_AGE {
        info!(
            provider = %provider,
            event_type = %body.event_type,
            resource_id = %body.resource_id,
            timestamp = %body.timestamp,
            "stale webhook notification; acking without processing"
        );
        return Ok(());
    }

    let Some(table_name) = event_type_to_table(&body.event_type) else {
        warn!(event_type = %body.event_type, "webhook event type has no catalog-table mapping; ignoring");
        return Ok(());
    };

    let worker = inv_catalog::CatalogWorker::new(
        st.pool.clone(),
        st.catalog_source.clone(),
        st.catalog_config(),
    );
    worker
        .webhook_triggered_refresh(table_name, &body.resource_id, None, Utc::now())
        .await?;

    Ok(())
}
