use anyhow::{Context, Result};
use sqlx::{Executor, Postgres, Row};
use uuid::Uuid;

/// Resolve a webhook path token to the tenant it belongs to. A malformed or
/// unrecognized token (spec.md §6: "400 if the token is malformed") is
/// represented the same way here — `None` — leaving the 400-vs-404
/// distinction to the caller's HTTP layer.
pub async fn resolve_webhook_token<'c, E>(executor: E, token: &str) -> Result<Option<Uuid>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query("select tenant_id from tenants where webhook_token = $1")
        .bind(token)
        .fetch_optional(executor)
        .await
        .context("resolve_webhook_token failed")?;

    row.map(|r| r.try_get::<Uuid, _>("tenant_id"))
        .transpose()
        .context("resolve_webhook_token row decode failed")
}
