use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

/// Record a webhook receipt, keyed `(tenant_id, event_type, resource_id,
/// timestamp)`. Returns `false` when the same key has already been recorded
/// (duplicate delivery), so the caller can skip re-enqueuing a refresh.
pub async fn record_receipt<'c, E>(
    executor: E,
    tenant_id: Uuid,
    event_type: &str,
    resource_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        insert into webhook_receipts (tenant_id, event_type, resource_id, "timestamp")
        values ($1,$2,$3,$4)
        on conflict (tenant_id, event_type, resource_id, "timestamp") do nothing
        "#,
    )
    .bind(tenant_id)
    .bind(event_type)
    .bind(resource_id)
    .bind(timestamp)
    .execute(executor)
    .await
    .context("record_receipt failed")?;

    Ok(result.rows_affected() > 0)
}
