use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use inv_schemas::{Provider, RateLimitBucket};
use sqlx::{Executor, Postgres, Row};
use uuid::Uuid;

fn row_to_bucket(row: sqlx::postgres::PgRow) -> Result<RateLimitBucket> {
    let provider: String = row.try_get("provider")?;
    Ok(RateLimitBucket {
        tenant_id: row.try_get("tenant_id")?,
        provider: Provider::parse(&provider).context("unknown provider in rate_limit_buckets row")?,
        capacity: row.try_get("capacity")?,
        window_duration_ms: row.try_get("window_duration_ms")?,
        window_start: row.try_get("window_start")?,
        request_count: row.try_get("request_count")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        circuit_open_until: row.try_get("circuit_open_until")?,
    })
}

/// Load the persisted bucket for `(tenant_id, provider)`, or `None` if it has
/// never been written — the caller should seed one with `inv_ratelimit::new_bucket`.
pub async fn load_bucket<'c, E>(
    executor: E,
    tenant_id: Uuid,
    provider: Provider,
) -> Result<Option<RateLimitBucket>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select tenant_id, provider, capacity, window_duration_ms, window_start,
               request_count, consecutive_failures, circuit_open_until
          from rate_limit_buckets
         where tenant_id = $1 and provider = $2
        "#,
    )
    .bind(tenant_id)
    .bind(provider.as_str())
    .fetch_optional(executor)
    .await
    .context("load_bucket failed")?;

    row.map(row_to_bucket).transpose()
}

/// Upsert the full bucket snapshot. Callers load, mutate in-memory via
/// `inv_ratelimit::try_acquire`/`report`, then persist back with this —
/// acquisition itself never holds a transaction open.
pub async fn save_bucket<'c, E>(executor: E, bucket: &RateLimitBucket) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into rate_limit_buckets
            (tenant_id, provider, capacity, window_duration_ms, window_start,
             request_count, consecutive_failures, circuit_open_until)
        values ($1,$2,$3,$4,$5,$6,$7,$8)
        on conflict (tenant_id, provider) do update
           set capacity = excluded.capacity,
               window_duration_ms = excluded.window_duration_ms,
               window_start = excluded.window_start,
               request_count = excluded.request_count,
               consecutive_failures = excluded.consecutive_failures,
               circuit_open_until = excluded.circuit_open_until
        "#,
    )
    .bind(bucket.tenant_id)
    .bind(bucket.provider.as_str())
    .bind(bucket.capacity)
    .bind(bucket.window_duration_ms)
    .bind(bucket.window_start)
    .bind(bucket.request_count)
    .bind(bucket.consecutive_failures)
    .bind(bucket.circuit_open_until)
    .execute(executor)
    .await
    .context("save_bucket failed")?;
    Ok(())
}

/// Load the bucket, or synthesize a fresh one (window starting at `now`) when
/// none has been persisted yet, so callers don't need a separate seed step.
pub async fn load_or_init_bucket<'c, E>(
    executor: E,
    tenant_id: Uuid,
    provider: Provider,
    capacity: i32,
    window_duration_ms: i64,
    now: DateTime<Utc>,
) -> Result<RateLimitBucket>
where
    E: Executor<'c, Database = Postgres>,
{
    match load_bucket(executor, tenant_id, provider).await? {
        Some(b) => Ok(b),
        None => Ok(RateLimitBucket {
            tenant_id,
            provider,
            capacity,
            window_duration_ms,
            window_start: now,
            request_count: 0,
            consecutive_failures: 0,
            circuit_open_until: None,
        }),
    }
}
