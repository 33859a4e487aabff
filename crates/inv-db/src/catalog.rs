use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use inv_schemas::{CatalogPriority, CatalogRefreshMessage, CatalogTableName, OutboxStatus};
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row};
use uuid::Uuid;

fn table_name_to_str(t: CatalogTableName) -> &'static str {
    match t {
        CatalogTableName::Part => "part",
        CatalogTableName::PartColor => "part_color",
        CatalogTableName::PriceGuide => "price_guide",
        CatalogTableName::Color => "color",
        CatalogTableName::Category => "category",
    }
}

fn table_name_from_str(s: &str) -> CatalogTableName {
    match s {
        "part_color" => CatalogTableName::PartColor,
        "price_guide" => CatalogTableName::PriceGuide,
        "color" => CatalogTableName::Color,
        "category" => CatalogTableName::Category,
        _ => CatalogTableName::Part,
    }
}

fn priority_to_i16(p: CatalogPriority) -> i16 {
    p as i16
}

fn priority_from_i16(v: i16) -> CatalogPriority {
    match v {
        1 => CatalogPriority::High,
        3 => CatalogPriority::Low,
        _ => CatalogPriority::Medium,
    }
}

fn status_to_str(s: OutboxStatus) -> &'static str {
    match s {
        OutboxStatus::Pending => "pending",
        OutboxStatus::Inflight => "inflight",
        OutboxStatus::Succeeded => "succeeded",
        OutboxStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> OutboxStatus {
    match s {
        "inflight" => OutboxStatus::Inflight,
        "succeeded" => OutboxStatus::Succeeded,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<CatalogRefreshMessage> {
    let table_name: String = row.try_get("table_name")?;
    let priority: i16 = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    Ok(CatalogRefreshMessage {
        message_id: row.try_get("message_id")?,
        table_name: table_name_from_str(&table_name),
        primary_key: row.try_get("primary_key_value")?,
        secondary_key: row.try_get("secondary_key_value")?,
        priority: priority_from_i16(priority),
        last_fetched_hint: row.try_get("last_fetched_hint")?,
        status: status_from_str(&status),
        attempt: row.try_get("attempt")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

/// A row is stale once `last_fetched_at` is missing or older than
/// `stale_threshold_days`.
pub fn is_stale(
    last_fetched_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_threshold_days: i64,
) -> bool {
    match last_fetched_at {
        None => true,
        Some(t) => now - t > Duration::days(stale_threshold_days),
    }
}

/// Enqueue a refresh. Returns `Ok(None)` if a pending/inflight row already
/// exists for this key — the partial unique index makes re-requesting a
/// refresh for the same row idempotent.
#[allow(clippy::too_many_arguments)]
pub async fn enqueue<'c, E>(
    executor: E,
    table_name: CatalogTableName,
    primary_key: &str,
    secondary_key: Option<&str>,
    priority: CatalogPriority,
    last_fetched_hint: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<CatalogRefreshMessage>>
where
    E: Executor<'c, Database = Postgres>,
{
    let message_id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        insert into catalog_refresh_outbox
            (message_id, table_name, primary_key_value, secondary_key_value, priority,
             last_fetched_hint, status, attempt, next_attempt_at, created_at)
        values ($1,$2,$3,$4,$5,$6,'pending',0,$7,$7)
        on conflict (table_name, primary_key_value, coalesce(secondary_key_value, ''))
            where status in ('pending', 'inflight')
            do nothing
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(table_name_to_str(table_name))
    .bind(primary_key)
    .bind(secondary_key)
    .bind(priority_to_i16(priority))
    .bind(last_fetched_hint)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("catalog enqueue failed")?;

    if row.is_none() {
        return Ok(None);
    }

    Ok(Some(CatalogRefreshMessage {
        message_id,
        table_name,
        primary_key: primary_key.to_string(),
        secondary_key: secondary_key.map(str::to_string),
        priority,
        last_fetched_hint,
        status: OutboxStatus::Pending,
        attempt: 0,
        next_attempt_at: now,
        last_error: None,
        created_at: now,
    }))
}

/// Claim up to `batch_size` due rows in priority order (high before medium
/// before low), earliest `next_attempt_at` first within a priority band.
pub async fn claim_batch(
    pool: &PgPool,
    batch_size: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CatalogRefreshMessage>> {
    let rows = sqlx::query(
        r#"
        with to_claim as (
            select message_id
              from catalog_refresh_outbox
             where status = 'pending'
               and next_attempt_at <= $2
             order by priority asc, next_attempt_at asc
             limit $1
             for update skip locked
        )
        update catalog_refresh_outbox
           set status = 'inflight'
         where message_id in (select message_id from to_claim)
        returning message_id, table_name, primary_key_value, secondary_key_value, priority,
                  last_fetched_hint, status, attempt, next_attempt_at, last_error, created_at
        "#,
    )
    .bind(batch_size)
    .bind(now)
    .fetch_all(pool)
    .await
    .context("catalog claim_batch failed")?;

    rows.into_iter().map(row_to_message).collect()
}

pub async fn mark_succeeded<'c, E>(executor: E, message_id: Uuid) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update catalog_refresh_outbox
           set status = 'succeeded'
         where message_id = $1 and status = 'inflight'
        returning message_id
        "#,
    )
    .bind(message_id)
    .fetch_optional(executor)
    .await
    .context("catalog mark_succeeded failed")?;
    Ok(row.is_some())
}

/// Same increment-then-branch shape as `outbox::reschedule_or_fail`.
pub async fn reschedule_or_fail(
    conn: &mut PgConnection,
    message_id: Uuid,
    max_attempts: u32,
    next_attempt_at: DateTime<Utc>,
    last_error: &str,
) -> Result<OutboxStatus> {
    let (attempt,): (i32,) = sqlx::query_as(
        r#"
        update catalog_refresh_outbox
           set attempt = attempt + 1, last_error = $2
         where message_id = $1 and status = 'inflight'
        returning attempt
        "#,
    )
    .bind(message_id)
    .bind(last_error)
    .fetch_one(&mut *conn)
    .await
    .context("catalog reschedule_or_fail attempt increment failed")?;

    if attempt as u32 >= max_attempts {
        sqlx::query("update catalog_refresh_outbox set status = 'failed' where message_id = $1")
            .bind(message_id)
            .execute(&mut *conn)
            .await
            .context("catalog reschedule_or_fail terminal transition failed")?;
        Ok(OutboxStatus::Failed)
    } else {
        sqlx::query(
            "update catalog_refresh_outbox set status = 'pending', next_attempt_at = $2 where message_id = $1",
        )
        .bind(message_id)
        .bind(next_attempt_at)
        .execute(&mut *conn)
        .await
        .context("catalog reschedule_or_fail reschedule failed")?;
        Ok(OutboxStatus::Pending)
    }
}

pub async fn upsert_part<'c, E>(
    executor: E,
    part_number: &str,
    name: &str,
    category_id: &str,
    last_fetched_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into reference_parts (part_number, name, category_id, last_fetched_at)
        values ($1,$2,$3,$4)
        on conflict (part_number) do update
           set name = excluded.name, category_id = excluded.category_id,
               last_fetched_at = excluded.last_fetched_at
        "#,
    )
    .bind(part_number)
    .bind(name)
    .bind(category_id)
    .bind(last_fetched_at)
    .execute(executor)
    .await
    .context("upsert_part failed")?;
    Ok(())
}

pub async fn upsert_color<'c, E>(
    executor: E,
    color_id: &str,
    name: &str,
    last_fetched_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into reference_colors (color_id, name, last_fetched_at)
        values ($1,$2,$3)
        on conflict (color_id) do update
           set name = excluded.name, last_fetched_at = excluded.last_fetched_at
        "#,
    )
    .bind(color_id)
    .bind(name)
    .bind(last_fetched_at)
    .execute(executor)
    .await
    .context("upsert_color failed")?;
    Ok(())
}

pub async fn upsert_category<'c, E>(
    executor: E,
    category_id: &str,
    name: &str,
    last_fetched_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into reference_categories (category_id, name, last_fetched_at)
        values ($1,$2,$3)
        on conflict (category_id) do update
           set name = excluded.name, last_fetched_at = excluded.last_fetched_at
        "#,
    )
    .bind(category_id)
    .bind(name)
    .bind(last_fetched_at)
    .execute(executor)
    .await
    .context("upsert_category failed")?;
    Ok(())
}

pub async fn upsert_part_color<'c, E>(
    executor: E,
    part_number: &str,
    color_id: &str,
    last_fetched_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into reference_part_colors (part_number, color_id, last_fetched_at)
        values ($1,$2,$3)
        on conflict (part_number, color_id) do update
           set last_fetched_at = excluded.last_fetched_at
        "#,
    )
    .bind(part_number)
    .bind(color_id)
    .bind(last_fetched_at)
    .execute(executor)
    .await
    .context("upsert_part_color failed")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_part_price<'c, E>(
    executor: E,
    part_number: &str,
    color_id: &str,
    condition: &str,
    stock: bool,
    avg_price_micros: i64,
    last_fetched_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into reference_part_prices
            (part_number, color_id, condition, stock, avg_price_micros, last_fetched_at)
        values ($1,$2,$3,$4,$5,$6)
        on conflict (part_number, color_id, condition, stock) do update
           set avg_price_micros = excluded.avg_price_micros,
               last_fetched_at = excluded.last_fetched_at
        "#,
    )
    .bind(part_number)
    .bind(color_id)
    .bind(condition)
    .bind(stock)
    .bind(avg_price_micros)
    .bind(last_fetched_at)
    .execute(executor)
    .await
    .context("upsert_part_price failed")?;
    Ok(())
}

/// Admin operation, mirrors `outbox::requeue_failed`: move a `failed`
/// catalog refresh row back to `pending` with a reset attempt counter.
pub async fn requeue_failed<'c, E>(
    executor: E,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update catalog_refresh_outbox
           set status = 'pending', attempt = 0, next_attempt_at = $2
         where message_id = $1 and status = 'failed'
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("catalog requeue_failed failed")?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_and_priority_round_trip() {
        for t in [
            CatalogTableName::Part,
            CatalogTableName::PartColor,
            CatalogTableName::PriceGuide,
            CatalogTableName::Color,
            CatalogTableName::Category,
        ] {
            assert_eq!(table_name_from_str(table_name_to_str(t)), t);
        }
        for p in [CatalogPriority::High, CatalogPriority::Medium, CatalogPriority::Low] {
            assert_eq!(priority_from_i16(priority_to_i16(p)), p);
        }
    }

    #[test]
    fn status_round_trips() {
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Inflight,
            OutboxStatus::Succeeded,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status_from_str(status_to_str(s)), s);
        }
    }

    #[test]
    fn stale_when_never_fetched() {
        let now = Utc::now();
        assert!(is_stale(None, now, 30));
    }

    #[test]
    fn stale_when_older_than_threshold() {
        let now = Utc::now();
        let old = now - Duration::days(45);
        assert!(is_stale(Some(old), now, 30));
    }

    #[test]
    fn not_stale_when_recently_fetched() {
        let now = Utc::now();
        let recent = now - Duration::days(1);
        assert!(!is_stale(Some(recent), now, 30));
    }
}
