use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use inv_schemas::{MarketplaceOutboxMessage, OutboxKind, OutboxStatus, Provider};
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row};
use uuid::Uuid;

fn kind_to_str(k: OutboxKind) -> &'static str {
    match k {
        OutboxKind::Create => "create",
        OutboxKind::Update => "update",
        OutboxKind::Delete => "delete",
    }
}

fn kind_from_str(s: &str) -> OutboxKind {
    match s {
        "update" => OutboxKind::Update,
        "delete" => OutboxKind::Delete,
        _ => OutboxKind::Create,
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

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<MarketplaceOutboxMessage> {
    let provider: String = row.try_get("provider")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(MarketplaceOutboxMessage {
        message_id: row.try_get("message_id")?,
        tenant_id: row.try_get("tenant_id")?,
        item_id: row.try_get("item_id")?,
        provider: Provider::parse(&provider).context("unknown provider in outbox row")?,
        kind: kind_from_str(&kind),
        from_seq_exclusive: row.try_get("from_seq_exclusive")?,
        to_seq_inclusive: row.try_get("to_seq_inclusive")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: status_from_str(&status),
        attempt: row.try_get("attempt")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        last_error: row.try_get("last_error")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Enqueue one outbox row. Returns `Ok(None)` if a row with the same
/// idempotency key already exists (the insert is a no-op) — matching the
/// "unique across the lifetime of a tenant" invariant.
#[allow(clippy::too_many_arguments)]
pub async fn enqueue<'c, E>(
    executor: E,
    tenant_id: Uuid,
    item_id: Uuid,
    provider: Provider,
    kind: OutboxKind,
    from_seq_exclusive: i64,
    to_seq_inclusive: i64,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<MarketplaceOutboxMessage>>
where
    E: Executor<'c, Database = Postgres>,
{
    let message_id = Uuid::new_v4();
    let idempotency_key = MarketplaceOutboxMessage::derive_idempotency_key(
        item_id,
        provider,
        from_seq_exclusive,
        to_seq_inclusive,
    );

    let row = sqlx::query(
        r#"
        insert into marketplace_outbox
            (message_id, tenant_id, item_id, provider, kind, from_seq_exclusive,
             to_seq_inclusive, idempotency_key, status, attempt, next_attempt_at,
             correlation_id, created_at)
        values ($1,$2,$3,$4,$5,$6,$7,$8,'pending',0,$9,$10,$9)
        on conflict (idempotency_key) do nothing
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(tenant_id)
    .bind(item_id)
    .bind(provider.as_str())
    .bind(kind_to_str(kind))
    .bind(from_seq_exclusive)
    .bind(to_seq_inclusive)
    .bind(&idempotency_key)
    .bind(now)
    .bind(correlation_id)
    .fetch_optional(executor)
    .await
    .context("outbox enqueue failed")?;

    if row.is_none() {
        return Ok(None);
    }

    Ok(Some(MarketplaceOutboxMessage {
        message_id,
        tenant_id,
        item_id,
        provider,
        kind,
        from_seq_exclusive,
        to_seq_inclusive,
        idempotency_key,
        status: OutboxStatus::Pending,
        attempt: 0,
        next_attempt_at: now,
        last_error: None,
        correlation_id,
        created_at: now,
    }))
}

/// Atomically claim up to `batch_size` due `pending` rows, enforcing:
///   - at most one `inflight` row per `(item_id, provider)`, and
///   - only the earliest-`toSeqInclusive` pending row per pair is eligible,
///     so messages drain in `seq` order per item.
/// Uses `FOR UPDATE SKIP LOCKED` so concurrent dispatchers never claim the
/// same row.
pub async fn claim_batch(
    pool: &PgPool,
    batch_size: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MarketplaceOutboxMessage>> {
    let rows = sqlx::query(
        r#"
        with ranked as (
            select o.message_id,
                   row_number() over (
                       partition by o.item_id, o.provider
                       order by o.to_seq_inclusive asc
                   ) as rn
              from marketplace_outbox o
             where o.status = 'pending'
               and o.next_attempt_at <= $2
               and not exists (
                   select 1 from marketplace_outbox o2
                    where o2.item_id = o.item_id
                      and o2.provider = o.provider
                      and o2.status = 'inflight'
               )
        ),
        candidates as (
            select r.message_id, m.next_attempt_at, m.created_at
              from ranked r
              join marketplace_outbox m on m.message_id = r.message_id
             where r.rn = 1
        ),
        to_claim as (
            select message_id
              from marketplace_outbox
             where message_id in (select message_id from candidates)
             order by next_attempt_at asc, created_at asc
             limit $1
             for update skip locked
        )
        update marketplace_outbox
           set status = 'inflight'
         where message_id in (select message_id from to_claim)
        returning message_id, tenant_id, item_id, provider, kind, from_seq_exclusive,
                  to_seq_inclusive, idempotency_key, status, attempt, next_attempt_at,
                  last_error, correlation_id, created_at
        "#,
    )
    .bind(batch_size)
    .bind(now)
    .fetch_all(pool)
    .await
    .context("outbox claim_batch failed")?;

    rows.into_iter().map(row_to_message).collect()
}

pub async fn fetch_by_idempotency_key<'c, E>(
    executor: E,
    idempotency_key: &str,
) -> Result<Option<MarketplaceOutboxMessage>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select message_id, tenant_id, item_id, provider, kind, from_seq_exclusive,
               to_seq_inclusive, idempotency_key, status, attempt, next_attempt_at,
               last_error, correlation_id, created_at
          from marketplace_outbox
         where idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(executor)
    .await
    .context("fetch_by_idempotency_key failed")?;

    row.map(row_to_message).transpose()
}

pub async fn list_nonterminal_for_item<'c, E>(
    executor: E,
    item_id: Uuid,
) -> Result<Vec<MarketplaceOutboxMessage>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        select message_id, tenant_id, item_id, provider, kind, from_seq_exclusive,
               to_seq_inclusive, idempotency_key, status, attempt, next_attempt_at,
               last_error, correlation_id, created_at
          from marketplace_outbox
         where item_id = $1
           and status in ('pending', 'inflight')
         order by next_attempt_at asc
        "#,
    )
    .bind(item_id)
    .fetch_all(executor)
    .await
    .context("list_nonterminal_for_item failed")?;

    rows.into_iter().map(row_to_message).collect()
}

/// Revert a claimed row back to `pending` without incrementing `attempt` —
/// used when acquisition of a rate-limit token is denied.
pub async fn revert_to_pending_without_attempt<'c, E>(
    executor: E,
    message_id: Uuid,
    next_attempt_at: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update marketplace_outbox
           set status = 'pending', next_attempt_at = $2
         where message_id = $1 and status = 'inflight'
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(next_attempt_at)
    .fetch_optional(executor)
    .await
    .context("revert_to_pending_without_attempt failed")?;
    Ok(row.is_some())
}

/// Mark an `inflight` row `succeeded`. Does not touch the item row — the
/// caller advances `marketplaceSync[provider]` in the same transaction via
/// `inv_db::item::set_provider_sync_state`.
pub async fn mark_succeeded<'c, E>(executor: E, message_id: Uuid) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update marketplace_outbox
           set status = 'succeeded'
         where message_id = $1 and status = 'inflight'
        returning message_id
        "#,
    )
    .bind(message_id)
    .fetch_optional(executor)
    .await
    .context("mark_succeeded failed")?;
    Ok(row.is_some())
}

/// Terminal failure (`PermanentUpstream` / `MissingMapping`): marks `failed`
/// without advancing the cursor. Requires human intervention per spec.
pub async fn mark_failed_permanent<'c, E>(
    executor: E,
    message_id: Uuid,
    last_error: &str,
) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update marketplace_outbox
           set status = 'failed', last_error = $2
         where message_id = $1 and status = 'inflight'
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(last_error)
    .fetch_optional(executor)
    .await
    .context("mark_failed_permanent failed")?;
    Ok(row.is_some())
}

/// Increment `attempt` after a transient/rate-limited failure and either
/// reschedule to `pending` or transition to terminal `failed` once
/// `attempt >= max_attempts`. Runs as two statements against the same
/// connection so the attempt count used for the decision is read back from
/// the increment itself, never a stale copy.
pub async fn reschedule_or_fail(
    conn: &mut PgConnection,
    message_id: Uuid,
    max_attempts: u32,
    next_attempt_at: DateTime<Utc>,
    last_error: &str,
) -> Result<OutboxStatus> {
    let (attempt,): (i32,) = sqlx::query_as(
        r#"
        update marketplace_outbox
           set attempt = attempt + 1, last_error = $2
         where message_id = $1 and status = 'inflight'
        returning attempt
        "#,
    )
    .bind(message_id)
    .bind(last_error)
    .fetch_one(&mut *conn)
    .await
    .context("reschedule_or_fail attempt increment failed")?;

    if attempt as u32 >= max_attempts {
        sqlx::query("update marketplace_outbox set status = 'failed' where message_id = $1")
            .bind(message_id)
            .execute(&mut *conn)
            .await
            .context("reschedule_or_fail terminal transition failed")?;
        Ok(OutboxStatus::Failed)
    } else {
        sqlx::query(
            "update marketplace_outbox set status = 'pending', next_attempt_at = $2 where message_id = $1",
        )
        .bind(message_id)
        .bind(next_attempt_at)
        .execute(&mut *conn)
        .await
        .context("reschedule_or_fail reschedule failed")?;
        Ok(OutboxStatus::Pending)
    }
}

/// Admin operation: move a `failed` row back to `pending` with a reset
/// attempt counter, for operator-driven retry after the underlying cause
/// (a bad mapping, an upstream outage) has been fixed by hand. Only acts on
/// rows currently `failed` — a no-op on anything else.
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
        update marketplace_outbox
           set status = 'pending', attempt = 0, next_attempt_at = $2
         where message_id = $1 and status = 'failed'
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("requeue_failed failed")?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_round_trip() {
        for k in [OutboxKind::Create, OutboxKind::Update, OutboxKind::Delete] {
            assert_eq!(kind_from_str(kind_to_str(k)), k);
        }
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Inflight,
            OutboxStatus::Succeeded,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status_from_str(status_to_str(s)), s);
        }
    }
}
