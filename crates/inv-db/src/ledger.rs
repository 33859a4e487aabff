use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use inv_schemas::{LedgerReason, LedgerSource, QuantityLedgerEntry};
use sqlx::{Executor, PgConnection, Postgres, Row};
use uuid::Uuid;

fn reason_to_str(r: LedgerReason) -> &'static str {
    match r {
        LedgerReason::UserEdit => "user_edit",
        LedgerReason::Order => "order",
        LedgerReason::Import => "import",
        LedgerReason::SystemAdjustment => "system_adjustment",
        LedgerReason::Create => "create",
        LedgerReason::Delete => "delete",
    }
}

fn reason_from_str(s: &str) -> LedgerReason {
    match s {
        "order" => LedgerReason::Order,
        "import" => LedgerReason::Import,
        "system_adjustment" => LedgerReason::SystemAdjustment,
        "create" => LedgerReason::Create,
        "delete" => LedgerReason::Delete,
        _ => LedgerReason::UserEdit,
    }
}

fn source_to_str(s: LedgerSource) -> &'static str {
    match s {
        LedgerSource::User => "user",
        LedgerSource::Order => "order",
        LedgerSource::Import => "import",
        LedgerSource::System => "system",
    }
}

fn source_from_str(s: &str) -> LedgerSource {
    match s {
        "order" => LedgerSource::Order,
        "import" => LedgerSource::Import,
        "system" => LedgerSource::System,
        _ => LedgerSource::User,
    }
}

fn row_to_entry(row: sqlx::postgres::PgRow) -> Result<QuantityLedgerEntry> {
    let reason: String = row.try_get("reason")?;
    let source: String = row.try_get("source")?;
    Ok(QuantityLedgerEntry {
        item_id: row.try_get("item_id")?,
        seq: row.try_get("seq")?,
        timestamp: row.try_get("timestamp")?,
        pre_available: row.try_get("pre_available")?,
        delta_available: row.try_get("delta_available")?,
        post_available: row.try_get("post_available")?,
        reason: reason_from_str(&reason),
        source: source_from_str(&source),
        actor_id: row.try_get("actor_id")?,
        correlation_id: row.try_get("correlation_id")?,
    })
}

/// Error surfaced when an append would violate the non-negative-quantity
/// invariant. Synchronous and rejected before any row is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeQuantity {
    pub item_id: Uuid,
    pub attempted_post_available: i64,
}

impl std::fmt::Display for NegativeQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ledger append for item {} would result in negative available quantity ({})",
            self.item_id, self.attempted_post_available
        )
    }
}

impl std::error::Error for NegativeQuantity {}

async fn last_entry<'c, E>(executor: E, item_id: Uuid) -> Result<Option<QuantityLedgerEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select item_id, seq, "timestamp", pre_available, delta_available, post_available,
               reason, source, actor_id, correlation_id
          from quantity_ledger
         where item_id = $1
         order by seq desc
         limit 1
        "#,
    )
    .bind(item_id)
    .fetch_optional(executor)
    .await
    .context("quantity_ledger last_entry query failed")?;

    row.map(row_to_entry).transpose()
}

/// Append one quantity ledger entry for `item_id`. Computes `seq` and
/// `pre_available` from the last entry (or the zero-state if none exists),
/// rejecting with `NegativeQuantity` if the resulting `post_available` would
/// go below zero. Must run inside the same transaction as the item patch and
/// outbox enqueue it's paired with (C8).
pub async fn append(
    conn: &mut PgConnection,
    item_id: Uuid,
    delta: i64,
    reason: LedgerReason,
    source: LedgerSource,
    actor_id: Option<Uuid>,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<QuantityLedgerEntry> {
    let prev = last_entry(&mut *conn, item_id).await?;
    let (seq, pre_available) = match &prev {
        Some(p) => (p.seq + 1, p.post_available),
        None => (1, 0),
    };
    let post_available = pre_available + delta;
    if post_available < 0 {
        bail!(NegativeQuantity {
            item_id,
            attempted_post_available: post_available,
        });
    }

    sqlx::query(
        r#"
        insert into quantity_ledger
            (item_id, seq, "timestamp", pre_available, delta_available, post_available,
             reason, source, actor_id, correlation_id)
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        "#,
    )
    .bind(item_id)
    .bind(seq)
    .bind(now)
    .bind(pre_available)
    .bind(delta)
    .bind(post_available)
    .bind(reason_to_str(reason))
    .bind(source_to_str(source))
    .bind(actor_id)
    .bind(correlation_id)
    .execute(&mut *conn)
    .await
    .context("quantity_ledger insert failed")?;

    Ok(QuantityLedgerEntry {
        item_id,
        seq,
        timestamp: now,
        pre_available,
        delta_available: delta,
        post_available,
        reason,
        source,
        actor_id,
        correlation_id,
    })
}

/// Sum of `deltaAvailable` over the half-open range `(fromSeqExclusive,
/// toSeqInclusive]`. Used by the drain worker to reconstruct the net change
/// a given outbox row must carry.
pub async fn compute_delta_window<'c, E>(
    executor: E,
    item_id: Uuid,
    from_seq_exclusive: i64,
    to_seq_inclusive: i64,
) -> Result<i64>
where
    E: Executor<'c, Database = Postgres>,
{
    let (sum,): (Option<i64>,) = sqlx::query_as(
        r#"
        select sum(delta_available)
          from quantity_ledger
         where item_id = $1
           and seq > $2
           and seq <= $3
        "#,
    )
    .bind(item_id)
    .bind(from_seq_exclusive)
    .bind(to_seq_inclusive)
    .fetch_one(executor)
    .await
    .context("compute_delta_window failed")?;

    Ok(sum.unwrap_or(0))
}

pub async fn get_entry_at<'c, E>(
    executor: E,
    item_id: Uuid,
    seq: i64,
) -> Result<Option<QuantityLedgerEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select item_id, seq, "timestamp", pre_available, delta_available, post_available,
               reason, source, actor_id, correlation_id
          from quantity_ledger
         where item_id = $1 and seq = $2
        "#,
    )
    .bind(item_id)
    .bind(seq)
    .fetch_optional(executor)
    .await
    .context("get_entry_at failed")?;

    row.map(row_to_entry).transpose()
}

pub async fn max_seq<'c, E>(executor: E, item_id: Uuid) -> Result<i64>
where
    E: Executor<'c, Database = Postgres>,
{
    Ok(last_entry(executor, item_id).await?.map(|e| e.seq).unwrap_or(0))
}

/// Append one location ledger entry, parallel contract to the quantity
/// ledger but without a non-negativity invariant.
pub async fn append_location(
    conn: &mut PgConnection,
    item_id: Uuid,
    from_location: Option<String>,
    to_location: String,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i64> {
    let (prev_seq,): (Option<i64>,) = sqlx::query_as(
        "select max(seq) from location_ledger where item_id = $1",
    )
    .bind(item_id)
    .fetch_one(&mut *conn)
    .await
    .context("location_ledger max seq query failed")?;
    let seq = prev_seq.unwrap_or(0) + 1;

    sqlx::query(
        r#"
        insert into location_ledger (item_id, seq, "timestamp", from_location, to_location, correlation_id)
        values ($1,$2,$3,$4,$5,$6)
        "#,
    )
    .bind(item_id)
    .bind(seq)
    .bind(now)
    .bind(from_location)
    .bind(to_location)
    .bind(correlation_id)
    .execute(&mut *conn)
    .await
    .context("location_ledger insert failed")?;

    Ok(seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_and_source_round_trip() {
        for r in [
            LedgerReason::UserEdit,
            LedgerReason::Order,
            LedgerReason::Import,
            LedgerReason::SystemAdjustment,
            LedgerReason::Create,
            LedgerReason::Delete,
        ] {
            assert_eq!(reason_from_str(reason_to_str(r)), r);
        }
        for s in [
            LedgerSource::User,
            LedgerSource::Order,
            LedgerSource::Import,
            LedgerSource::System,
        ] {
            assert_eq!(source_from_str(source_to_str(s)), s);
        }
    }

    #[test]
    fn negative_quantity_error_message_names_the_item() {
        let item_id = Uuid::nil();
        let err = NegativeQuantity {
            item_id,
            attempted_post_available: -3,
        };
        assert!(err.to_string().contains(&item_id.to_string()));
        assert!(err.to_string().contains("-3"));
    }
}
