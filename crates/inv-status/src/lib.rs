//! Read-side status projections (C10): `listItems` pagination over
//! `inventory_items`, and a per-item sync rollup combining the item's
//! `marketplace_sync` map with its still-open outbox rows.
//!
//! This crate never writes; every function here takes a `&PgPool` and is
//! safe to call from any request path without regard to an in-flight
//! transaction elsewhere in the system.

use anyhow::{Context, Result};
use inv_schemas::{ItemPage, ItemSyncStatus, QuerySpec};
use sqlx::PgPool;
use uuid::Uuid;

/// `listItems(spec)` (spec.md §6), scoped to one tenant.
pub async fn list_items(pool: &PgPool, tenant_id: Uuid, spec: &QuerySpec) -> Result<ItemPage> {
    inv_db::item::list_items(pool, tenant_id, spec)
        .await
        .context("list_items failed")
}

/// Per-item sync projection: the item's current `marketplace_sync` map plus
/// how many outbox rows are still non-terminal and when the soonest of them
/// is next due. Returns `None` if the item doesn't exist.
pub async fn get_item_sync_status(pool: &PgPool, item_id: Uuid) -> Result<Option<ItemSyncStatus>> {
    let item = match inv_db::item::fetch_item(pool, item_id)
        .await
        .context("fetch_item failed")?
    {
        Some(item) => item,
        None => return Ok(None),
    };

    let nonterminal = inv_db::outbox::list_nonterminal_for_item(pool, item_id)
        .await
        .context("list_nonterminal_for_item failed")?;

    let next_retry_at = nonterminal.iter().map(|m| m.next_attempt_at).min();

    Ok(Some(ItemSyncStatus {
        item_id: item.item_id,
        per_provider: item.marketplace_sync,
        pending_count: nonterminal.len() as i64,
        next_retry_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use inv_schemas::{MarketplaceOutboxMessage, OutboxKind, OutboxStatus, Provider};
    use uuid::Uuid;

    fn sample_message(next_attempt_at: chrono::DateTime<Utc>) -> MarketplaceOutboxMessage {
        MarketplaceOutboxMessage {
            message_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            provider: Provider::A,
            kind: OutboxKind::Update,
            from_seq_exclusive: 1,
            to_seq_inclusive: 2,
            idempotency_key: "k".into(),
            status: OutboxStatus::Pending,
            attempt: 0,
            next_attempt_at,
            last_error: None,
            correlation_id: Uuid::new_v4(),
            created_at: next_attempt_at,
        }
    }

    #[test]
    fn next_retry_at_picks_the_earliest_row() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let rows = vec![sample_message(later), sample_message(earlier)];
        let next = rows.iter().map(|m| m.next_attempt_at).min();
        assert_eq!(next, Some(earlier));
    }

    #[test]
    fn next_retry_at_is_none_when_no_rows() {
        let rows: Vec<MarketplaceOutboxMessage> = vec![];
        let next = rows.iter().map(|m| m.next_attempt_at).min();
        assert_eq!(next, None);
    }
}
