//! Transactional edit orchestration (C8): every mutation to an inventory
//! item — create, patch, delete, or a raw quantity adjustment — commits the
//! item row, the ledger append(s), and one outbox row per enabled provider
//! as a single transaction. There is no path that writes the item without
//! also writing the ledger and the outbox; the durability guarantee the
//! outbox pattern rests on depends on that.

use chrono::{DateTime, Utc};
use inv_schemas::{
    Condition, CreateItemFields, EditIntent, InventoryItem, ItemPatch, LedgerReason, LedgerSource,
    OutboxKind, Provider, ProviderSyncState,
};
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    Validation(String),
    Auth(String),
    NotFound(Uuid),
    NegativeQuantity { item_id: Uuid, attempted: i64 },
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::Validation(msg) => write!(f, "validation error: {msg}"),
            EditError::Auth(msg) => write!(f, "auth error: {msg}"),
            EditError::NotFound(id) => write!(f, "item {id} not found"),
            EditError::NegativeQuantity { item_id, attempted } => write!(
                f,
                "edit for item {item_id} would result in negative available quantity ({attempted})"
            ),
        }
    }
}

impl std::error::Error for EditError {}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub item_id: Uuid,
    pub archived: bool,
}

fn authorize(actor_id: Uuid) -> Result<(), EditError> {
    if actor_id.is_nil() {
        return Err(EditError::Auth("actor_id must not be nil".to_string()));
    }
    Ok(())
}

fn validate_create(fields: &CreateItemFields) -> Result<(), EditError> {
    if fields.part_number.trim().is_empty() {
        return Err(EditError::Validation("part_number must not be empty".to_string()));
    }
    if fields.color_id.trim().is_empty() {
        return Err(EditError::Validation("color_id must not be empty".to_string()));
    }
    if fields.quantity_available < 0 {
        return Err(EditError::Validation("quantity_available must be non-negative".to_string()));
    }
    Ok(())
}

fn initial_marketplace_sync(enabled_providers: &[Provider]) -> BTreeMap<Provider, ProviderSyncState> {
    [Provider::A, Provider::B]
        .into_iter()
        .map(|p| {
            let state = if enabled_providers.contains(&p) {
                ProviderSyncState::pending()
            } else {
                ProviderSyncState::disabled()
            };
            (p, state)
        })
        .collect()
}

/// Apply one tagged edit. Authorizes the actor, then runs the whole mutation
/// — item patch, ledger append(s), per-provider outbox enqueue, and the
/// `marketplaceSync[p].status = pending` bump — inside a single transaction.
pub async fn apply_edit(
    pool: &PgPool,
    enabled_providers: &[Provider],
    tenant_id: Uuid,
    actor_id: Uuid,
    edit: EditIntent,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    authorize(actor_id)?;

    let mut tx = pool.begin().await?;

    let outcome = match edit {
        EditIntent::Create(fields) => {
            validate_create(&fields)?;
            create_item(&mut tx, enabled_providers, tenant_id, actor_id, fields, now).await?
        }
        EditIntent::Update {
            item_id,
            patch,
            reason,
            correlation_id,
        } => {
            update_item(
                &mut tx,
                enabled_providers,
                item_id,
                patch,
                reason,
                correlation_id.unwrap_or_else(Uuid::new_v4),
                now,
            )
            .await?
        }
        EditIntent::Delete { item_id, reason } => {
            delete_item(&mut tx, enabled_providers, item_id, reason, now).await?
        }
        EditIntent::Adjust {
            item_id,
            delta_available,
            reason,
            correlation_id,
        } => {
            adjust_item(
                &mut tx,
                enabled_providers,
                item_id,
                delta_available,
                reason,
                actor_id,
                correlation_id.unwrap_or_else(Uuid::new_v4),
                now,
            )
            .await?
        }
        EditIntent::AddToFile { item_id, file_id } => {
            set_file(&mut tx, item_id, Some(file_id), now).await?
        }
        EditIntent::RemoveFromFile { item_id } => set_file(&mut tx, item_id, None, now).await?,
    };

    tx.commit().await?;
    Ok(outcome)
}

async fn enqueue_for_enabled_providers(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    enabled_providers: &[Provider],
    tenant_id: Uuid,
    item_id: Uuid,
    item_marketplace_sync: &BTreeMap<Provider, ProviderSyncState>,
    kind: OutboxKind,
    current_seq: i64,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), anyhow::Error> {
    for provider in enabled_providers {
        let cur = item_marketplace_sync
            .get(provider)
            .map(|s| s.last_synced_seq)
            .unwrap_or(0);

        inv_db::outbox::enqueue(
            &mut **tx,
            tenant_id,
            item_id,
            *provider,
            kind,
            cur,
            current_seq,
            correlation_id,
            now,
        )
        .await?;

        let mut next_state = item_marketplace_sync
            .get(provider)
            .cloned()
            .unwrap_or_else(ProviderSyncState::pending);
        next_state.status = inv_schemas::ProviderSyncStatus::Pending;
        inv_db::item::set_provider_sync_state(&mut **tx, item_id, *provider, &next_state).await?;
    }
    Ok(())
}

async fn create_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    enabled_providers: &[Provider],
    tenant_id: Uuid,
    actor_id: Uuid,
    fields: CreateItemFields,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    let item_id = Uuid::new_v4();
    let marketplace_sync = initial_marketplace_sync(enabled_providers);

    let item = InventoryItem {
        item_id,
        tenant_id,
        part_number: fields.part_number,
        color_id: fields.color_id,
        location: fields.location.clone(),
        condition: fields.condition,
        quantity_available: fields.quantity_available,
        quantity_reserved: 0,
        price_micros: fields.price_micros,
        notes: fields.notes,
        is_archived: false,
        file_id: None,
        created_at: now,
        updated_at: now,
        marketplace_sync: marketplace_sync.clone(),
    };
    inv_db::item::insert_item(&mut **tx, &item).await?;

    let correlation_id = Uuid::new_v4();
    let entry = inv_db::ledger::append(
        &mut **tx,
        item_id,
        fields.quantity_available,
        LedgerReason::Create,
        LedgerSource::User,
        Some(actor_id),
        correlation_id,
        now,
    )
    .await
    .map_err(|e| match e.downcast::<inv_db::ledger::NegativeQuantity>() {
        Ok(nq) => anyhow::Error::new(EditError::NegativeQuantity {
            item_id: nq.item_id,
            attempted: nq.attempted_post_available,
        }),
        Err(e) => e,
    })?;

    if let Some(location) = fields.location {
        inv_db::ledger::append_location(&mut **tx, item_id, None, location, correlation_id, now)
            .await?;
    }

    enqueue_for_enabled_providers(
        tx,
        enabled_providers,
        tenant_id,
        item_id,
        &marketplace_sync,
        OutboxKind::Create,
        entry.seq,
        correlation_id,
        now,
    )
    .await?;

    Ok(EditOutcome {
        item_id,
        archived: false,
    })
}

async fn update_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    enabled_providers: &[Provider],
    item_id: Uuid,
    patch: ItemPatch,
    _reason: Option<String>,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    let item = inv_db::item::fetch_item_for_update(&mut **tx, item_id)
        .await?
        .ok_or(EditError::NotFound(item_id))?;

    inv_db::item::apply_item_patch(&mut **tx, item_id, &patch, now).await?;

    if let Some(new_location) = patch.location.clone() {
        if item.location.as_deref() != Some(new_location.as_str()) {
            inv_db::ledger::append_location(
                &mut **tx,
                item_id,
                item.location.clone(),
                new_location,
                correlation_id,
                now,
            )
            .await?;
        }
    }

    let current_seq = inv_db::ledger::max_seq(&mut **tx, item_id).await?;

    enqueue_for_enabled_providers(
        tx,
        enabled_providers,
        item.tenant_id,
        item_id,
        &item.marketplace_sync,
        OutboxKind::Update,
        current_seq,
        correlation_id,
        now,
    )
    .await?;

    Ok(EditOutcome {
        item_id,
        archived: false,
    })
}

async fn delete_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    enabled_providers: &[Provider],
    item_id: Uuid,
    _reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    let item = inv_db::item::fetch_item_for_update(&mut **tx, item_id)
        .await?
        .ok_or(EditError::NotFound(item_id))?;

    let correlation_id = Uuid::new_v4();
    let mut current_seq = inv_db::ledger::max_seq(&mut **tx, item_id).await?;

    if item.quantity_available != 0 {
        let entry = inv_db::ledger::append(
            &mut **tx,
            item_id,
            -item.quantity_available,
            LedgerReason::Delete,
            LedgerSource::User,
            None,
            correlation_id,
            now,
        )
        .await?;
        current_seq = entry.seq;
        inv_db::item::set_quantity_available(&mut **tx, item_id, 0, now).await?;
    }

    inv_db::item::set_archived(&mut **tx, item_id, now).await?;

    enqueue_for_enabled_providers(
        tx,
        enabled_providers,
        item.tenant_id,
        item_id,
        &item.marketplace_sync,
        OutboxKind::Delete,
        current_seq,
        correlation_id,
        now,
    )
    .await?;

    Ok(EditOutcome {
        item_id,
        archived: true,
    })
}

async fn adjust_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    enabled_providers: &[Provider],
    item_id: Uuid,
    delta_available: i64,
    _reason: Option<String>,
    actor_id: Uuid,
    correlation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    let item = inv_db::item::fetch_item_for_update(&mut **tx, item_id)
        .await?
        .ok_or(EditError::NotFound(item_id))?;

    let entry = inv_db::ledger::append(
        &mut **tx,
        item_id,
        delta_available,
        LedgerReason::UserEdit,
        LedgerSource::User,
        Some(actor_id),
        correlation_id,
        now,
    )
    .await
    .map_err(|e| match e.downcast::<inv_db::ledger::NegativeQuantity>() {
        Ok(nq) => anyhow::Error::new(EditError::NegativeQuantity {
            item_id: nq.item_id,
            attempted: nq.attempted_post_available,
        }),
        Err(e) => e,
    })?;

    inv_db::item::set_quantity_available(&mut **tx, item_id, entry.post_available, now).await?;

    enqueue_for_enabled_providers(
        tx,
        enabled_providers,
        item.tenant_id,
        item_id,
        &item.marketplace_sync,
        OutboxKind::Update,
        entry.seq,
        correlation_id,
        now,
    )
    .await?;

    Ok(EditOutcome {
        item_id,
        archived: false,
    })
}

/// `addItemToFile`/`removeItemFromFile`: file is a grouping label only, so
/// unlike the other intents this never touches the ledger or the outbox —
/// no marketplace sync is implied by moving an item between files.
async fn set_file(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    item_id: Uuid,
    file_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<EditOutcome, anyhow::Error> {
    if let Some(file_id) = &file_id {
        if file_id.trim().is_empty() {
            return Err(EditError::Validation("file_id must not be empty".to_string()).into());
        }
    }

    let item = inv_db::item::fetch_item_for_update(&mut **tx, item_id)
        .await?
        .ok_or(EditError::NotFound(item_id))?;

    inv_db::item::set_file_id(&mut **tx, item_id, file_id.as_deref(), now).await?;

    Ok(EditOutcome {
        item_id,
        archived: item.is_archived,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_rejects_nil_actor() {
        assert!(authorize(Uuid::nil()).is_err());
        assert!(authorize(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn validate_create_rejects_empty_part_number() {
        let fields = CreateItemFields {
            part_number: "".to_string(),
            color_id: "5".to_string(),
            location: None,
            condition: Condition::New,
            quantity_available: 1,
            price_micros: None,
            notes: None,
        };
        assert!(validate_create(&fields).is_err());
    }

    #[test]
    fn validate_create_rejects_negative_quantity() {
        let fields = CreateItemFields {
            part_number: "3001".to_string(),
            color_id: "5".to_string(),
            location: None,
            condition: Condition::New,
            quantity_available: -1,
            price_micros: None,
            notes: None,
        };
        assert!(validate_create(&fields).is_err());
    }

    #[test]
    fn initial_marketplace_sync_marks_disabled_providers() {
        let sync = initial_marketplace_sync(&[Provider::A]);
        assert_eq!(sync[&Provider::A].status, inv_schemas::ProviderSyncStatus::Pending);
        assert_eq!(sync[&Provider::B].status, inv_schemas::ProviderSyncStatus::Disabled);
    }
}
