//! Shared DTOs for the inventory reconciliation engine.
//!
//! These types cross crate boundaries (db rows, adapter payloads, HTTP
//! bodies) so they stay free of any one crate's internal logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The two external marketplaces this engine mirrors inventory into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    A,
    B,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::A => "a",
            Provider::B => "b",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "a" => Some(Provider::A),
            "b" => Some(Provider::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    Used,
}

/// Per-provider sync state carried on an `InventoryItem`. Always present for
/// every enabled provider — there is no optional-chaining over a missing
/// entry; a not-configured provider is represented by `status = Disabled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSyncState {
    pub external_lot_id: Option<String>,
    pub status: ProviderSyncStatus,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    pub last_synced_seq: i64,
    pub last_synced_available: i64,
    pub last_error: Option<String>,
}

impl ProviderSyncState {
    pub fn disabled() -> Self {
        Self {
            external_lot_id: None,
            status: ProviderSyncStatus::Disabled,
            last_sync_attempt_at: None,
            last_synced_seq: 0,
            last_synced_available: 0,
            last_error: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            external_lot_id: None,
            status: ProviderSyncStatus::Pending,
            last_sync_attempt_at: None,
            last_synced_seq: 0,
            last_synced_available: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: Uuid,
    pub tenant_id: Uuid,
    pub part_number: String,
    pub color_id: String,
    pub location: Option<String>,
    pub condition: Condition,
    pub quantity_available: i64,
    pub quantity_reserved: i64,
    pub price_micros: Option<i64>,
    pub notes: Option<String>,
    pub is_archived: bool,
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub marketplace_sync: BTreeMap<Provider, ProviderSyncState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    UserEdit,
    Order,
    Import,
    SystemAdjustment,
    Create,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSource {
    User,
    Order,
    Import,
    System,
}

/// Append-only quantity ledger row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantityLedgerEntry {
    pub item_id: Uuid,
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub pre_available: i64,
    pub delta_available: i64,
    pub post_available: i64,
    pub reason: LedgerReason,
    pub source: LedgerSource,
    pub actor_id: Option<Uuid>,
    pub correlation_id: Uuid,
}

/// Append-only location ledger row, parallel contract to the quantity ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationLedgerEntry {
    pub item_id: Uuid,
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub from_location: Option<String>,
    pub to_location: String,
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Inflight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceOutboxMessage {
    pub message_id: Uuid,
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub provider: Provider,
    pub kind: OutboxKind,
    pub from_seq_exclusive: i64,
    pub to_seq_inclusive: i64,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempt: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl MarketplaceOutboxMessage {
    /// Canonical idempotency key derivation — the only place this string is
    /// built, so every caller (enqueue, retry, adapter) agrees on the value.
    pub fn derive_idempotency_key(
        item_id: Uuid,
        provider: Provider,
        from_seq_exclusive: i64,
        to_seq_inclusive: i64,
    ) -> String {
        format!("{item_id}:{provider}:{from_seq_exclusive}-{to_seq_inclusive}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogTableName {
    Part,
    PartColor,
    PriceGuide,
    Color,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
pub enum CatalogPriority {
    High = 1,
    Medium = 2,
    Low = 3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRefreshMessage {
    pub message_id: Uuid,
    pub table_name: CatalogTableName,
    pub primary_key: String,
    pub secondary_key: Option<String>,
    pub priority: CatalogPriority,
    pub last_fetched_hint: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub attempt: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub tenant_id: Uuid,
    pub provider: Provider,
    pub capacity: i32,
    pub window_duration_ms: i64,
    pub window_start: DateTime<Utc>,
    pub request_count: i32,
    pub consecutive_failures: i32,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

/// Tagged edit-intent variants, replacing the ad-hoc field-bag patches the
/// source system uses. Unknown fields on the wire are a validation error,
/// not silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditIntent {
    Create(CreateItemFields),
    Update {
        item_id: Uuid,
        patch: ItemPatch,
        reason: Option<String>,
        correlation_id: Option<Uuid>,
    },
    Delete {
        item_id: Uuid,
        reason: Option<String>,
    },
    Adjust {
        item_id: Uuid,
        delta_available: i64,
        reason: Option<String>,
        correlation_id: Option<Uuid>,
    },
    /// `addItemToFile(itemId, fileId)` (spec.md §6): groups an item under a
    /// user-defined file, replacing any file it was already in.
    AddToFile { item_id: Uuid, file_id: String },
    /// `removeItemFromFile(itemId)` (spec.md §6): ungroups an item, a no-op
    /// if it wasn't in a file.
    RemoveFromFile { item_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemFields {
    pub part_number: String,
    pub color_id: String,
    pub location: Option<String>,
    pub condition: Condition,
    pub quantity_available: i64,
    pub price_micros: Option<i64>,
    pub notes: Option<String>,
}

/// Exact-replacement patch semantics: every `Some` field overwrites the
/// named subfield wholesale; there is no implicit merge of nested values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    pub location: Option<String>,
    pub condition: Option<Condition>,
    pub price_micros: Option<Option<i64>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub part_number: String,
    pub name: String,
    pub category_id: String,
    pub last_fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Color {
    pub color_id: String,
    pub name: String,
    pub last_fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub category_id: String,
    pub name: String,
    pub last_fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartColor {
    pub part_number: String,
    pub color_id: String,
    pub last_fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartPrice {
    pub part_number: String,
    pub color_id: String,
    pub condition: Condition,
    pub stock: bool,
    pub avg_price_micros: i64,
    pub last_fetched_at: DateTime<Utc>,
}

/// Read-side per-item sync projection (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSyncStatus {
    pub item_id: Uuid,
    pub per_provider: BTreeMap<Provider, ProviderSyncState>,
    pub pending_count: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Fields `listItems` can filter or sort on. Deliberately scoped to the
/// columns `inventory_items` actually indexes for this; not every field on
/// `InventoryItem` is queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    ItemId,
    PartNumber,
    ColorId,
    Condition,
    IsArchived,
    QuantityAvailable,
    CreatedAt,
}

/// One filter predicate. `value`/`range`/`prefix` in spec.md's `QuerySpec`
/// map to the three variants here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPredicate {
    Eq { value: serde_json::Value },
    Range { min: Option<serde_json::Value>, max: Option<serde_json::Value> },
    Prefix { prefix: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFilter {
    pub field: ItemField,
    pub predicate: FilterPredicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: ItemField,
    pub desc: bool,
}

/// `pageSize` is clamped to spec.md's hard cap of 100 by the caller, not
/// rejected — an oversized request degrades to the max page rather than
/// erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub cursor: Option<Uuid>,
    pub page_size: u32,
}

/// `sort: [{id, desc}]` (spec.md §6): one or more sort columns, evaluated in
/// order — later entries only break ties left by earlier ones. `item_id` is
/// appended by `list_items` as an implicit final tiebreaker whenever it
/// isn't already the last entry here, so cursor resumption stays stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub filters: Vec<ItemFilter>,
    pub sort: Vec<SortSpec>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<InventoryItem>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub event_type: String,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_matches_spec_format() {
        let id = Uuid::nil();
        let key = MarketplaceOutboxMessage::derive_idempotency_key(id, Provider::A, 3, 7);
        assert_eq!(
            key,
            format!("{id}:a:3-7")
        );
    }

    #[test]
    fn provider_round_trips_through_str() {
        assert_eq!(Provider::parse("a"), Some(Provider::A));
        assert_eq!(Provider::parse("b"), Some(Provider::B));
        assert_eq!(Provider::parse("c"), None);
    }
}
