//! Fixture builders for `InventoryItem` and ledger rows. Every field has a
//! sane default so a test only needs to override what it's actually
//! exercising.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use inv_schemas::{
    Condition, InventoryItem, LedgerReason, LedgerSource, Provider, ProviderSyncState,
    QuantityLedgerEntry,
};
use uuid::Uuid;

pub struct ItemBuilder {
    item: InventoryItem,
}

impl ItemBuilder {
    pub fn new(tenant_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            item: InventoryItem {
                item_id: Uuid::new_v4(),
                tenant_id,
                part_number: "3001".to_string(),
                color_id: "1".to_string(),
                location: None,
                condition: Condition::New,
                quantity_available: 10,
                quantity_reserved: 0,
                price_micros: None,
                notes: None,
                is_archived: false,
                file_id: None,
                created_at: now,
                updated_at: now,
                marketplace_sync: BTreeMap::new(),
            },
        }
    }

    pub fn item_id(mut self, item_id: Uuid) -> Self {
        self.item.item_id = item_id;
        self
    }

    pub fn part_number(mut self, part_number: impl Into<String>) -> Self {
        self.item.part_number = part_number.into();
        self
    }

    pub fn color_id(mut self, color_id: impl Into<String>) -> Self {
        self.item.color_id = color_id.into();
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.item.condition = condition;
        self
    }

    pub fn quantity_available(mut self, quantity_available: i64) -> Self {
        self.item.quantity_available = quantity_available;
        self
    }

    pub fn is_archived(mut self, is_archived: bool) -> Self {
        self.item.is_archived = is_archived;
        self
    }

    pub fn file_id(mut self, file_id: impl Into<String>) -> Self {
        self.item.file_id = Some(file_id.into());
        self
    }

    /// Enable a provider with the given sync state (default: `disabled()`
    /// on every provider not explicitly enabled here).
    pub fn with_provider(mut self, provider: Provider, state: ProviderSyncState) -> Self {
        self.item.marketplace_sync.insert(provider, state);
        self
    }

    pub fn build(self) -> InventoryItem {
        self.item
    }
}

/// A single quantity-ledger row continuing a given item's sequence.
pub fn quantity_ledger_entry(
    item_id: Uuid,
    seq: i64,
    pre_available: i64,
    delta_available: i64,
    reason: LedgerReason,
    now: DateTime<Utc>,
) -> QuantityLedgerEntry {
    QuantityLedgerEntry {
        item_id,
        seq,
        timestamp: now,
        pre_available,
        delta_available,
        post_available: pre_available + delta_available,
        reason,
        source: LedgerSource::User,
        actor_id: None,
        correlation_id: Uuid::new_v4(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_builder_fills_every_field_with_a_default() {
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let item = ItemBuilder::new(tenant_id, now).build();
        assert_eq!(item.tenant_id, tenant_id);
        assert_eq!(item.quantity_available, 10);
        assert!(!item.is_archived);
        assert!(item.marketplace_sync.is_empty());
    }

    #[test]
    fn quantity_ledger_entry_derives_post_available() {
        let entry = quantity_ledger_entry(
            Uuid::new_v4(),
            1,
            10,
            -3,
            LedgerReason::Order,
            Utc::now(),
        );
        assert_eq!(entry.post_available, 7);
    }
}
