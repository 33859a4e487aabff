//! Shared test fixtures for the inventory reconciliation engine: a scripted
//! `ProviderAdapter` for exercising `inv-drain`/`inv-catalog` against
//! controlled upstream outcomes, and builders for `InventoryItem`/ledger
//! rows so scenario tests don't hand-assemble every field.

pub mod builders;
pub mod scripted_adapter;

pub use builders::{quantity_ledger_entry, ItemBuilder};
pub use scripted_adapter::{RecordedCall, ScriptedAdapter};
