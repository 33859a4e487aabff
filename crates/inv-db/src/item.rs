use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use inv_schemas::{
    Condition, FilterPredicate, InventoryItem, ItemField, ItemFilter, ItemPage, ItemPatch,
    Provider, ProviderSyncState, QuerySpec, SortSpec,
};
use sqlx::{Executor, PgPool, Postgres, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

fn condition_to_str(c: Condition) -> &'static str {
    match c {
        Condition::New => "new",
        Condition::Used => "used",
    }
}

fn condition_from_str(s: &str) -> Condition {
    match s {
        "used" => Condition::Used,
        _ => Condition::New,
    }
}

fn marketplace_sync_to_json(sync: &BTreeMap<Provider, ProviderSyncState>) -> serde_json::Value {
    serde_json::to_value(sync).expect("ProviderSyncState map always serializes")
}

fn marketplace_sync_from_json(v: serde_json::Value) -> BTreeMap<Provider, ProviderSyncState> {
    serde_json::from_value(v).unwrap_or_default()
}

fn row_to_item(row: sqlx::postgres::PgRow) -> Result<InventoryItem> {
    let condition: String = row.try_get("condition")?;
    let sync_json: serde_json::Value = row.try_get("marketplace_sync")?;
    Ok(InventoryItem {
        item_id: row.try_get("item_id")?,
        tenant_id: row.try_get("tenant_id")?,
        part_number: row.try_get("part_number")?,
        color_id: row.try_get("color_id")?,
        location: row.try_get("location")?,
        condition: condition_from_str(&condition),
        quantity_available: row.try_get("quantity_available")?,
        quantity_reserved: row.try_get("quantity_reserved")?,
        price_micros: row.try_get("price_micros")?,
        notes: row.try_get("notes")?,
        is_archived: row.try_get("is_archived")?,
        file_id: row.try_get("file_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        marketplace_sync: marketplace_sync_from_json(sync_json),
    })
}

const ITEM_COLUMNS: &str = "item_id, tenant_id, part_number, color_id, location, condition, \
     quantity_available, quantity_reserved, price_micros, notes, is_archived, file_id, created_at, \
     updated_at, marketplace_sync";

pub async fn insert_item<'c, E>(executor: E, item: &InventoryItem) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(&format!(
        "insert into inventory_items ({ITEM_COLUMNS}) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)"
    ))
    .bind(item.item_id)
    .bind(item.tenant_id)
    .bind(&item.part_number)
    .bind(&item.color_id)
    .bind(&item.location)
    .bind(condition_to_str(item.condition))
    .bind(item.quantity_available)
    .bind(item.quantity_reserved)
    .bind(item.price_micros)
    .bind(&item.notes)
    .bind(item.is_archived)
    .bind(&item.file_id)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(marketplace_sync_to_json(&item.marketplace_sync))
    .execute(executor)
    .await
    .context("insert_item failed")?;
    Ok(())
}

pub async fn fetch_item<'c, E>(executor: E, item_id: Uuid) -> Result<Option<InventoryItem>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(&format!(
        "select {ITEM_COLUMNS} from inventory_items where item_id = $1"
    ))
    .bind(item_id)
    .fetch_optional(executor)
    .await
    .context("fetch_item failed")?;

    row.map(row_to_item).transpose()
}

/// Fetch an item row for update within the caller's transaction, locking it
/// against concurrent patches. Must be called inside a transaction.
pub async fn fetch_item_for_update<'c, E>(
    executor: E,
    item_id: Uuid,
) -> Result<Option<InventoryItem>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(&format!(
        "select {ITEM_COLUMNS} from inventory_items where item_id = $1 for update"
    ))
    .bind(item_id)
    .fetch_optional(executor)
    .await
    .context("fetch_item_for_update failed")?;

    row.map(row_to_item).transpose()
}

/// Exact-replacement patch: only the named subfields on `patch` are
/// overwritten, with no implicit merge of nested values.
pub async fn apply_item_patch<'c, E>(
    executor: E,
    item_id: Uuid,
    patch: &ItemPatch,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    // Each Option<Option<T>> field means "Some(x) => replace", "None => leave alone".
    sqlx::query(
        r#"
        update inventory_items
           set location    = case when $2 then $3 else location end,
               condition   = coalesce($4, condition),
               price_micros = case when $5 then $6 else price_micros end,
               notes       = case when $7 then $8 else notes end,
               updated_at  = $9
         where item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(patch.location.is_some())
    .bind(patch.location.clone().flatten())
    .bind(patch.condition.map(condition_to_str))
    .bind(patch.price_micros.is_some())
    .bind(patch.price_micros.flatten())
    .bind(patch.notes.is_some())
    .bind(patch.notes.clone().flatten())
    .bind(now)
    .execute(executor)
    .await
    .context("apply_item_patch failed")?;
    Ok(())
}

pub async fn set_quantity_available<'c, E>(
    executor: E,
    item_id: Uuid,
    quantity_available: i64,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "update inventory_items set quantity_available = $2, updated_at = $3 where item_id = $1",
    )
    .bind(item_id)
    .bind(quantity_available)
    .bind(now)
    .execute(executor)
    .await
    .context("set_quantity_available failed")?;
    Ok(())
}

pub async fn set_archived<'c, E>(executor: E, item_id: Uuid, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("update inventory_items set is_archived = true, updated_at = $2 where item_id = $1")
        .bind(item_id)
        .bind(now)
        .execute(executor)
        .await
        .context("set_archived failed")?;
    Ok(())
}

/// `addItemToFile`/`removeItemFromFile` (spec.md §6): `file_id = None` clears
/// the grouping. An item belongs to at most one file, so assigning a new one
/// implicitly replaces the old.
pub async fn set_file_id<'c, E>(
    executor: E,
    item_id: Uuid,
    file_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("update inventory_items set file_id = $2, updated_at = $3 where item_id = $1")
        .bind(item_id)
        .bind(file_id)
        .bind(now)
        .execute(executor)
        .await
        .context("set_file_id failed")?;
    Ok(())
}

/// Replace one provider's sync subfields wholesale — no merge with the rest
/// of the `marketplace_sync` map, matching the "no silent merge" design note.
pub async fn set_provider_sync_state<'c, E>(
    executor: E,
    item_id: Uuid,
    provider: Provider,
    state: &ProviderSyncState,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        update inventory_items
           set marketplace_sync = jsonb_set(marketplace_sync, $2, $3::jsonb, true)
         where item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(vec![provider.to_string()])
    .bind(serde_json::to_value(state).expect("ProviderSyncState always serializes"))
    .execute(executor)
    .await
    .context("set_provider_sync_state failed")?;
    Ok(())
}

const MAX_PAGE_SIZE: u32 = 100;

fn item_field_column(field: ItemField) -> &'static str {
    match field {
        ItemField::ItemId => "item_id",
        ItemField::PartNumber => "part_number",
        ItemField::ColorId => "color_id",
        ItemField::Condition => "condition",
        ItemField::IsArchived => "is_archived",
        ItemField::QuantityAvailable => "quantity_available",
        ItemField::CreatedAt => "created_at",
    }
}

enum BindVal {
    Text(String),
    Bool(bool),
    I64(i64),
    Uuid(Uuid),
    Ts(DateTime<Utc>),
}

/// A resolved sort column plus direction, with `item_id` always the final
/// entry so cursor resumption has a unique tiebreaker.
struct SortColumn {
    col: &'static str,
    desc: bool,
}

fn resolve_sort_columns(sort: &[SortSpec]) -> Vec<SortColumn> {
    let mut columns: Vec<SortColumn> = if sort.is_empty() {
        vec![SortColumn {
            col: item_field_column(ItemField::CreatedAt),
            desc: false,
        }]
    } else {
        sort.iter()
            .map(|s| SortColumn {
                col: item_field_column(s.field),
                desc: s.desc,
            })
            .collect()
    };
    if columns.last().map(|c| c.col) != Some("item_id") {
        columns.push(SortColumn {
            col: "item_id",
            desc: false,
        });
    }
    columns
}

/// `listItems(spec)` (spec.md §6): filtered, sorted, keyset-paginated read
/// over `inventory_items`, always scoped to one tenant. The cursor resumes
/// from an opaque `itemId` by comparing each sort column against the cursor
/// row's own value, column by column, with `item_id` as the final
/// tiebreaker — stable even as new items are appended, since later rows
/// never shift earlier ones.
pub async fn list_items(pool: &PgPool, tenant_id: Uuid, spec: &QuerySpec) -> Result<ItemPage> {
    let page_size = spec.pagination.page_size.clamp(1, MAX_PAGE_SIZE) as i64;
    let sort_columns = resolve_sort_columns(&spec.sort);
    let order_by = sort_columns
        .iter()
        .map(|c| format!("{} {}", c.col, if c.desc { "desc" } else { "asc" }))
        .collect::<Vec<_>>()
        .join(", ");

    let mut clauses = vec!["tenant_id = $1".to_string()];
    let mut binds = vec![BindVal::Uuid(tenant_id)];

    for filter in &spec.filters {
        let col = item_field_column(filter.field);
        match (&filter.predicate, filter.field) {
            (FilterPredicate::Eq { value }, ItemField::Condition) => {
                let s = value
                    .as_str()
                    .context("condition filter requires a string value")?;
                binds.push(BindVal::Text(condition_to_str(condition_from_str(s)).to_string()));
                clauses.push(format!("{col} = ${}", binds.len()));
            }
            (FilterPredicate::Eq { value }, ItemField::IsArchived) => {
                let b = value
                    .as_bool()
                    .context("is_archived filter requires a bool value")?;
                binds.push(BindVal::Bool(b));
                clauses.push(format!("{col} = ${}", binds.len()));
            }
            (FilterPredicate::Eq { value }, ItemField::PartNumber | ItemField::ColorId) => {
                let s = value
                    .as_str()
                    .context("filter requires a string value")?
                    .to_string();
                binds.push(BindVal::Text(s));
                clauses.push(format!("{col} = ${}", binds.len()));
            }
            (FilterPredicate::Eq { value }, ItemField::ItemId) => {
                let s = value
                    .as_str()
                    .context("item_id filter requires a uuid string")?;
                let id = Uuid::parse_str(s).context("item_id filter value is not a valid uuid")?;
                binds.push(BindVal::Uuid(id));
                clauses.push(format!("{col} = ${}", binds.len()));
            }
            (FilterPredicate::Prefix { prefix }, ItemField::PartNumber | ItemField::ColorId) => {
                let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
                binds.push(BindVal::Text(format!("{escaped}%")));
                clauses.push(format!("{col} like ${} escape '\\'", binds.len()));
            }
            (FilterPredicate::Range { min, max }, ItemField::QuantityAvailable) => {
                if let Some(min) = min {
                    let v = min
                        .as_i64()
                        .context("quantity_available min must be an integer")?;
                    binds.push(BindVal::I64(v));
                    clauses.push(format!("{col} >= ${}", binds.len()));
                }
                if let Some(max) = max {
                    let v = max
                        .as_i64()
                        .context("quantity_available max must be an integer")?;
                    binds.push(BindVal::I64(v));
                    clauses.push(format!("{col} <= ${}", binds.len()));
                }
            }
            (FilterPredicate::Range { min, max }, ItemField::CreatedAt) => {
                if let Some(min) = min {
                    let v: DateTime<Utc> = serde_json::from_value(min.clone())
                        .context("created_at min must be an RFC3339 timestamp")?;
                    binds.push(BindVal::Ts(v));
                    clauses.push(format!("{col} >= ${}", binds.len()));
                }
                if let Some(max) = max {
                    let v: DateTime<Utc> = serde_json::from_value(max.clone())
                        .context("created_at max must be an RFC3339 timestamp")?;
                    binds.push(BindVal::Ts(v));
                    clauses.push(format!("{col} <= ${}", binds.len()));
                }
            }
            (_, field) => bail!("unsupported filter predicate for field {field:?}"),
        }
    }

    let cursor_param = spec.pagination.cursor.map(|cursor| {
        binds.push(BindVal::Uuid(cursor));
        binds.len()
    });

    let where_clause = clauses.join(" and ");
    let sql = if let Some(cursor_param) = cursor_param {
        // Row-value comparison doesn't generalize across columns with mixed
        // sort directions, so resumption is an OR of per-column "ties so far,
        // this column moves past the cursor" conjunctions instead.
        let cursor_select = sort_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} as sort_val_{i}", c.col))
            .collect::<Vec<_>>()
            .join(", ");
        let cursor_clause = (0..sort_columns.len())
            .map(|i| {
                let mut conj = (0..i)
                    .map(|j| format!("inventory_items.{} = cursor_row.sort_val_{j}", sort_columns[j].col))
                    .collect::<Vec<_>>();
                let cmp = if sort_columns[i].desc { "<" } else { ">" };
                conj.push(format!(
                    "inventory_items.{} {cmp} cursor_row.sort_val_{i}",
                    sort_columns[i].col
                ));
                format!("({})", conj.join(" and "))
            })
            .collect::<Vec<_>>()
            .join(" or ");

        format!(
            r#"
            with cursor_row as (
                select {cursor_select}
                  from inventory_items
                 where item_id = ${cursor_param}
            )
            select {ITEM_COLUMNS}
              from inventory_items, cursor_row
             where {where_clause}
               and ({cursor_clause})
             order by {order_by}
             limit {limit}
            "#,
            limit = page_size + 1
        )
    } else {
        format!(
            r#"
            select {ITEM_COLUMNS}
              from inventory_items
             where {where_clause}
             order by {order_by}
             limit {limit}
            "#,
            limit = page_size + 1
        )
    };

    let mut query = sqlx::query(&sql);
    for bind in binds {
        query = match bind {
            BindVal::Text(s) => query.bind(s),
            BindVal::Bool(b) => query.bind(b),
            BindVal::I64(v) => query.bind(v),
            BindVal::Uuid(u) => query.bind(u),
            BindVal::Ts(t) => query.bind(t),
        };
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("list_items failed")?;

    let mut items = rows.into_iter().map(row_to_item).collect::<Result<Vec<_>>>()?;
    let next_cursor = if items.len() > page_size as usize {
        items.truncate(page_size as usize);
        items.last().map(|item| item.item_id)
    } else {
        None
    };

    Ok(ItemPage { items, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_round_trips() {
        assert_eq!(condition_from_str(condition_to_str(Condition::New)), Condition::New);
        assert_eq!(condition_from_str(condition_to_str(Condition::Used)), Condition::Used);
    }

    #[test]
    fn marketplace_sync_json_round_trips() {
        let mut map = BTreeMap::new();
        map.insert(Provider::A, ProviderSyncState::pending());
        let json = marketplace_sync_to_json(&map);
        let back = marketplace_sync_from_json(json);
        assert_eq!(back.len(), 1);
        assert_eq!(back[&Provider::A].status, inv_schemas::ProviderSyncStatus::Pending);
    }

    #[test]
    fn item_field_column_covers_every_variant() {
        for field in [
            ItemField::ItemId,
            ItemField::PartNumber,
            ItemField::ColorId,
            ItemField::Condition,
            ItemField::IsArchived,
            ItemField::QuantityAvailable,
            ItemField::CreatedAt,
        ] {
            assert!(!item_field_column(field).is_empty());
        }
    }

    #[test]
    fn resolve_sort_columns_appends_item_id_tiebreaker() {
        let cols = resolve_sort_columns(&[SortSpec {
            field: ItemField::QuantityAvailable,
            desc: true,
        }]);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].col, "quantity_available");
        assert!(cols[0].desc);
        assert_eq!(cols[1].col, "item_id");
        assert!(!cols[1].desc);
    }

    #[test]
    fn resolve_sort_columns_does_not_duplicate_an_explicit_item_id_sort() {
        let cols = resolve_sort_columns(&[SortSpec {
            field: ItemField::ItemId,
            desc: true,
        }]);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].col, "item_id");
        assert!(cols[0].desc);
    }

    #[test]
    fn resolve_sort_columns_defaults_to_created_at_when_empty() {
        let cols = resolve_sort_columns(&[]);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].col, "created_at");
        assert_eq!(cols[1].col, "item_id");
    }
}
