// crates/inv-db/src/lib.rs
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "INV_DATABASE_URL";

pub mod catalog;
pub mod item;
pub mod ledger;
pub mod outbox;
pub mod ratelimit_store;
pub mod tenant;
pub mod webhook;

pub use catalog::*;
pub use item::*;
pub use ledger::*;
pub use outbox::*;
pub use ratelimit_store::*;
pub use tenant::*;
pub use webhook::*;

/// Connect to Postgres using `INV_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper: connect using `INV_DATABASE_URL` and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_inventory_items_table: bool,
}

/// Simple status query (connectivity + schema presence), used by the CLI's
/// `db status` command and the daemon's startup check.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='inventory_items'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_inventory_items_table: exists,
    })
}

/// Garbage-collect terminal outbox rows older than `retention_days` from both
/// outboxes (spec §3/§4.5: 7-day retention for succeeded/failed rows).
pub async fn gc_terminal_outbox_rows(pool: &PgPool, retention_days: i64) -> Result<GcSummary> {
    let marketplace_deleted = sqlx::query(
        r#"
        delete from marketplace_outbox
        where status in ('succeeded', 'failed')
          and created_at < now() - ($1 || ' days')::interval
        "#,
    )
    .bind(retention_days.to_string())
    .execute(pool)
    .await
    .context("gc marketplace_outbox failed")?
    .rows_affected();

    let catalog_deleted = sqlx::query(
        r#"
        delete from catalog_refresh_outbox
        where status in ('succeeded', 'failed')
          and created_at < now() - ($1 || ' days')::interval
        "#,
    )
    .bind(retention_days.to_string())
    .execute(pool)
    .await
    .context("gc catalog_refresh_outbox failed")?
    .rows_affected();

    Ok(GcSummary {
        marketplace_outbox_deleted: marketplace_deleted,
        catalog_outbox_deleted: catalog_deleted,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcSummary {
    pub marketplace_outbox_deleted: u64,
    pub catalog_outbox_deleted: u64,
}
