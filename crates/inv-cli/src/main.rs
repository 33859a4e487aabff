use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "inv")]
#[command(about = "Inventory reconciliation engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Read-side item queries
    Item {
        #[command(subcommand)]
        cmd: ItemCmd,
    },

    /// Outbox admin operations
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum ItemCmd {
    /// Per-item sync rollup: marketplace_sync map + pending outbox count.
    Status {
        #[arg(long)]
        item_id: Uuid,
    },

    /// Page through a tenant's inventory, newest first.
    List {
        #[arg(long)]
        tenant_id: Uuid,

        #[arg(long)]
        cursor: Option<Uuid>,

        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Move a failed outbox row back to pending with a reset attempt count.
    Requeue {
        #[arg(long)]
        message_id: Uuid,

        /// Requeue a catalog_refresh_outbox row instead of marketplace_outbox.
        #[arg(long, default_value_t = false)]
        catalog: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = inv_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = inv_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_inventory_items_table={}",
                        s.ok, s.has_inventory_items_table
                    );
                }
                DbCmd::Migrate => {
                    inv_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Item { cmd } => {
            let pool = inv_db::connect_from_env().await?;
            match cmd {
                ItemCmd::Status { item_id } => {
                    match inv_status::get_item_sync_status(&pool, item_id).await? {
                        Some(status) => {
                            println!("item_id={}", status.item_id);
                            println!("pending_count={}", status.pending_count);
                            println!(
                                "next_retry_at={}",
                                status
                                    .next_retry_at
                                    .map(|t| t.to_rfc3339())
                                    .unwrap_or_else(|| "none".to_string())
                            );
                            println!(
                                "marketplace_sync={}",
                                serde_json::to_string(&status.per_provider)?
                            );
                        }
                        None => bail!("item {item_id} not found"),
                    }
                }
                ItemCmd::List {
                    tenant_id,
                    cursor,
                    page_size,
                } => {
                    let spec = inv_schemas::QuerySpec {
                        filters: vec![],
                        sort: vec![inv_schemas::SortSpec {
                            field: inv_schemas::ItemField::CreatedAt,
                            desc: true,
                        }],
                        pagination: inv_schemas::Pagination { cursor, page_size },
                    };
                    let page = inv_status::list_items(&pool, tenant_id, &spec).await?;
                    for item in &page.items {
                        println!(
                            "item_id={} part_number={} color_id={} quantity_available={}",
                            item.item_id, item.part_number, item.color_id, item.quantity_available
                        );
                    }
                    println!(
                        "next_cursor={}",
                        page.next_cursor
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "none".to_string())
                    );
                }
            }
        }

        Commands::Outbox { cmd } => {
            let pool = inv_db::connect_from_env().await?;
            match cmd {
                OutboxCmd::Requeue {
                    message_id,
                    catalog,
                } => {
                    let now = Utc::now();
                    let requeued = if catalog {
                        inv_db::catalog::requeue_failed(&pool, message_id, now).await?
                    } else {
                        inv_db::outbox::requeue_failed(&pool, message_id, now).await?
                    };
                    if !requeued {
                        bail!("message {message_id} was not in a failed state; nothing to requeue");
                    }
                    println!("requeued=true message_id={message_id}");
                }
            }
        }
    }

    Ok(())
}
