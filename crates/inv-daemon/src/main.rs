//! inv-daemon entry point.
//!
//! Thin by design: load config, connect to Postgres, build shared state,
//! spawn the background workers, and start the HTTP server. Handlers live
//! in `routes.rs`; shared state lives in `state.rs`; worker wiring lives in
//! `scheduler.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use inv_daemon::{routes, scheduler, state::AppState};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience: load .env.local if present. Silent if missing —
    // production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (config, config_hash) = inv_config::load(&["config/base.yaml", "config/local.yaml"])
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "no config file found; using defaults");
            (inv_config::Config::default(), "unset".to_string())
        });
    info!(config_hash = %config_hash, "configuration loaded");

    let pool = inv_db::connect_from_env()
        .await
        .context("failed to connect to Postgres")?;
    inv_db::migrate(&pool).await.context("failed to run migrations")?;

    let shared = Arc::new(AppState::new(pool, config));
    scheduler::spawn_background_workers(Arc::clone(&shared));

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8900)));
    info!("inv-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("INV_DAEMON_ADDR").ok()?.parse().ok()
}
