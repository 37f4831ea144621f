//! `poolside-temps`: temperature readings service for the pool dashboard.
//!
//! Startup runs in a fixed order. Settings come from the environment (a
//! `.env` file is honoured), logging is installed next, then the reading
//! store opens. Postgres gets its table and indexes created on the way;
//! `READING_STORE=memory` skips the database entirely. With
//! `SEED_DEMO_DATA` set, an empty store is filled with a month of
//! synthetic readings before the router is mounted and the listener
//! binds. Ctrl-C drains in-flight requests and exits.
//!
//! Logging knobs, read before anything else:
//! - `RUST_LOG` wins when present
//! - otherwise `AXUM_LOG_LEVEL` (default `debug`)
//! - `AXUM_SPAN_EVENTS=full|enter_exit` widens span events beyond CLOSE
//! - `FORCE_COLOR` overrides TTY colour detection
//!
//! The rest is documented on [`config::load_from_env`]. Modules talk to
//! each other through the EMBP gateways: `routes` for HTTP, `schema` for
//! DDL, `config` for settings.
use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod aggregate;
mod clock;
mod config;
mod drilldown;
mod error;
mod models;
mod registry;
mod routes;
mod schema;
mod service;
mod store;
mod synth;
mod window;

pub use config::{Config, StoreBackend};

// Re-exported so routes/*.rs depend only on their parent module, not on
// how the service is assembled.
pub use service::TemperatureService;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;
    let registry = Arc::new(cfg.registry.clone());
    let resolver = window::WindowResolver::new(cfg.local_tz);
    let clock = Arc::new(clock::SystemClock);

    if cfg.seed_demo_data {
        let now = clock::Clock::now(clock.as_ref());
        synth::seed_if_empty(store.as_ref(), &registry, &resolver, now).await?;
    }

    let service = Arc::new(TemperatureService::new(
        store,
        clock,
        registry,
        resolver,
        cfg.ingest_secret.clone(),
        cfg.raw_limit_default as usize,
    ));

    let app: Router = routes::router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!(%addr, "temperature service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

// ---

/// Open the configured reading store, creating the schema for Postgres.
async fn open_store(cfg: &Config) -> Result<Arc<dyn store::ReadingStore>> {
    // ---
    match &cfg.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory reading store; readings are lost on exit");
            Ok(Arc::new(store::MemoryStore::new()))
        }
        StoreBackend::Postgres { db_url } => {
            tracing::info!("Attempting to connect to database");

            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_pool_max)
                .connect(db_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

            tracing::info!("Successfully connected to database");

            schema::create_schema(&pool).await?;
            Ok(Arc::new(store::PgReadingStore::new(pool)))
        }
    }
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Install the global `tracing` subscriber. Call once, before the first
/// log line.
fn init_tracing() {
    // ---
    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events_from_env())
        .with_env_filter(env_filter_from_env())
        .with_ansi(colour_from_env())
        .compact()
        .init();
}

fn span_events_from_env() -> FmtSpan {
    match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

fn colour_from_env() -> bool {
    match env::var("FORCE_COLOR").map(|v| v.to_ascii_lowercase()).as_deref() {
        Ok("1" | "true" | "yes") => true,
        Ok("0" | "false" | "no") => false,
        _ => std::io::stdout().is_terminal(),
    }
}

/// `RUST_LOG` verbatim if set. Otherwise `AXUM_LOG_LEVEL` for our crates,
/// with sqlx statement logging held at warn and request spans at info.
fn env_filter_from_env() -> EnvFilter {
    // ---
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let level = env::var("AXUM_LOG_LEVEL")
        .ok()
        .filter(|l| matches!(l.as_str(), "trace" | "debug" | "info" | "warn" | "error"))
        .unwrap_or_else(|| "debug".to_string());
    EnvFilter::new(format!("{level},sqlx::query=warn,tower_http=info"))
}
