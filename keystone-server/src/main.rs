//! Keystone Server - REST API for passkey ceremonies
//!
//! Exposes the keystone-core lifecycle via HTTP endpoints:
//! - POST /ceremonies/create, POST /ceremonies/get - Issue a ceremony
//! - POST /register, POST /login - Redeem it
//! - GET /credentials - List the caller's passkeys

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use keystone_core::{MemoryStore, Store, TableResolver};
use keystone_server::{create_router_with_state, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "postgres")]
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let store = keystone_core::PostgresStore::new(url, config.database_max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("failed to run migrations")?;
    tracing::info!("Using PostgreSQL document store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL ignored: built without the postgres feature");
    }
    tracing::warn!("Using the in-memory store (data is lost on restart)");
    Ok(Arc::new(MemoryStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("keystone_server=info,keystone_core=info,tower_http=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let store = open_store(&config).await?;
    let resolver = Arc::new(TableResolver::from_env().context("invalid table overrides")?);
    for table in keystone_core::LogicalTable::ALL {
        if let Some(name) = resolver.resolve(table) {
            tracing::info!(logical = %table, concrete = %name, "Table resolved");
        }
    }

    let state = AppState::bootstrap(store, resolver, &config)
        .await
        .context("failed to prepare tables")?;
    let app = create_router_with_state(state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Keystone server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
