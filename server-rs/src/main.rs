use std::net::SocketAddr;
use std::sync::Arc;

use listing_moderation::cache::Cache;
use listing_moderation::config::{Config, StoreBackend};
use listing_moderation::store::{MemoryStore, PgStore, Transactor};
use listing_moderation::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let config = Config::from_env();

    let store: Arc<dyn Transactor> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config).await?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let cache = if config.redis.enabled {
        match Cache::new(&config).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, rating cache disabled");
                None
            }
        }
    } else {
        None
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        backend = ?config.store_backend,
        env = %config.node_env,
        "Listing moderation API initialized"
    );

    let state = AppState::new(config, store, cache);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
