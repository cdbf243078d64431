//! BloodConnect mirror service.
//!
//! Mirrors the remote blood request collection into SQLite and serves it over
//! a read-only REST API.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bloodconnect_mirror::config::Config;
use bloodconnect_mirror::db::{self, MirrorStore};
use bloodconnect_mirror::remote::{ChannelCollection, FirestoreCollection, RemoteCollection};
use bloodconnect_mirror::sync::{RetryPolicy, Session};
use bloodconnect_mirror::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting BloodConnect mirror");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    let remote: Arc<dyn RemoteCollection> = match &config.firestore {
        Some(firestore) => {
            tracing::info!(
                "Mirroring Firestore collection {}/{} every {:?}",
                firestore.project_id,
                firestore.collection,
                firestore.poll_interval
            );
            Arc::new(FirestoreCollection::new(firestore)?)
        }
        None => {
            tracing::warn!(
                "No remote collection configured (BLOODCONNECT_FIRESTORE_PROJECT). Serving the last mirrored data only!"
            );
            let (collection, _feed) = ChannelCollection::new();
            Arc::new(collection)
        }
    };

    // Initialize the mirror
    let pool = db::init_database(&config.db_path).await?;
    let store = Arc::new(MirrorStore::open(pool).await?);

    let session = Session::start(
        store.clone(),
        remote,
        RetryPolicy::new(config.retry_initial, config.retry_max),
    );

    let bind_addr = config.bind_addr;
    let state = AppState {
        store,
        status: session.status(),
        config: Arc::new(config),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Shutting down");
    session.shutdown().await;

    Ok(())
}
