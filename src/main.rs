//! Live Poll Back binary entrypoint wiring REST, SSE, WebSocket and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_poll_back::{
    config::AppConfig,
    dao::poll_store::{MemoryPollStore, PollStore},
    routes,
    services::{reconciler, storage_supervisor},
    state::{AppState, SharedState},
};

/// Storage backend selected through `STORAGE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageBackend {
    Memory,
    Mongo,
    Couch,
}

impl StorageBackend {
    fn from_env() -> anyhow::Result<Self> {
        let value = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".into());
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            other => bail!("unknown STORAGE_BACKEND `{other}` (expected memory, mongo or couch)"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StorageBackend::from_env()?;
    let app_state = AppState::new(config);

    spawn_storage_supervisor(app_state.clone(), backend)?;
    tokio::spawn(reconciler::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    // Peer addresses feed voter identity derivation.
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the supervisor task that installs the selected store and toggles degraded mode.
fn spawn_storage_supervisor(state: SharedState, backend: StorageBackend) -> anyhow::Result<()> {
    match backend {
        StorageBackend::Memory => {
            let store: Arc<dyn PollStore> = Arc::new(MemoryPollStore::new());
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok(store) }
            }));
        }
        #[cfg(feature = "mongo-store")]
        StorageBackend::Mongo => {
            use live_poll_back::dao::poll_store::mongodb::{MongoConfig, MongoPollStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoPollStore::connect(config).await?;
                Ok(Arc::new(store) as Arc<dyn PollStore>)
            }));
        }
        #[cfg(feature = "couch-store")]
        StorageBackend::Couch => {
            use live_poll_back::dao::poll_store::couchdb::{CouchConfig, CouchPollStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchPollStore::connect(config).await?;
                Ok(Arc::new(store) as Arc<dyn PollStore>)
            }));
        }
        #[allow(unreachable_patterns)]
        other => bail!("storage backend {other:?} is not compiled into this binary"),
    }
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
