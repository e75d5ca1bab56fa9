//! Matchday backend binary entrypoint wiring the REST surface, the scheduler
//! sweeps, and the MongoDB layer.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchday_back::{
    clock::SystemClock,
    config::AppConfig,
    routes,
    services::{notifier::LogNotifier, scheduler},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let listen_addr = config.listen_addr.clone();

    let state = AppState::new(config, Arc::new(SystemClock), Arc::new(LogNotifier));

    spawn_storage_supervisor(state.clone());
    tokio::spawn(scheduler::run(state.clone()));

    let app = build_router(state);

    let addr: SocketAddr = listen_addr.parse().context("parsing listen address")?;
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise the MongoDB connection in the background, toggling degraded mode
/// as connectivity changes.
#[cfg(feature = "mongo-store")]
fn spawn_storage_supervisor(state: SharedState) {
    use matchday_back::{
        dao::{
            mongodb::{MongoConfig, MongoStore},
            store::Store,
        },
        services::storage_supervisor,
    };

    let uri =
        std::env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = std::env::var("MONGO_DB").ok();

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoStore::connect(config).await?;
            Ok(Arc::new(store) as Arc<dyn Store>)
        }
    }));
}

/// Without the MongoDB backend compiled in, serve from process-local memory.
#[cfg(not(feature = "mongo-store"))]
fn spawn_storage_supervisor(state: SharedState) {
    use matchday_back::dao::{memory::MemoryStore, store::Store};

    tokio::spawn(async move {
        state
            .install_store(Arc::new(MemoryStore::new()) as Arc<dyn Store>)
            .await;
        info!("using in-memory storage backend");
    });
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
