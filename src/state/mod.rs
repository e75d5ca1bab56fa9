//! Shared application state.

pub mod lifecycle;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    clock::Clock, config::AppConfig, dao::store::Store, error::ServiceError,
    services::notifier::Notifier,
};

/// Cheaply cloneable handle to the application state.
pub type SharedState = Arc<AppState>;

/// Central application state: the storage handle, the degraded flag, and the
/// injected collaborators (clock, notifier, configuration).
pub struct AppState {
    store: RwLock<Option<Arc<dyn Store>>>,
    degraded: watch::Sender<bool>,
    /// Time source used by every handler and sweep.
    pub clock: Arc<dyn Clock>,
    /// Push-notification collaborator; failures are logged, never fatal.
    pub notifier: Arc<dyn Notifier>,
    /// Runtime configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is
    /// installed.
    pub fn new(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            clock,
            notifier,
            config,
        })
    }

    /// State with a backend already installed; used by tests and local runs.
    pub async fn with_store(
        store: Arc<dyn Store>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> SharedState {
        let state = Self::new(config, clock, notifier);
        state.install_store(store).await;
        state
    }

    /// Obtain a handle to the current store, or a degraded-mode error.
    pub async fn store(&self) -> Result<Arc<dyn Store>, ServiceError> {
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a storage backend and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn Store>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current storage backend and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    fn update_degraded(&self, degraded: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == degraded {
                false
            } else {
                *current = degraded;
                true
            }
        });
    }
}
