pub mod fanout;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{config::AppConfig, dao::poll_store::PollStore, error::ServiceError};

pub use self::fanout::{FanoutBroker, MonotonicFilter, Subscription};

pub type SharedState = Arc<AppState>;

/// Central application state holding the storage handle, live topics and configuration.
pub struct AppState {
    poll_store: RwLock<Option<Arc<dyn PollStore>>>,
    fanout: FanoutBroker,
    config: Arc<AppConfig>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let fanout = FanoutBroker::new(config.fanout.channel_capacity);
        Arc::new(Self {
            poll_store: RwLock::new(None),
            fanout,
            config: Arc::new(config),
            degraded: degraded_tx,
        })
    }

    /// Build a ready-to-serve state around an already connected store.
    pub async fn with_store(config: AppConfig, store: Arc<dyn PollStore>) -> SharedState {
        let state = Self::new(config);
        state.set_poll_store(store).await;
        state
    }

    /// Obtain a handle to the current poll store, if one is installed.
    pub async fn poll_store(&self) -> Option<Arc<dyn PollStore>> {
        let guard = self.poll_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current poll store, or [`ServiceError::Degraded`] while storage is unavailable.
    pub async fn require_poll_store(&self) -> Result<Arc<dyn PollStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.poll_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new poll store implementation and leave degraded mode.
    pub async fn set_poll_store(&self, store: Arc<dyn PollStore>) {
        {
            let mut guard = self.poll_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Per-poll topics feeding the live SSE and WebSocket channels.
    pub fn fanout(&self) -> &FanoutBroker {
        &self.fanout
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::poll_store::MemoryPollStore;

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_poll_store().await,
            Err(ServiceError::Degraded)
        ));

        let mut watcher = state.degraded_watcher();
        state.set_poll_store(Arc::new(MemoryPollStore::new())).await;
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
        assert!(state.require_poll_store().await.is_ok());

        state.update_degraded(true);
        assert!(matches!(
            state.require_poll_store().await,
            Err(ServiceError::Degraded)
        ));
    }
}
