//! Keeps a storage backend installed in the shared state, toggling degraded mode while the
//! backend is unreachable.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{poll_store::PollStore, storage::StorageError},
    state::SharedState,
};

/// Timing knobs of the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorTiming {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub health_interval: Duration,
    /// In-place reconnects tried after a failed health check before reconnecting from scratch.
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            health_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
        }
    }
}

struct Backoff<'a> {
    timing: &'a SupervisorTiming,
    current: Duration,
}

impl<'a> Backoff<'a> {
    fn new(timing: &'a SupervisorTiming) -> Self {
        Self {
            timing,
            current: timing.initial_delay,
        }
    }

    async fn wait(&mut self) {
        sleep(self.current).await;
        self.current = (self.current * 2).min(self.timing.max_delay);
    }

    fn reset(&mut self) {
        self.current = self.timing.initial_delay;
    }
}

/// Connect with the default timing and supervise the store forever.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn PollStore>, StorageError>> + Send,
{
    run_with(state, SupervisorTiming::default(), connect).await
}

/// Connect, install the store, then poll its health; on failure try to reconnect in place and
/// fall back to a fresh connection once the in-place attempts are exhausted.
pub async fn run_with<F, Fut>(state: SharedState, timing: SupervisorTiming, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn PollStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new(&timing);

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                backoff.wait().await;
                continue;
            }
        };

        if let Err(err) = store.health_check().await {
            warn!(error = %err, "storage connected but unhealthy");
            backoff.wait().await;
            continue;
        }

        state.set_poll_store(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        backoff.reset();

        watch_health(&state, store.as_ref(), &timing).await;
        warn!("exhausted storage reconnect attempts; staying in degraded mode");
        backoff.wait().await;
    }
}

/// Poll the store until it fails and cannot be revived in place.
async fn watch_health(state: &SharedState, store: &dyn PollStore, timing: &SupervisorTiming) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store, timing).await {
                    return;
                }
                state.update_degraded(false);
            }
        }
        sleep(timing.health_interval).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn PollStore, timing: &SupervisorTiming) -> bool {
    let mut backoff = Backoff::new(timing);

    for attempt in 0..timing.max_reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                backoff.wait().await;
            }
        }
    }
    false
}
