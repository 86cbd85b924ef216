use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the backend is serving with a healthy store, logging storage issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let live_polls = state.fanout().topic_count();
    match state.require_poll_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
                return HealthResponse::degraded(live_polls);
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded(live_polls)
    } else {
        HealthResponse::ok(live_polls)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::poll_store::MemoryPollStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_until_storage_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state.set_poll_store(Arc::new(MemoryPollStore::new())).await;
        assert_eq!(health_status(&state).await.status, "ok");
    }

    #[tokio::test]
    async fn counts_polls_with_live_viewers() {
        let state =
            AppState::with_store(AppConfig::default(), Arc::new(MemoryPollStore::new())).await;
        let _first = state.fanout().subscribe(uuid::Uuid::new_v4());
        let second = state.fanout().subscribe(uuid::Uuid::new_v4());
        assert_eq!(health_status(&state).await.live_polls, 2);

        drop(second);
        assert_eq!(health_status(&state).await.live_polls, 1);
    }
}
