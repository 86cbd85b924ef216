//! Live view of a poll shared by the SSE and WebSocket channels.

use uuid::Uuid;

use crate::{
    dto::poll::PollSnapshot,
    error::ServiceError,
    services::{snapshot_service, tally},
    state::{AppState, MonotonicFilter, Subscription},
};

/// Initial snapshot plus the stream of later updates for one viewer.
pub struct LiveFeed {
    initial: Option<PollSnapshot>,
    subscription: Subscription,
    filter: MonotonicFilter,
}

/// Open a live feed on `poll_id`.
///
/// The subscription is taken before the initial snapshot is read, so no update committed
/// after the read can be missed; updates older than the read are absorbed by the filter.
pub async fn open(state: &AppState, poll_id: Uuid) -> Result<LiveFeed, ServiceError> {
    let store = state.require_poll_store().await?;
    snapshot_service::load_poll(store.as_ref(), poll_id).await?;

    let subscription = state.fanout().subscribe(poll_id);
    let initial = tally::get_snapshot(store.as_ref(), poll_id).await?;

    Ok(LiveFeed {
        filter: MonotonicFilter::seeded(&initial),
        initial: Some(initial),
        subscription,
    })
}

impl LiveFeed {
    pub fn poll_id(&self) -> Uuid {
        self.subscription.poll_id()
    }

    /// Snapshot to send first. Returns `None` after the first call.
    pub fn take_initial(&mut self) -> Option<PollSnapshot> {
        self.initial.take()
    }

    /// Next update whose counts moved forward, or `None` once the feed is closed.
    pub async fn next_update(&mut self) -> Option<PollSnapshot> {
        loop {
            let snapshot = self.subscription.recv().await?;
            if let Some(update) = self.filter.apply(snapshot) {
                return Some(update);
            }
        }
    }
}
