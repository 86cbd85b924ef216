use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tracing::{info, warn};

use crate::{
    dto::sse::{SNAPSHOT_EVENT, ServerEvent, TALLY_EVENT, TallyEvent},
    services::live_feed::LiveFeed,
};

/// Convert a live feed into an SSE response: one `snapshot` event, then `tally` events.
///
/// The feed (and with it the poll subscription) is dropped when the client disconnects
/// and axum drops the response stream.
pub fn to_sse_stream(
    mut feed: LiveFeed,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let poll_id = feed.poll_id();
    let stream = async_stream::stream! {
        if let Some(initial) = feed.take_initial() {
            if let Some(event) = encode(ServerEvent::json(SNAPSHOT_EVENT.to_string(), &initial)) {
                yield Ok(event);
            }
        }

        while let Some(update) = feed.next_update().await {
            if let Some(event) = encode(ServerEvent::json(TALLY_EVENT.to_string(), &TallyEvent::from(&update))) {
                yield Ok(event);
            }
        }

        info!(%poll_id, "poll SSE stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}

fn encode(payload: serde_json::Result<ServerEvent>) -> Option<Event> {
    match payload {
        Ok(payload) => {
            let mut event = Event::default().data(payload.data);
            if let Some(name) = payload.event {
                event = event.event(name);
            }
            Some(event)
        }
        Err(err) => {
            warn!(error = %err, "failed to serialise SSE payload");
            None
        }
    }
}
