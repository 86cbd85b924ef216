use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::{
    dto::{sse::TallyEvent, ws::LiveOutboundMessage},
    services::live_feed::LiveFeed,
};

/// Push a poll's live updates over a WebSocket until either side goes away.
///
/// The channel is one-way: inbound text or binary frames are ignored, a close frame or a
/// receive error ends the session.
pub async fn handle_socket(socket: WebSocket, mut feed: LiveFeed) {
    let poll_id = feed.poll_id();
    let (mut sender, mut receiver) = socket.split();
    info!(%poll_id, "live websocket connected");

    if let Some(initial) = feed.take_initial() {
        if !send_message(&mut sender, &LiveOutboundMessage::Snapshot(initial)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            update = feed.next_update() => {
                let Some(update) = update else { break };
                let message = LiveOutboundMessage::Tally(TallyEvent::from(&update));
                if !send_message(&mut sender, &message).await {
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => debug!(%poll_id, "ignoring inbound frame on live websocket"),
                Some(Err(err)) => {
                    warn!(%poll_id, error = %err, "websocket receive error");
                    break;
                }
            },
        }
    }

    info!(%poll_id, "live websocket disconnected");
}

/// Serialise and send one frame. Returns `false` once the socket is closed.
async fn send_message<S>(sender: &mut S, message: &LiveOutboundMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    match message.to_json() {
        Ok(payload) => sender.send(Message::Text(payload.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialise websocket payload");
            true
        }
    }
}
