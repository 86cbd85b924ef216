use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    services::{live_feed, websocket_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/polls/{poll_id}/ws",
    tag = "live",
    params(("poll_id" = Uuid, Path, description = "Identifier of the poll")),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 404, description = "Unknown poll")
    )
)]
/// Upgrade the HTTP connection into a live poll WebSocket.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(poll_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let feed = live_feed::open(&state, poll_id).await?;
    Ok(ws.on_upgrade(move |socket| websocket_service::handle_socket(socket, feed)))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/polls/{poll_id}/ws", get(ws_handler))
}
