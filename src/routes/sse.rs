use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, ErrorBody},
    services::{live_feed, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/polls/{poll_id}/events",
    tag = "live",
    params(("poll_id" = Uuid, Path, description = "Identifier of the poll")),
    responses(
        (status = 200, description = "`snapshot` event followed by `tally` events", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown poll", body = ErrorBody)
    )
)]
/// Stream live count updates of a poll.
pub async fn poll_stream(
    State(state): State<SharedState>,
    Path(poll_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let feed = live_feed::open(&state, poll_id).await?;
    info!(%poll_id, "New poll SSE connection");
    Ok(sse_service::to_sse_stream(
        feed,
        state.config().fanout.keep_alive,
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/polls/{poll_id}/events", get(poll_stream))
}
