use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::poll::{CreatePollRequest, PollResponse, PollSnapshot},
    error::{AppError, ErrorBody},
    services::{provisioning_service, snapshot_service},
    state::SharedState,
};

/// Poll creation and read endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/polls", post(create_poll))
        .route("/polls/{poll_id}", get(get_poll))
        .route("/polls/{poll_id}/snapshot", get(get_snapshot))
}

#[utoipa::path(
    post,
    path = "/polls",
    tag = "polls",
    request_body = CreatePollRequest,
    responses(
        (status = 200, description = "Poll created", body = PollResponse),
        (status = 400, description = "Question or options invalid"),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
/// Create a poll; blank options are dropped and at least two must remain.
pub async fn create_poll(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreatePollRequest>>,
) -> Result<Json<PollResponse>, AppError> {
    let poll = provisioning_service::create_poll(&state, payload).await?;
    Ok(Json(poll))
}

#[utoipa::path(
    get,
    path = "/polls/{poll_id}",
    tag = "polls",
    params(("poll_id" = Uuid, Path, description = "Identifier of the poll")),
    responses(
        (status = 200, description = "Poll with current counts", body = PollResponse),
        (status = 404, description = "Unknown poll", body = ErrorBody)
    )
)]
/// Return a poll with its current counts, as needed for the initial page load.
pub async fn get_poll(
    State(state): State<SharedState>,
    Path(poll_id): Path<Uuid>,
) -> Result<Json<PollResponse>, AppError> {
    Ok(Json(snapshot_service::get_poll(&state, poll_id).await?))
}

#[utoipa::path(
    get,
    path = "/polls/{poll_id}/snapshot",
    tag = "polls",
    params(("poll_id" = Uuid, Path, description = "Identifier of the poll")),
    responses(
        (status = 200, description = "Current counts", body = PollSnapshot),
        (status = 404, description = "Unknown poll", body = ErrorBody)
    )
)]
/// Return the current per-option counts of a poll.
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(poll_id): Path<Uuid>,
) -> Result<Json<PollSnapshot>, AppError> {
    Ok(Json(snapshot_service::get_snapshot(&state, poll_id).await?))
}
