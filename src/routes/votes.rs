use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::vote::{LegacyVoteRequest, VoteAcceptedResponse, VoteRequest},
    error::{AppError, ErrorBody},
    services::{identity::VoterIdentity, vote_service},
    state::SharedState,
};

/// Vote submission endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/polls/{poll_id}/votes", post(submit_vote))
        .route("/vote", post(submit_legacy_vote))
}

#[utoipa::path(
    post,
    path = "/polls/{poll_id}/votes",
    tag = "votes",
    params(("poll_id" = Uuid, Path, description = "Identifier of the poll")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote accepted", body = VoteAcceptedResponse),
        (status = 404, description = "Unknown poll (`invalid_poll`)", body = ErrorBody),
        (status = 409, description = "Identity already voted (`duplicate_vote`)", body = ErrorBody),
        (status = 422, description = "Option not in poll (`invalid_option`)", body = ErrorBody),
        (status = 500, description = "Vote recorded but not yet counted (`inconsistent_state`)", body = ErrorBody),
        (status = 503, description = "Storage unavailable (`storage_unavailable`)", body = ErrorBody)
    )
)]
/// Cast a vote; the voter identity is derived from the caller's network origin.
pub async fn submit_vote(
    State(state): State<SharedState>,
    Path(poll_id): Path<Uuid>,
    VoterIdentity(identity): VoterIdentity,
    Valid(Json(payload)): Valid<Json<VoteRequest>>,
) -> Result<Json<VoteAcceptedResponse>, AppError> {
    let accepted = vote_service::submit_vote(&state, poll_id, payload.option_id, &identity).await?;
    Ok(Json(accepted.into()))
}

#[utoipa::path(
    post,
    path = "/vote",
    tag = "votes",
    request_body = LegacyVoteRequest,
    responses(
        (status = 200, description = "Vote accepted", body = VoteAcceptedResponse),
        (status = 404, description = "Unknown poll (`invalid_poll`)", body = ErrorBody),
        (status = 409, description = "Identity already voted (`duplicate_vote`)", body = ErrorBody),
        (status = 422, description = "Option not in poll (`invalid_option`)", body = ErrorBody),
        (status = 500, description = "Vote recorded but not yet counted (`inconsistent_state`)", body = ErrorBody),
        (status = 503, description = "Storage unavailable (`storage_unavailable`)", body = ErrorBody)
    )
)]
/// Cast a vote naming the poll in the body instead of the path.
pub async fn submit_legacy_vote(
    State(state): State<SharedState>,
    VoterIdentity(identity): VoterIdentity,
    Valid(Json(payload)): Valid<Json<LegacyVoteRequest>>,
) -> Result<Json<VoteAcceptedResponse>, AppError> {
    let accepted =
        vote_service::submit_vote(&state, payload.poll_id, payload.option_id, &identity).await?;
    Ok(Json(accepted.into()))
}
