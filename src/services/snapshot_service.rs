use uuid::Uuid;

use crate::{
    dao::{models::PollEntity, poll_store::PollStore},
    dto::poll::{PollResponse, PollSnapshot},
    error::ServiceError,
    services::tally,
    state::AppState,
};

/// Return the poll together with its current counts.
pub async fn get_poll(state: &AppState, poll_id: Uuid) -> Result<PollResponse, ServiceError> {
    let store = state.require_poll_store().await?;
    let poll = load_poll(store.as_ref(), poll_id).await?;
    let snapshot = tally::get_snapshot(store.as_ref(), poll_id).await?;
    Ok(PollResponse::new(poll, snapshot))
}

/// Return the current counts of a poll.
pub async fn get_snapshot(state: &AppState, poll_id: Uuid) -> Result<PollSnapshot, ServiceError> {
    let store = state.require_poll_store().await?;
    load_poll(store.as_ref(), poll_id).await?;
    Ok(tally::get_snapshot(store.as_ref(), poll_id).await?)
}

pub(crate) async fn load_poll(
    store: &dyn PollStore,
    poll_id: Uuid,
) -> Result<PollEntity, ServiceError> {
    store
        .find_poll(poll_id)
        .await?
        .ok_or(ServiceError::InvalidPoll(poll_id))
}
