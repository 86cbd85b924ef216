use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{dto::poll::PollSnapshot, services::vote_service::AcceptedVote};

/// Vote cast on the poll named in the request path.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteRequest {
    pub option_id: Uuid,
}

/// Vote submitted to the flat `/vote` endpoint, naming the poll in the body.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct LegacyVoteRequest {
    pub poll_id: Uuid,
    pub option_id: Uuid,
}

/// Returned once a vote has been admitted and counted.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoteAcceptedResponse {
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub vote_id: Uuid,
    /// Count of the chosen option right after this vote was applied.
    pub votes: u64,
    /// Fresh snapshot of the poll; absent when it could not be read after the vote committed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snapshot: Option<PollSnapshot>,
}

impl From<AcceptedVote> for VoteAcceptedResponse {
    fn from(vote: AcceptedVote) -> Self {
        Self {
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            vote_id: vote.vote_id,
            votes: vote.votes,
            snapshot: vote.snapshot,
        }
    }
}
