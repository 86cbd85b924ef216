use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{OptionEntity, PollEntity},
    dto::{
        format_system_time,
        validation::{validate_not_blank, validate_poll_options},
    },
};

/// Payload used to create a poll together with its options.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreatePollRequest {
    #[validate(length(max = 500), custom(function = "validate_not_blank"))]
    pub question: String,
    /// Option texts in display order. Blank entries are dropped.
    #[validate(length(max = 50), custom(function = "validate_poll_options"))]
    pub options: Vec<String>,
}

/// Current count of a single option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OptionTally {
    pub option_id: Uuid,
    pub text: String,
    pub votes: u64,
}

/// Ordered per-option counts of a poll at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PollSnapshot {
    pub poll_id: Uuid,
    /// Options ordered by creation position.
    pub options: Vec<OptionTally>,
    pub total_votes: u64,
}

impl PollSnapshot {
    /// Build a snapshot from options already sorted by position.
    pub fn from_options(poll_id: Uuid, options: Vec<OptionEntity>) -> Self {
        let options: Vec<OptionTally> = options
            .into_iter()
            .map(|option| OptionTally {
                option_id: option.id,
                text: option.text,
                votes: option.votes,
            })
            .collect();
        let mut snapshot = Self {
            poll_id,
            options,
            total_votes: 0,
        };
        snapshot.recompute_total();
        snapshot
    }

    /// Count of the given option, if it belongs to this poll.
    pub fn votes_for(&self, option_id: Uuid) -> Option<u64> {
        self.options
            .iter()
            .find(|option| option.option_id == option_id)
            .map(|option| option.votes)
    }

    pub(crate) fn recompute_total(&mut self) {
        self.total_votes = self.options.iter().map(|option| option.votes).sum();
    }
}

/// Poll metadata returned on creation and initial page load.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PollResponse {
    pub id: Uuid,
    pub question: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    pub snapshot: PollSnapshot,
}

impl PollResponse {
    pub fn new(poll: PollEntity, snapshot: PollSnapshot) -> Self {
        Self {
            id: poll.id,
            question: poll.question,
            created_at: format_system_time(poll.created_at),
            snapshot,
        }
    }
}
