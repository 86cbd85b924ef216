use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::poll::PollSnapshot;

/// Name of the first event sent on a live channel.
pub const SNAPSHOT_EVENT: &str = "snapshot";
/// Name of every following count update.
pub const TALLY_EVENT: &str = "tally";

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Compact count update broadcast after every accepted vote.
pub struct TallyEvent {
    pub poll_id: Uuid,
    /// Option id to current count, in option position order.
    #[schema(value_type = Object)]
    pub counts: IndexMap<Uuid, u64>,
    pub total_votes: u64,
}

impl From<&PollSnapshot> for TallyEvent {
    fn from(snapshot: &PollSnapshot) -> Self {
        Self {
            poll_id: snapshot.poll_id,
            counts: snapshot
                .options
                .iter()
                .map(|option| (option.option_id, option.votes))
                .collect(),
            total_votes: snapshot.total_votes,
        }
    }
}
