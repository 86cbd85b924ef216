use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::{poll::PollSnapshot, sse::TallyEvent};

#[derive(Debug, Serialize, ToSchema)]
/// Frames pushed to live WebSocket viewers of a poll.
#[serde(tag = "type")]
pub enum LiveOutboundMessage {
    #[serde(rename = "snapshot")]
    Snapshot(PollSnapshot),
    #[serde(rename = "tally")]
    Tally(TallyEvent),
}

impl LiveOutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use uuid::Uuid;

    #[test]
    fn frames_are_tagged_by_type() {
        let poll_id = Uuid::new_v4();
        let snapshot = LiveOutboundMessage::Snapshot(PollSnapshot {
            poll_id,
            options: Vec::new(),
            total_votes: 0,
        });
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["poll_id"], poll_id.to_string());

        let tally = LiveOutboundMessage::Tally(TallyEvent {
            poll_id,
            counts: IndexMap::new(),
            total_votes: 0,
        });
        let json: serde_json::Value = serde_json::from_str(&tally.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "tally");
    }
}
