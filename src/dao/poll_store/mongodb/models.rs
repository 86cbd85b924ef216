use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{OptionEntity, PollEntity, VoteRecordEntity};

use super::error::MongoDaoError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPollDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub question: String,
    pub created_at: DateTime,
}

impl From<PollEntity> for MongoPollDocument {
    fn from(value: PollEntity) -> Self {
        Self {
            id: value.id.to_string(),
            question: value.question,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoPollDocument> for PollEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPollDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&value.id)?,
            question: value.question,
            created_at: value.created_at.to_system_time(),
        })
    }
}

/// Option document; `receipts` holds the vote ids applied and not yet released by the
/// reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoOptionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub poll_id: String,
    pub position: u32,
    pub text: String,
    pub votes: i64,
    #[serde(default)]
    pub receipts: Vec<String>,
}

impl From<OptionEntity> for MongoOptionDocument {
    fn from(value: OptionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            poll_id: value.poll_id.to_string(),
            position: value.position,
            text: value.text,
            votes: i64::try_from(value.votes).unwrap_or(i64::MAX),
            receipts: Vec::new(),
        }
    }
}

impl TryFrom<MongoOptionDocument> for OptionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoOptionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&value.id)?,
            poll_id: parse_uuid(&value.poll_id)?,
            position: value.position,
            text: value.text,
            votes: votes_from_bson(value.votes),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub poll_id: String,
    pub identity: String,
    pub option_id: String,
    pub created_at: DateTime,
    pub tallied: bool,
    #[serde(default)]
    pub receipt_released: bool,
}

impl From<VoteRecordEntity> for MongoVoteDocument {
    fn from(value: VoteRecordEntity) -> Self {
        Self {
            id: value.id.to_string(),
            poll_id: value.poll_id.to_string(),
            identity: value.identity,
            option_id: value.option_id.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
            tallied: value.tallied,
            receipt_released: value.receipt_released,
        }
    }
}

impl TryFrom<MongoVoteDocument> for VoteRecordEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoVoteDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&value.id)?,
            poll_id: parse_uuid(&value.poll_id)?,
            identity: value.identity,
            option_id: parse_uuid(&value.option_id)?,
            created_at: value.created_at.to_system_time(),
            tallied: value.tallied,
            receipt_released: value.receipt_released,
        })
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Negative counts can only come from manual edits; clamp them to zero.
pub fn votes_from_bson(votes: i64) -> u64 {
    u64::try_from(votes).unwrap_or(0)
}

fn parse_uuid(raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::MalformedDocument {
        reason: format!("invalid identifier `{raw}`: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn vote_document_round_trips_identifiers() {
        let record = VoteRecordEntity::new(Uuid::new_v4(), "192.0.2.7", Uuid::new_v4());
        let document = MongoVoteDocument::from(record.clone());
        assert_eq!(document.id, record.id.to_string());

        let restored = VoteRecordEntity::try_from(document).unwrap();
        assert_eq!(restored.id, record.id);
        assert_eq!(restored.identity, "192.0.2.7");
        assert!(!restored.tallied);
        assert!(!restored.receipt_released);
    }

    #[test]
    fn malformed_identifier_is_reported() {
        let document = MongoPollDocument {
            id: "not-a-uuid".into(),
            question: "?".into(),
            created_at: DateTime::from_system_time(SystemTime::now()),
        };
        assert!(matches!(
            PollEntity::try_from(document),
            Err(MongoDaoError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn negative_vote_counts_clamp_to_zero() {
        assert_eq!(votes_from_bson(-3), 0);
        assert_eq!(votes_from_bson(42), 42);
    }
}
