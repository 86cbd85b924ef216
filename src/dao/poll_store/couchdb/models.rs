use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::dao::{
    models::{OptionEntity, PollEntity, VoteRecordEntity},
    poll_store::couchdb::error::CouchDaoError,
};

pub const POLL_PREFIX: &str = "poll::";
pub const OPTION_PREFIX: &str = "option::";
pub const VOTE_PREFIX: &str = "vote::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse<T> {
    pub docs: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDocsResult {
    pub id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Discriminates document types sharing the database, used by `_find` selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Poll,
    Option,
    Vote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchPollDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub kind: DocKind,
    pub question: String,
    pub created_at: SystemTime,
}

impl From<PollEntity> for CouchPollDocument {
    fn from(poll: PollEntity) -> Self {
        Self {
            id: poll_doc_id(poll.id),
            rev: None,
            kind: DocKind::Poll,
            question: poll.question,
            created_at: poll.created_at,
        }
    }
}

impl TryFrom<CouchPollDocument> for PollEntity {
    type Error = CouchDaoError;

    fn try_from(doc: CouchPollDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: extract_uuid(&doc.id)?,
            question: doc.question,
            created_at: doc.created_at,
        })
    }
}

/// Option document carrying the running count and the receipts of applied votes that the
/// reconciler has not released yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchOptionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub kind: DocKind,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub position: u32,
    pub text: String,
    pub votes: u64,
    #[serde(default)]
    pub receipts: Vec<Uuid>,
}

impl From<OptionEntity> for CouchOptionDocument {
    fn from(option: OptionEntity) -> Self {
        Self {
            id: option_doc_id(option.poll_id, option.id),
            rev: None,
            kind: DocKind::Option,
            poll_id: option.poll_id,
            option_id: option.id,
            position: option.position,
            text: option.text,
            votes: option.votes,
            receipts: Vec::new(),
        }
    }
}

impl From<CouchOptionDocument> for OptionEntity {
    fn from(doc: CouchOptionDocument) -> Self {
        Self {
            id: doc.option_id,
            poll_id: doc.poll_id,
            position: doc.position,
            text: doc.text,
            votes: doc.votes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchVoteDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub kind: DocKind,
    pub vote_id: Uuid,
    pub poll_id: Uuid,
    pub identity: String,
    pub option_id: Uuid,
    pub created_at: SystemTime,
    /// Millisecond copy of `created_at` so Mango selectors can range over it.
    pub created_at_ms: u64,
    pub tallied: bool,
    #[serde(default)]
    pub receipt_released: bool,
}

impl From<VoteRecordEntity> for CouchVoteDocument {
    fn from(record: VoteRecordEntity) -> Self {
        Self {
            id: vote_doc_id(record.poll_id, &record.identity),
            rev: None,
            kind: DocKind::Vote,
            vote_id: record.id,
            poll_id: record.poll_id,
            identity: record.identity,
            option_id: record.option_id,
            created_at: record.created_at,
            created_at_ms: epoch_millis(record.created_at),
            tallied: record.tallied,
            receipt_released: record.receipt_released,
        }
    }
}

impl From<CouchVoteDocument> for VoteRecordEntity {
    fn from(doc: CouchVoteDocument) -> Self {
        Self {
            id: doc.vote_id,
            poll_id: doc.poll_id,
            identity: doc.identity,
            option_id: doc.option_id,
            created_at: doc.created_at,
            tallied: doc.tallied,
            receipt_released: doc.receipt_released,
        }
    }
}

/// Mango query returning untallied ledger entries created before `created_before`.
pub fn pending_votes_query(created_before: SystemTime, limit: usize) -> Value {
    json!({
        "selector": {
            "kind": DocKind::Vote,
            "tallied": false,
            "created_at_ms": { "$lt": epoch_millis(created_before) },
        },
        "limit": limit,
    })
}

/// Mango query returning tallied ledger entries that still hold a tally receipt.
pub fn settled_votes_query(created_before: SystemTime, limit: usize) -> Value {
    json!({
        "selector": {
            "kind": DocKind::Vote,
            "tallied": true,
            "receipt_released": { "$ne": true },
            "created_at_ms": { "$lt": epoch_millis(created_before) },
        },
        "limit": limit,
    })
}

pub fn poll_doc_id(id: Uuid) -> String {
    format!("{}{}", POLL_PREFIX, id)
}

pub fn option_doc_id(poll_id: Uuid, option_id: Uuid) -> String {
    format!("{}{}:{}", OPTION_PREFIX, poll_id, option_id)
}

pub fn option_prefix(poll_id: Uuid) -> String {
    format!("{}{}:", OPTION_PREFIX, poll_id)
}

/// Ledger document id; the identity is hex-encoded so any header value is a valid id.
///
/// Keying the document by `(poll, identity)` makes CouchDB's id uniqueness the dedup check.
pub fn vote_doc_id(poll_id: Uuid, identity: &str) -> String {
    let encoded: String = identity.bytes().map(|byte| format!("{byte:02x}")).collect();
    format!("{}{}:{}", VOTE_PREFIX, poll_id, encoded)
}

pub fn vote_prefix(poll_id: Uuid) -> String {
    format!("{}{}:", VOTE_PREFIX, poll_id)
}

pub fn extract_uuid(doc_id: &str) -> Result<Uuid, CouchDaoError> {
    let (_, id) = doc_id
        .split_once("::")
        .ok_or_else(|| CouchDaoError::InvalidDocId {
            doc_id: doc_id.to_string(),
            kind: "missing separator",
        })?;

    Uuid::parse_str(id).map_err(|_| CouchDaoError::InvalidDocId {
        doc_id: doc_id.to_string(),
        kind: "invalid UUID",
    })
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
