use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Poll question as persisted by the provisioning layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEntity {
    /// Stable identifier for the poll.
    pub id: Uuid,
    /// Question shown to voters.
    pub question: String,
    /// Time at which the poll was provisioned.
    pub created_at: SystemTime,
}

/// Answer option belonging to a poll, including its running tally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionEntity {
    /// Stable identifier for the option.
    pub id: Uuid,
    /// Poll owning this option.
    pub poll_id: Uuid,
    /// Creation order inside the poll, used to order snapshots.
    pub position: u32,
    /// Display text of the option.
    pub text: String,
    /// Number of tallied votes.
    pub votes: u64,
}

/// Dedup ledger entry created once per admitted vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecordEntity {
    /// Identifier generated at ingestion, also used as the tally receipt.
    pub id: Uuid,
    /// Poll the vote was cast on.
    pub poll_id: Uuid,
    /// Derived voter identity (network origin), not an authenticated user.
    pub identity: String,
    /// Option the voter chose.
    pub option_id: Uuid,
    /// Time at which the vote was admitted.
    pub created_at: SystemTime,
    /// Whether the option count already includes this vote.
    pub tallied: bool,
    /// Whether the option's tally receipt for this vote has been dropped.
    #[serde(default)]
    pub receipt_released: bool,
}

impl VoteRecordEntity {
    /// Build a fresh, untallied ledger entry for the given vote.
    pub fn new(poll_id: Uuid, identity: impl Into<String>, option_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            poll_id,
            identity: identity.into(),
            option_id,
            created_at: SystemTime::now(),
            tallied: false,
            receipt_released: false,
        }
    }
}

/// Poll together with its options, written in one provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPollEntity {
    pub poll: PollEntity,
    pub options: Vec<OptionEntity>,
}

/// Outcome of inserting a ledger entry into the uniqueness-constrained set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The entry was inserted; this caller owns the single admission.
    Inserted,
    /// An entry for the same (poll, identity) pair already exists.
    Exists(VoteRecordEntity),
}
