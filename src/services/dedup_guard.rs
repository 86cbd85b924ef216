//! One-vote-per-identity enforcement backed by the ledger's uniqueness constraint.
//!
//! Identities are derived from the network origin of a request, so several voters behind one
//! address share a single vote. That false positive is accepted; a false negative is not.

use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{RegisterOutcome, VoteRecordEntity},
        poll_store::PollStore,
        storage::StorageResult,
    },
    services::retry::RetryPolicy,
};

/// Eligibility decision for a `(poll, identity)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// This call owns the single admission; the record is still pending its increment.
    Admitted(VoteRecordEntity),
    /// The identity already voted on this poll.
    AlreadyVoted(VoteRecordEntity),
}

/// Record a vote in the ledger unless the identity already voted on the poll.
///
/// The vote id is generated once and reused across retries, so a retry whose first attempt
/// committed but lost its response recognises the stored record as its own admission.
pub async fn try_register(
    store: &dyn PollStore,
    retry: &RetryPolicy,
    poll_id: Uuid,
    identity: &str,
    option_id: Uuid,
) -> StorageResult<Registration> {
    let record = VoteRecordEntity::new(poll_id, identity, option_id);

    let outcome = retry
        .run("register vote", || store.insert_vote_record(record.clone()))
        .await?;

    Ok(match outcome {
        RegisterOutcome::Inserted => Registration::Admitted(record),
        RegisterOutcome::Exists(existing) if existing.id == record.id => {
            debug!(%poll_id, vote_id = %record.id, "register retry found its own ledger entry");
            Registration::Admitted(existing)
        }
        RegisterOutcome::Exists(existing) => Registration::AlreadyVoted(existing),
    })
}
