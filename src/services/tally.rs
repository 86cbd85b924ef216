//! Tally operations layered over [`PollStore`]: receipt-guarded increments, marking ledger
//! entries tallied, releasing receipts and reading ordered snapshots.

use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{models::VoteRecordEntity, poll_store::PollStore, storage::StorageResult},
    dto::poll::PollSnapshot,
    services::retry::RetryPolicy,
};

/// Apply one vote to its option. Safe to repeat for the same `vote_id`.
pub async fn increment(
    store: &dyn PollStore,
    retry: &RetryPolicy,
    poll_id: Uuid,
    option_id: Uuid,
    vote_id: Uuid,
) -> StorageResult<u64> {
    retry
        .run("increment option", || {
            store.increment_option(poll_id, option_id, vote_id)
        })
        .await
}

/// Mark a counted ledger entry as tallied. The tally receipt stays: only the reconciler
/// drops it, once the entry is old enough that no increment for it can still land.
///
/// Best effort: a failure leaves the entry pending and the reconciler replays it.
/// Returns whether the entry is now marked.
pub async fn mark_tallied(
    store: &dyn PollStore,
    retry: &RetryPolicy,
    record: &VoteRecordEntity,
) -> bool {
    match retry
        .run("mark vote tallied", || store.mark_vote_tallied(record.clone()))
        .await
    {
        Ok(()) => true,
        Err(err) => {
            warn!(
                poll_id = %record.poll_id,
                vote_id = %record.id,
                error = %err,
                "failed to mark vote tallied; reconciler will finish it"
            );
            false
        }
    }
}

/// Drop the tally receipt of a tallied entry and flag the entry as released.
pub async fn release_receipt(
    store: &dyn PollStore,
    record: &VoteRecordEntity,
) -> StorageResult<()> {
    store
        .release_receipt(record.poll_id, record.option_id, record.id)
        .await?;
    store.mark_receipt_released(record.clone()).await
}

/// Current per-option counts of a poll, ordered by option position.
pub async fn get_snapshot(store: &dyn PollStore, poll_id: Uuid) -> StorageResult<PollSnapshot> {
    let options = store.list_options(poll_id).await?;
    Ok(PollSnapshot::from_options(poll_id, options))
}
