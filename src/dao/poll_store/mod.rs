#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{collections::HashMap, time::SystemTime};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    NewPollEntity, OptionEntity, PollEntity, RegisterOutcome, VoteRecordEntity,
};
use crate::dao::storage::StorageResult;

pub use memory::MemoryPollStore;

/// Abstraction over the persistence layer for polls, the vote ledger and option tallies.
///
/// Backends must provide two primitives the vote path depends on:
/// [`PollStore::insert_vote_record`] has to be an insert-if-absent enforced by a uniqueness
/// constraint on `(poll_id, identity)`, and [`PollStore::increment_option`] has to be a single
/// atomic read-modify-write that is idempotent per vote id (tally receipt).
pub trait PollStore: Send + Sync {
    /// Persist a poll and all of its options.
    fn create_poll(&self, poll: NewPollEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>>;
    fn find_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<OptionEntity>>>;
    /// Options of a poll ordered by position, counts included.
    fn list_options(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<OptionEntity>>>;

    /// Insert a ledger entry unless one already exists for the same `(poll_id, identity)`.
    fn insert_vote_record(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<RegisterOutcome>>;
    /// Flip the ledger entry's `tallied` flag once its increment is durable.
    fn mark_vote_tallied(&self, record: VoteRecordEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Ledger entries still waiting for their increment, created before `created_before`.
    fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>>;
    /// Tallied ledger entries whose tally receipt is still held, created before
    /// `created_before`.
    fn settled_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>>;
    /// Flag the ledger entry once its tally receipt has been released.
    fn mark_receipt_released(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Number of ledger entries per chosen option for a poll.
    fn count_vote_records(
        &self,
        poll_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<HashMap<Uuid, u64>>>;

    /// Atomically add one vote to the option unless `vote_id` was already applied, returning
    /// the resulting count.
    fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    /// Forget the tally receipt of a vote. Only safe once no increment for `vote_id` can still
    /// be in flight.
    fn release_receipt(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
