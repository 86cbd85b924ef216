//! Fault-injecting [`PollStore`] wrapper for exercising failure paths.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{NewPollEntity, OptionEntity, PollEntity, RegisterOutcome, VoteRecordEntity},
    poll_store::{MemoryPollStore, PollStore},
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
pub struct Faults {
    /// Number of upcoming increments that fail before touching the store.
    pub fail_increments: AtomicU32,
    /// Number of upcoming ledger inserts that commit but report a failure.
    pub lose_register_responses: AtomicU32,
    pub fail_snapshots: AtomicBool,
    pub fail_mark_tallied: AtomicBool,
    /// Number of upcoming mark-tallied calls that commit but report a failure.
    pub lose_mark_tallied_responses: AtomicU32,
    /// Delay in milliseconds applied to the next increment. The delayed write runs on its own
    /// task, so it still lands after the caller stops waiting, like a slow backend would.
    pub stall_next_increment_ms: AtomicU64,
    /// Health checks and reconnects fail while set.
    pub fail_health: AtomicBool,
    pub increments_seen: AtomicU32,
}

#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryPollStore,
    pub faults: Arc<Faults>,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn outage(step: &str) -> StorageError {
    StorageError::unavailable(
        format!("injected {step} failure"),
        std::io::Error::other("connection reset"),
    )
}

impl PollStore for FaultyStore {
    fn create_poll(&self, poll: NewPollEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.create_poll(poll)
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        self.inner.find_poll(id)
    }

    fn find_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<OptionEntity>>> {
        self.inner.find_option(poll_id, option_id)
    }

    fn list_options(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<OptionEntity>>> {
        if self.faults.fail_snapshots.load(Ordering::SeqCst) {
            return Box::pin(async { Err(outage("snapshot")) });
        }
        self.inner.list_options(poll_id)
    }

    fn insert_vote_record(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<RegisterOutcome>> {
        let inner = self.inner.clone();
        let faults = self.faults.clone();
        Box::pin(async move {
            let outcome = inner.insert_vote_record(record).await?;
            if take(&faults.lose_register_responses) {
                return Err(outage("register"));
            }
            Ok(outcome)
        })
    }

    fn mark_vote_tallied(&self, record: VoteRecordEntity) -> BoxFuture<'static, StorageResult<()>> {
        if self.faults.fail_mark_tallied.load(Ordering::SeqCst) {
            return Box::pin(async { Err(outage("mark tallied")) });
        }
        let inner = self.inner.clone();
        let faults = self.faults.clone();
        Box::pin(async move {
            inner.mark_vote_tallied(record).await?;
            if take(&faults.lose_mark_tallied_responses) {
                return Err(outage("mark tallied"));
            }
            Ok(())
        })
    }

    fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        self.inner.pending_vote_records(created_before, limit)
    }

    fn settled_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        self.inner.settled_vote_records(created_before, limit)
    }

    fn mark_receipt_released(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.mark_receipt_released(record)
    }

    fn count_vote_records(
        &self,
        poll_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<HashMap<Uuid, u64>>> {
        self.inner.count_vote_records(poll_id)
    }

    fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        self.faults.increments_seen.fetch_add(1, Ordering::SeqCst);
        if take(&self.faults.fail_increments) {
            return Box::pin(async { Err(outage("increment")) });
        }
        let stall = self.faults.stall_next_increment_ms.swap(0, Ordering::SeqCst);
        if stall > 0 {
            let inner = self.inner.clone();
            let write = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(stall)).await;
                inner.increment_option(poll_id, option_id, vote_id).await
            });
            return Box::pin(async move {
                write
                    .await
                    .unwrap_or_else(|_| Err(outage("stalled increment")))
            });
        }
        self.inner.increment_option(poll_id, option_id, vote_id)
    }

    fn release_receipt(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.release_receipt(poll_id, option_id, vote_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        if self.faults.fail_health.load(Ordering::SeqCst) {
            return Box::pin(async { Err(outage("health check")) });
        }
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        if self.faults.fail_health.load(Ordering::SeqCst) {
            return Box::pin(async { Err(outage("reconnect")) });
        }
        self.inner.try_reconnect()
    }
}
