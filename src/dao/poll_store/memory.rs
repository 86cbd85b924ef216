//! In-process [`PollStore`] backed by concurrent hash maps.
//!
//! The ledger map's entry API provides the insert-if-absent uniqueness check and each option
//! lives in its own map slot, so increments only lock the shard holding that option.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{NewPollEntity, OptionEntity, PollEntity, RegisterOutcome, VoteRecordEntity},
    poll_store::PollStore,
    storage::{StorageError, StorageResult},
};

#[derive(Clone, Default)]
pub struct MemoryPollStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    polls: DashMap<Uuid, PollEntity>,
    poll_options: DashMap<Uuid, Vec<Uuid>>,
    options: DashMap<Uuid, OptionSlot>,
    ledger: DashMap<(Uuid, String), VoteRecordEntity>,
}

struct OptionSlot {
    option: OptionEntity,
    receipts: HashSet<Uuid>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn option_snapshot(&self, option_id: &Uuid) -> Option<OptionEntity> {
        self.inner
            .options
            .get(option_id)
            .map(|slot| slot.option.clone())
    }

    fn increment(&self, poll_id: Uuid, option_id: Uuid, vote_id: Uuid) -> StorageResult<u64> {
        let mut slot = self
            .inner
            .options
            .get_mut(&option_id)
            .filter(|slot| slot.option.poll_id == poll_id)
            .ok_or_else(|| StorageError::missing("option", option_id))?;

        if slot.receipts.insert(vote_id) {
            slot.option.votes += 1;
        }
        Ok(slot.option.votes)
    }

    fn update_record(
        &self,
        record: &VoteRecordEntity,
        update: impl FnOnce(&mut VoteRecordEntity),
    ) -> StorageResult<()> {
        let key = (record.poll_id, record.identity.clone());
        let mut entry = self
            .inner
            .ledger
            .get_mut(&key)
            .filter(|entry| entry.id == record.id)
            .ok_or_else(|| StorageError::missing("vote record", record.id))?;
        update(entry.value_mut());
        Ok(())
    }

    fn select_records(
        &self,
        limit: usize,
        predicate: impl Fn(&VoteRecordEntity) -> bool,
    ) -> Vec<VoteRecordEntity> {
        self.inner
            .ledger
            .iter()
            .filter(|entry| predicate(entry.value()))
            .take(limit)
            .map(|entry| entry.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn held_receipts(&self, option_id: Uuid) -> usize {
        self.inner
            .options
            .get(&option_id)
            .map(|slot| slot.receipts.len())
            .unwrap_or(0)
    }
}

impl PollStore for MemoryPollStore {
    fn create_poll(&self, poll: NewPollEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let NewPollEntity { poll, options } = poll;
            let mut ordered = options;
            ordered.sort_by_key(|option| option.position);

            let ids = ordered.iter().map(|option| option.id).collect();
            for option in ordered {
                store.inner.options.insert(
                    option.id,
                    OptionSlot {
                        option,
                        receipts: HashSet::new(),
                    },
                );
            }
            store.inner.poll_options.insert(poll.id, ids);
            // Published last so readers never see a poll without its options.
            store.inner.polls.insert(poll.id, poll);
            Ok(())
        })
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.polls.get(&id).map(|poll| poll.clone())) })
    }

    fn find_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<OptionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .option_snapshot(&option_id)
                .filter(|option| option.poll_id == poll_id))
        })
    }

    fn list_options(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<OptionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let ids = store
                .inner
                .poll_options
                .get(&poll_id)
                .map(|ids| ids.clone())
                .unwrap_or_default();
            Ok(ids
                .iter()
                .filter_map(|id| store.option_snapshot(id))
                .collect())
        })
    }

    fn insert_vote_record(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<RegisterOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let key = (record.poll_id, record.identity.clone());
            match store.inner.ledger.entry(key) {
                Entry::Occupied(existing) => Ok(RegisterOutcome::Exists(existing.get().clone())),
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    Ok(RegisterOutcome::Inserted)
                }
            }
        })
    }

    fn mark_vote_tallied(&self, record: VoteRecordEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_record(&record, |entry| entry.tallied = true) })
    }

    fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.select_records(limit, |entry| {
                !entry.tallied && entry.created_at < created_before
            }))
        })
    }

    fn settled_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.select_records(limit, |entry| {
                entry.tallied && !entry.receipt_released && entry.created_at < created_before
            }))
        })
    }

    fn mark_receipt_released(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_record(&record, |entry| entry.receipt_released = true) })
    }

    fn count_vote_records(
        &self,
        poll_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<HashMap<Uuid, u64>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut counts = HashMap::new();
            for entry in store.inner.ledger.iter() {
                if entry.poll_id == poll_id {
                    *counts.entry(entry.option_id).or_insert(0) += 1;
                }
            }
            Ok(counts)
        })
    }

    fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.increment(poll_id, option_id, vote_id) })
    }

    fn release_receipt(
        &self,
        _poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut slot) = store.inner.options.get_mut(&option_id) {
                slot.receipts.remove(&vote_id);
            }
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &MemoryPollStore, texts: &[&str]) -> (Uuid, Vec<Uuid>) {
        let poll = PollEntity {
            id: Uuid::new_v4(),
            question: "Favourite colour?".into(),
            created_at: SystemTime::now(),
        };
        let options: Vec<OptionEntity> = texts
            .iter()
            .enumerate()
            .map(|(position, text)| OptionEntity {
                id: Uuid::new_v4(),
                poll_id: poll.id,
                position: position as u32,
                text: (*text).into(),
                votes: 0,
            })
            .collect();
        let ids = options.iter().map(|option| option.id).collect();
        let poll_id = poll.id;
        store
            .create_poll(NewPollEntity { poll, options })
            .await
            .unwrap();
        (poll_id, ids)
    }

    #[tokio::test]
    async fn options_are_listed_in_position_order() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue", "Green"]).await;

        let listed = store.list_options(poll_id).await.unwrap();
        let texts: Vec<_> = listed.iter().map(|option| option.text.as_str()).collect();
        assert_eq!(texts, ["Red", "Blue", "Green"]);
        assert_eq!(listed[0].id, ids[0]);
    }

    #[tokio::test]
    async fn find_option_rejects_foreign_poll() {
        let store = MemoryPollStore::new();
        let (_, ids) = seed(&store, &["Red", "Blue"]).await;
        let (other_poll, _) = seed(&store, &["Yes", "No"]).await;

        assert!(store.find_option(other_poll, ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_insert_for_same_identity_returns_existing_record() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue"]).await;

        let first = VoteRecordEntity::new(poll_id, "10.0.0.1", ids[0]);
        let second = VoteRecordEntity::new(poll_id, "10.0.0.1", ids[1]);

        assert_eq!(
            store.insert_vote_record(first.clone()).await.unwrap(),
            RegisterOutcome::Inserted
        );
        match store.insert_vote_record(second).await.unwrap() {
            RegisterOutcome::Exists(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected existing record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn increment_is_idempotent_per_vote_id() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue"]).await;
        let vote_id = Uuid::new_v4();

        assert_eq!(store.increment_option(poll_id, ids[0], vote_id).await.unwrap(), 1);
        assert_eq!(store.increment_option(poll_id, ids[0], vote_id).await.unwrap(), 1);
        assert_eq!(
            store
                .increment_option(poll_id, ids[0], Uuid::new_v4())
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn increment_of_unknown_option_is_an_error() {
        let store = MemoryPollStore::new();
        let (poll_id, _) = seed(&store, &["Red", "Blue"]).await;

        let err = store
            .increment_option(poll_id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Missing { entity: "option", .. }));
    }

    #[tokio::test]
    async fn pending_records_exclude_tallied_ones() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue"]).await;
        let tallied = VoteRecordEntity::new(poll_id, "a", ids[0]);
        let pending = VoteRecordEntity::new(poll_id, "b", ids[1]);
        store.insert_vote_record(tallied.clone()).await.unwrap();
        store.insert_vote_record(pending.clone()).await.unwrap();
        store.mark_vote_tallied(tallied).await.unwrap();

        let later = SystemTime::now() + std::time::Duration::from_secs(1);
        let found = store.pending_vote_records(later, 10).await.unwrap();
        assert_eq!(found, vec![pending]);

        let counts = store.count_vote_records(poll_id).await.unwrap();
        assert_eq!(counts.get(&ids[0]), Some(&1));
        assert_eq!(counts.get(&ids[1]), Some(&1));
    }

    #[tokio::test]
    async fn settled_records_are_listed_until_their_receipt_is_released() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue"]).await;
        let record = VoteRecordEntity::new(poll_id, "a", ids[0]);
        store.insert_vote_record(record.clone()).await.unwrap();
        store.increment_option(poll_id, ids[0], record.id).await.unwrap();

        let later = SystemTime::now() + std::time::Duration::from_secs(1);
        assert!(store.settled_vote_records(later, 10).await.unwrap().is_empty());

        store.mark_vote_tallied(record.clone()).await.unwrap();
        let settled = store.settled_vote_records(later, 10).await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].id, record.id);

        store.release_receipt(poll_id, ids[0], record.id).await.unwrap();
        store.mark_receipt_released(record).await.unwrap();
        assert!(store.settled_vote_records(later, 10).await.unwrap().is_empty());
        assert_eq!(store.held_receipts(ids[0]), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = MemoryPollStore::new();
        let (poll_id, ids) = seed(&store, &["Red", "Blue"]).await;

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                let option_id = ids[0];
                tokio::spawn(async move {
                    store
                        .increment_option(poll_id, option_id, Uuid::new_v4())
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let options = store.list_options(poll_id).await.unwrap();
        assert_eq!(options[0].votes, 200);
        assert_eq!(options[1].votes, 0);
    }
}
