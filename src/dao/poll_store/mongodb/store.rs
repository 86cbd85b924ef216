use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoOptionDocument, MongoPollDocument, MongoVoteDocument, doc_id, votes_from_bson},
};
use crate::dao::{
    models::{NewPollEntity, OptionEntity, PollEntity, RegisterOutcome, VoteRecordEntity},
    poll_store::PollStore,
    storage::StorageResult,
};

const POLL_COLLECTION_NAME: &str = "polls";
const OPTION_COLLECTION_NAME: &str = "options";
const VOTE_COLLECTION_NAME: &str = "vote_records";

/// MongoDB-backed [`PollStore`].
///
/// Ledger uniqueness comes from a unique index on `vote_records(poll_id, identity)` and
/// increments are a single `findOneAndUpdate` combining `$inc` with a receipt guard.
#[derive(Clone)]
pub struct MongoPollStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoPollStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let ledger_unique = IndexModel::builder()
            .keys(doc! {"poll_id": 1, "identity": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("vote_poll_identity_uniq".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        self.vote_collection()
            .await
            .create_index(ledger_unique)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: VOTE_COLLECTION_NAME,
                index: "poll_id,identity",
                source,
            })?;

        let ledger_pending = IndexModel::builder()
            .keys(doc! {"tallied": 1, "created_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("vote_pending_idx".to_owned()))
                    .build(),
            )
            .build();
        self.vote_collection()
            .await
            .create_index(ledger_pending)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: VOTE_COLLECTION_NAME,
                index: "tallied,created_at",
                source,
            })?;

        let option_order = IndexModel::builder()
            .keys(doc! {"poll_id": 1, "position": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("option_poll_position_idx".to_owned()))
                    .build(),
            )
            .build();
        self.option_collection()
            .await
            .create_index(option_order)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: OPTION_COLLECTION_NAME,
                index: "poll_id,position",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn poll_collection(&self) -> Collection<MongoPollDocument> {
        self.database().await.collection(POLL_COLLECTION_NAME)
    }

    async fn option_collection(&self) -> Collection<MongoOptionDocument> {
        self.database().await.collection(OPTION_COLLECTION_NAME)
    }

    async fn vote_collection(&self) -> Collection<MongoVoteDocument> {
        self.database().await.collection(VOTE_COLLECTION_NAME)
    }

    async fn create_poll(&self, poll: NewPollEntity) -> MongoResult<()> {
        let NewPollEntity { poll, options } = poll;
        let id = poll.id;
        let option_documents: Vec<MongoOptionDocument> =
            options.into_iter().map(Into::into).collect();

        // Options go in first: a poll document is only visible once its options exist.
        if !option_documents.is_empty() {
            self.option_collection()
                .await
                .insert_many(option_documents)
                .await
                .map_err(|source| MongoDaoError::SavePoll { id, source })?;
        }

        self.poll_collection()
            .await
            .insert_one(MongoPollDocument::from(poll))
            .await
            .map_err(|source| MongoDaoError::SavePoll { id, source })?;

        Ok(())
    }

    async fn find_poll(&self, id: Uuid) -> MongoResult<Option<PollEntity>> {
        let document = self
            .poll_collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadPoll { id, source })?;

        document.map(PollEntity::try_from).transpose()
    }

    async fn find_option(&self, poll_id: Uuid, option_id: Uuid) -> MongoResult<Option<OptionEntity>> {
        let document = self
            .option_collection()
            .await
            .find_one(option_filter(poll_id, option_id))
            .await
            .map_err(|source| MongoDaoError::LoadOptions { poll_id, source })?;

        document.map(OptionEntity::try_from).transpose()
    }

    async fn list_options(&self, poll_id: Uuid) -> MongoResult<Vec<OptionEntity>> {
        let documents: Vec<MongoOptionDocument> = self
            .option_collection()
            .await
            .find(doc! {"poll_id": poll_id.to_string()})
            .sort(doc! {"position": 1})
            .await
            .map_err(|source| MongoDaoError::LoadOptions { poll_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadOptions { poll_id, source })?;

        documents.into_iter().map(OptionEntity::try_from).collect()
    }

    async fn insert_vote_record(&self, record: VoteRecordEntity) -> MongoResult<RegisterOutcome> {
        let vote_id = record.id;
        let poll_id = record.poll_id;
        let identity = record.identity.clone();
        let collection = self.vote_collection().await;

        match collection.insert_one(MongoVoteDocument::from(record)).await {
            Ok(_) => Ok(RegisterOutcome::Inserted),
            Err(err) if is_duplicate_key(&err) => {
                let existing = collection
                    .find_one(doc! {"poll_id": poll_id.to_string(), "identity": identity})
                    .await
                    .map_err(|source| MongoDaoError::RecordVote { vote_id, source })?
                    .ok_or(MongoDaoError::VoteRecordMissing { vote_id })?;
                Ok(RegisterOutcome::Exists(existing.try_into()?))
            }
            Err(source) => Err(MongoDaoError::RecordVote { vote_id, source }),
        }
    }

    async fn set_vote_flag(&self, record: &VoteRecordEntity, flag: &str) -> MongoResult<()> {
        let vote_id = record.id;
        let mut flags = Document::new();
        flags.insert(flag, true);
        let result = self
            .vote_collection()
            .await
            .update_one(doc_id(vote_id), doc! {"$set": flags})
            .await
            .map_err(|source| MongoDaoError::RecordVote { vote_id, source })?;

        if result.matched_count == 0 {
            return Err(MongoDaoError::VoteRecordMissing { vote_id });
        }
        Ok(())
    }

    async fn find_vote_records(
        &self,
        filter: Document,
        limit: usize,
    ) -> MongoResult<Vec<VoteRecordEntity>> {
        let documents: Vec<MongoVoteDocument> = self
            .vote_collection()
            .await
            .find(filter)
            .sort(doc! {"created_at": 1})
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::QueryLedger { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryLedger { source })?;

        documents
            .into_iter()
            .map(VoteRecordEntity::try_from)
            .collect()
    }

    async fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> MongoResult<Vec<VoteRecordEntity>> {
        let filter = doc! {
            "tallied": false,
            "created_at": {"$lt": DateTime::from_system_time(created_before)},
        };
        self.find_vote_records(filter, limit).await
    }

    async fn settled_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> MongoResult<Vec<VoteRecordEntity>> {
        // `$ne` also matches ledger entries written before the flag existed.
        let filter = doc! {
            "tallied": true,
            "receipt_released": {"$ne": true},
            "created_at": {"$lt": DateTime::from_system_time(created_before)},
        };
        self.find_vote_records(filter, limit).await
    }

    async fn count_vote_records(&self, poll_id: Uuid) -> MongoResult<HashMap<Uuid, u64>> {
        let pipeline = vec![
            doc! {"$match": {"poll_id": poll_id.to_string()}},
            doc! {"$group": {"_id": "$option_id", "count": {"$sum": 1_i64}}},
        ];
        let groups: Vec<Document> = self
            .vote_collection()
            .await
            .aggregate(pipeline)
            .await
            .map_err(|source| MongoDaoError::QueryLedger { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryLedger { source })?;

        let mut counts = HashMap::with_capacity(groups.len());
        for group in groups {
            let option_id = group
                .get_str("_id")
                .ok()
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .ok_or_else(|| MongoDaoError::MalformedDocument {
                    reason: "ledger group without option id".into(),
                })?;
            let count = group
                .get_i64("count")
                .map_err(|err| MongoDaoError::MalformedDocument {
                    reason: err.to_string(),
                })?;
            counts.insert(option_id, votes_from_bson(count));
        }
        Ok(counts)
    }

    async fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> MongoResult<u64> {
        let collection = self.option_collection().await;
        let receipt = vote_id.to_string();

        let mut guarded = option_filter(poll_id, option_id);
        guarded.insert("receipts", doc! {"$ne": receipt.as_str()});
        let update = doc! {
            "$inc": {"votes": 1_i64},
            "$push": {"receipts": receipt.as_str()},
        };

        let updated = collection
            .find_one_and_update(guarded, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::IncrementOption { option_id, source })?;

        if let Some(document) = updated {
            return Ok(votes_from_bson(document.votes));
        }

        // Either the receipt is already present (retry of an applied vote) or the option is gone.
        let current = collection
            .find_one(option_filter(poll_id, option_id))
            .await
            .map_err(|source| MongoDaoError::IncrementOption { option_id, source })?
            .ok_or(MongoDaoError::OptionMissing { option_id })?;
        Ok(votes_from_bson(current.votes))
    }

    async fn release_receipt(&self, poll_id: Uuid, option_id: Uuid, vote_id: Uuid) -> MongoResult<()> {
        self.option_collection()
            .await
            .update_one(
                option_filter(poll_id, option_id),
                doc! {"$pull": {"receipts": vote_id.to_string()}},
            )
            .await
            .map_err(|source| MongoDaoError::IncrementOption { option_id, source })?;
        Ok(())
    }
}

fn option_filter(poll_id: Uuid, option_id: Uuid) -> Document {
    doc! {"_id": option_id.to_string(), "poll_id": poll_id.to_string()}
}

impl PollStore for MongoPollStore {
    fn create_poll(&self, poll: NewPollEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_poll(poll).await.map_err(Into::into) })
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_poll(id).await.map_err(Into::into) })
    }

    fn find_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<OptionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_option(poll_id, option_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_options(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<OptionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_options(poll_id).await.map_err(Into::into) })
    }

    fn insert_vote_record(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<RegisterOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.insert_vote_record(record).await.map_err(Into::into) })
    }

    fn mark_vote_tallied(&self, record: VoteRecordEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_vote_flag(&record, "tallied").await.map_err(Into::into) })
    }

    fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .pending_vote_records(created_before, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn settled_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .settled_vote_records(created_before, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn mark_receipt_released(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .set_vote_flag(&record, "receipt_released")
                .await
                .map_err(Into::into)
        })
    }

    fn count_vote_records(
        &self,
        poll_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<HashMap<Uuid, u64>>> {
        let store = self.clone();
        Box::pin(async move { store.count_vote_records(poll_id).await.map_err(Into::into) })
    }

    fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_option(poll_id, option_id, vote_id)
                .await
                .map_err(Into::into)
        })
    }

    fn release_receipt(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .release_receipt(poll_id, option_id, vote_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
