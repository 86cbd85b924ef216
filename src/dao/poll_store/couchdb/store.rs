use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, json};
use uuid::Uuid;

use crate::dao::{
    models::{NewPollEntity, OptionEntity, PollEntity, RegisterOutcome, VoteRecordEntity},
    poll_store::PollStore,
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, BulkDocsResult, CouchOptionDocument, CouchPollDocument,
        CouchVoteDocument, END_SUFFIX, FindResponse, option_doc_id, option_prefix,
        pending_votes_query, poll_doc_id, settled_votes_query, vote_doc_id, vote_prefix,
    },
};

/// Upper bound on `_rev` compare-and-swap rounds before reporting contention.
const MAX_CAS_ATTEMPTS: u32 = 32;

/// Result of a conditional document write.
enum PutOutcome {
    Written,
    Conflict,
}

/// CouchDB-backed [`PollStore`].
///
/// Ledger entries are keyed by `(poll, identity)` so a create of an existing id answers
/// `409 Conflict`; option counts are updated through `_rev` compare-and-swap loops.
#[derive(Clone)]
pub struct CouchPollStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchPollStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_request(&self, method: Method) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, self.database);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .database_request(Method::PUT)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; the embedded `_rev` (or its absence) makes the write conditional.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn bulk_insert<T>(&self, documents: &[T]) -> CouchResult<()>
    where
        T: Serialize,
    {
        const BULK_DOCS: &str = "_bulk_docs";
        let response = self
            .request(Method::POST, BULK_DOCS)
            .json(&json!({ "docs": documents }))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: BULK_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: BULK_DOCS.to_string(),
                status: response.status(),
            });
        }

        let results = response
            .json::<Vec<BulkDocsResult>>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: BULK_DOCS.to_string(),
                source,
            })?;
        let rejected: Vec<String> = results
            .into_iter()
            .filter(|result| result.error.is_some())
            .map(|result| result.id)
            .collect();

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(CouchDaoError::BulkRejected { doc_ids: rejected })
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id.clone(),
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn create_poll(&self, poll: NewPollEntity) -> CouchResult<()> {
        let NewPollEntity { poll, options } = poll;
        let option_documents: Vec<CouchOptionDocument> =
            options.into_iter().map(Into::into).collect();
        if !option_documents.is_empty() {
            self.bulk_insert(&option_documents).await?;
        }

        let document = CouchPollDocument::from(poll);
        match self.put_document(&document.id, &document).await? {
            PutOutcome::Written => Ok(()),
            PutOutcome::Conflict => Err(CouchDaoError::RequestStatus {
                path: document.id,
                status: StatusCode::CONFLICT,
            }),
        }
    }

    async fn list_options(&self, poll_id: Uuid) -> CouchResult<Vec<OptionEntity>> {
        let mut documents = self
            .list_documents::<CouchOptionDocument>(&option_prefix(poll_id))
            .await?;
        documents.sort_by_key(|doc| doc.position);
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_vote_record(&self, record: VoteRecordEntity) -> CouchResult<RegisterOutcome> {
        let document = CouchVoteDocument::from(record);
        match self.put_document(&document.id, &document).await? {
            PutOutcome::Written => Ok(RegisterOutcome::Inserted),
            PutOutcome::Conflict => {
                let existing = self
                    .get_document::<CouchVoteDocument>(&document.id)
                    .await?
                    .ok_or_else(|| CouchDaoError::MissingDocument {
                        entity: "vote record",
                        doc_id: document.id.clone(),
                    })?;
                Ok(RegisterOutcome::Exists(existing.into()))
            }
        }
    }

    /// Apply `update` to the ledger document of `record` through a `_rev` compare-and-swap.
    /// `update` returns `false` when the document already holds the change.
    async fn update_vote_document(
        &self,
        record: &VoteRecordEntity,
        update: impl Fn(&mut CouchVoteDocument) -> bool,
    ) -> CouchResult<()> {
        let doc_id = vote_doc_id(record.poll_id, &record.identity);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut document = self
                .get_document::<CouchVoteDocument>(&doc_id)
                .await?
                .filter(|doc| doc.vote_id == record.id)
                .ok_or_else(|| CouchDaoError::MissingDocument {
                    entity: "vote record",
                    doc_id: doc_id.clone(),
                })?;
            if !update(&mut document) {
                return Ok(());
            }

            if let PutOutcome::Written = self.put_document(&doc_id, &document).await? {
                return Ok(());
            }
        }

        Err(CouchDaoError::RevisionContention {
            doc_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn mark_vote_tallied(&self, record: VoteRecordEntity) -> CouchResult<()> {
        self.update_vote_document(&record, |document| {
            !std::mem::replace(&mut document.tallied, true)
        })
        .await
    }

    async fn mark_receipt_released(&self, record: VoteRecordEntity) -> CouchResult<()> {
        self.update_vote_document(&record, |document| {
            !std::mem::replace(&mut document.receipt_released, true)
        })
        .await
    }

    async fn find_vote_records(&self, query: Value) -> CouchResult<Vec<VoteRecordEntity>> {
        const FIND: &str = "_find";
        let response = self
            .request(Method::POST, FIND)
            .json(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: FIND.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND.to_string(),
                status: response.status(),
            });
        }

        let payload = response
            .json::<FindResponse<CouchVoteDocument>>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: FIND.to_string(),
                source,
            })?;
        Ok(payload.docs.into_iter().map(Into::into).collect())
    }

    async fn count_vote_records(&self, poll_id: Uuid) -> CouchResult<HashMap<Uuid, u64>> {
        let documents = self
            .list_documents::<CouchVoteDocument>(&vote_prefix(poll_id))
            .await?;
        let mut counts = HashMap::new();
        for document in documents {
            *counts.entry(document.option_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn increment_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    ) -> CouchResult<u64> {
        let doc_id = option_doc_id(poll_id, option_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut document = self
                .get_document::<CouchOptionDocument>(&doc_id)
                .await?
                .ok_or_else(|| CouchDaoError::MissingDocument {
                    entity: "option",
                    doc_id: doc_id.clone(),
                })?;
            if document.receipts.contains(&vote_id) {
                return Ok(document.votes);
            }

            document.votes += 1;
            document.receipts.push(vote_id);
            if let PutOutcome::Written = self.put_document(&doc_id, &document).await? {
                return Ok(document.votes);
            }
        }

        Err(CouchDaoError::RevisionContention {
            doc_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn release_receipt(&self, poll_id: Uuid, option_id: Uuid, vote_id: Uuid) -> CouchResult<()> {
        let doc_id = option_doc_id(poll_id, option_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut document) = self.get_document::<CouchOptionDocument>(&doc_id).await? else {
                return Ok(());
            };
            if !document.receipts.contains(&vote_id) {
                return Ok(());
            }

            document.receipts.retain(|receipt| *receipt != vote_id);
            if let PutOutcome::Written = self.put_document(&doc_id, &document).await? {
                return Ok(());
            }
        }

        Err(CouchDaoError::RevisionContention {
            doc_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

impl PollStore for CouchPollStore {
    fn create_poll(&self, poll: NewPollEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_poll(poll).await.map_err(Into::into) })
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let maybe_doc = store
                .get_document::<CouchPollDocument>(&poll_doc_id(id))
                .await?;
            Ok(maybe_doc.map(PollEntity::try_from).transpose()?)
        })
    }

    fn find_option(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<OptionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let maybe_doc = store
                .get_document::<CouchOptionDocument>(&option_doc_id(poll_id, option_id))
                .await?;
            Ok(maybe_doc.map(Into::into))
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
        Box::pin(async move { store.mark_vote_tallied(record).await.map_err(Into::into) })
    }

    fn pending_vote_records(
        &self,
        created_before: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_vote_records(pending_votes_query(created_before, limit))
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
                .find_vote_records(settled_votes_query(created_before, limit))
                .await
                .map_err(Into::into)
        })
    }

    fn mark_receipt_released(
        &self,
        record: VoteRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.mark_receipt_released(record).await.map_err(Into::into) })
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
        Box::pin(async move {
            let path = store.database.to_string();
            let response = store
                .database_request(Method::GET)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: path.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
