mod config;
mod error;
mod models;
mod store;

pub use config::{CouchConfig, DEFAULT_POLL_DATABASE};
pub use error::CouchDaoError;
pub use store::CouchPollStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::MissingDocument { entity, doc_id } => StorageError::missing(entity, doc_id),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
