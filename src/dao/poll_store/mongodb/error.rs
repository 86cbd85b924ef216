use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server error code reported when a unique index rejects a write.
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save poll `{id}`")]
    SavePoll {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load poll `{id}`")]
    LoadPoll {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load options of poll `{poll_id}`")]
    LoadOptions {
        poll_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to record vote `{vote_id}`")]
    RecordVote {
        vote_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query the vote ledger")]
    QueryLedger {
        #[source]
        source: MongoError,
    },
    #[error("failed to increment option `{option_id}`")]
    IncrementOption {
        option_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("option `{option_id}` does not exist")]
    OptionMissing { option_id: Uuid },
    #[error("vote record `{vote_id}` does not exist")]
    VoteRecordMissing { vote_id: Uuid },
    #[error("stored document is malformed: {reason}")]
    MalformedDocument { reason: String },
}

/// Whether the error is a unique index violation.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}
