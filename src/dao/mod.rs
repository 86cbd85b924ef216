/// Persistence model definitions shared by every backend.
pub mod models;
/// Poll, ledger and tally storage backends.
pub mod poll_store;
/// Storage abstraction layer for database operations.
pub mod storage;
