//! Durable backend
//!
//! A queryable store that survives restarts independently of the log.
//! Writes land here after the log append succeeds; reads fall back here
//! when the cache misses.

mod store;
mod tables;

pub use store::RedbBackend;

use thiserror::Error;

/// Error type for durable backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("stored row codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl From<redb::TransactionError> for BackendError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
