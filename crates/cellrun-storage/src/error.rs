//! Storage error types.

use cellrun_table::TableError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table store error: {0}")]
    Table(#[from] TableError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid queue name: {0:?}")]
    InvalidQueueName(String),
}
