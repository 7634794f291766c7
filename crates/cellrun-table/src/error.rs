//! Error types for the partitioned table store.

use thiserror::Error;

/// Result type alias for table store operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors that can occur during table store operations.
///
/// Partition or row absence is never an error on the read path; it shows
/// up as an empty result instead.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("entity already exists: {table}/{partition_key}/{row_key}")]
    EntityAlreadyExists {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("entity not found: {table}/{partition_key}/{row_key}")]
    EntityNotFound {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("failed to deserialize entity stored as {type_tag}: {reason}")]
    DeserializationFailed { type_tag: String, reason: String },
}

impl TableError {
    pub(crate) fn already_exists(table: &str, partition_key: &str, row_key: &str) -> Self {
        TableError::EntityAlreadyExists {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }

    pub(crate) fn not_found(table: &str, partition_key: &str, row_key: &str) -> Self {
        TableError::EntityNotFound {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }
}
