//! Entity types: the caller-facing typed view and the stored envelope.

use serde::{Deserialize, Serialize};

/// A typed row as seen by callers.
///
/// Reads return copies; nothing handed out by the store aliases its
/// internal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntity<T> {
    pub partition_key: String,
    pub row_key: String,
    pub value: T,
}

impl<T> TableEntity<T> {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>, value: T) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            value,
        }
    }
}

/// Type-erased form of a row at rest: serialized payload plus the type tag
/// of the value that produced it.
///
/// The tag is informational. Decoding never checks it against the type
/// requested by the reader; it only appears in error reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap `payload` with the type tag of `T`.
    pub fn of<T: ?Sized>(payload: Vec<u8>) -> Self {
        Self {
            type_tag: std::any::type_name::<T>().to_string(),
            payload,
        }
    }
}
