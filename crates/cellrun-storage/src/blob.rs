//! Durable blob contract and its in-memory providers.
//!
//! Values are addressed by a [`BlobKey`] (container + name). The object-safe
//! [`BlobStorage`] trait moves raw bytes; [`BlobStorageExt`] layers typed
//! JSON access on top of any implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use cellrun_table::{MemoryTableStorage, TableEntity, TableError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Address of a durable value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub container: String,
    pub name: String,
}

impl BlobKey {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Keyed durable storage.
///
/// A write must be visible to the next read issued by the same process.
pub trait BlobStorage: Send + Sync {
    fn get_bytes(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>>;

    fn put_bytes(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()>;

    /// Returns true if a value was removed.
    fn delete(&self, key: &BlobKey) -> StorageResult<bool>;
}

/// Typed access to any [`BlobStorage`].
pub trait BlobStorageExt: BlobStorage {
    fn get_value<V: DeserializeOwned>(&self, key: &BlobKey) -> StorageResult<Option<V>> {
        match self.get_bytes(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Deserialize(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn put_value<V: Serialize + ?Sized>(&self, key: &BlobKey, value: &V) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.put_bytes(key, bytes)
    }
}

impl<B: BlobStorage + ?Sized> BlobStorageExt for B {}

// ── Memory provider ────────────────────────────────────────────────

/// Plain map-backed blob storage.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<BlobKey, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn get_bytes(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(key).cloned())
    }

    fn put_bytes(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(key.clone(), bytes);
        Ok(())
    }

    fn delete(&self, key: &BlobKey) -> StorageResult<bool> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.remove(key).is_some())
    }
}

// ── Table-backed provider ──────────────────────────────────────────

/// Default table holding blobs written through [`TableBlobStorage`].
pub const BLOB_TABLE: &str = "cellrunblobs";

#[derive(Debug, Serialize, Deserialize)]
struct BlobRecord {
    bytes: Vec<u8>,
}

/// Blob storage on top of the partitioned table store.
///
/// The container becomes the partition key and the blob name the row key,
/// all inside a single dedicated table.
#[derive(Clone)]
pub struct TableBlobStorage {
    tables: MemoryTableStorage,
    table: String,
}

impl TableBlobStorage {
    /// Use [`BLOB_TABLE`] in `tables`, creating it if needed.
    pub fn new(tables: MemoryTableStorage) -> Self {
        Self::with_table(tables, BLOB_TABLE)
    }

    pub fn with_table(tables: MemoryTableStorage, table: &str) -> Self {
        if tables.create_table(table) {
            debug!(%table, "blob table created");
        }
        Self {
            tables,
            table: table.to_string(),
        }
    }

    fn entity(key: &BlobKey, bytes: Vec<u8>) -> TableEntity<BlobRecord> {
        TableEntity::new(&key.container, &key.name, BlobRecord { bytes })
    }
}

impl BlobStorage for TableBlobStorage {
    fn get_bytes(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
        let row = self
            .tables
            .get::<BlobRecord>(&self.table, &key.container, &key.name)?;
        Ok(row.map(|entity| entity.value.bytes))
    }

    /// Upsert: update the row, insert it when absent. A concurrent writer
    /// winning the insert race turns into a second update.
    fn put_bytes(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()> {
        let batch = [Self::entity(key, bytes)];
        match self.tables.update(&self.table, &batch) {
            Err(TableError::EntityNotFound { .. }) => match self.tables.insert(&self.table, &batch) {
                Err(TableError::EntityAlreadyExists { .. }) => {
                    self.tables.update(&self.table, &batch)?;
                    Ok(())
                }
                other => Ok(other?),
            },
            other => Ok(other?),
        }
    }

    fn delete(&self, key: &BlobKey) -> StorageResult<bool> {
        let existed = self
            .tables
            .get::<BlobRecord>(&self.table, &key.container, &key.name)?
            .is_some();
        self.tables.delete(&self.table, &key.container, [&key.name])?;
        Ok(existed)
    }
}
