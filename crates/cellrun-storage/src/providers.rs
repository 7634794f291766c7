//! Bundle of storage providers handed to the runtime and to services.

use std::sync::Arc;

use cellrun_table::MemoryTableStorage;

use crate::blob::{BlobStorage, TableBlobStorage};
use crate::delayed::{DelayedQueue, MemoryDelayedQueue};
use crate::queue::{MemoryQueueStorage, QueueStorage};

/// Everything a worker needs from the coordination substrate.
#[derive(Clone)]
pub struct StorageProviders {
    pub blobs: Arc<dyn BlobStorage>,
    pub queues: Arc<dyn QueueStorage>,
    pub delayed: Arc<dyn DelayedQueue>,
    pub tables: MemoryTableStorage,
}

impl StorageProviders {
    pub fn new(
        blobs: Arc<dyn BlobStorage>,
        queues: Arc<dyn QueueStorage>,
        delayed: Arc<dyn DelayedQueue>,
        tables: MemoryTableStorage,
    ) -> Self {
        Self {
            blobs,
            queues,
            delayed,
            tables,
        }
    }

    /// Fully in-process providers. Blobs are stored through the table store.
    pub fn in_memory() -> Self {
        let tables = MemoryTableStorage::new();
        Self {
            blobs: Arc::new(TableBlobStorage::new(tables.clone())),
            queues: Arc::new(MemoryQueueStorage::new()),
            delayed: Arc::new(MemoryDelayedQueue::new()),
            tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BLOB_TABLE, BlobKey, BlobStorageExt};

    #[test]
    fn in_memory_blobs_share_the_table_store() {
        let providers = StorageProviders::in_memory();
        providers
            .blobs
            .put_value(&BlobKey::new("c", "n"), &true)
            .unwrap();
        assert_eq!(providers.tables.entity_count(BLOB_TABLE).unwrap(), 1);
    }
}
