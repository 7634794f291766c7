//! cellrun-storage — the coordination substrate as seen by a worker.
//!
//! Narrow contracts for the durable storage a worker talks to, plus
//! in-memory providers used in tests and by the standalone daemon:
//!
//! - [`BlobStorage`]: keyed durable values (service run-state lives here)
//! - [`QueueStorage`]: fire-and-forget message enqueue
//! - [`DelayedQueue`]: messages that must not become visible before a
//!   trigger time
//!
//! [`StorageProviders`] bundles one of each together with the partitioned
//! table store.

pub mod blob;
pub mod delayed;
pub mod error;
pub mod providers;
pub mod queue;

pub use blob::{BLOB_TABLE, BlobKey, BlobStorage, BlobStorageExt, MemoryBlobStorage, TableBlobStorage};
pub use delayed::{DelayedQueue, MemoryDelayedQueue};
pub use error::{StorageError, StorageResult};
pub use providers::StorageProviders;
pub use queue::{MemoryQueueStorage, QueueStorage, queue_name_of};
