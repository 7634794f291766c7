//! cellrun-table — partitioned table store for cellrun workers.
//!
//! An in-memory emulation of a remote table service addressed by a
//! two-level key: partition key, then row key. Rows are kept at rest as
//! type-erased [`Envelope`]s produced by a pluggable [`EntityCodec`];
//! callers decode them back into [`TableEntity<T>`] values at read time.
//!
//! # Architecture
//!
//! ```text
//! MemoryTableStorage<C: EntityCodec>
//!   └── Mutex (single global lock)
//!       └── table name → partition key → row key → Envelope
//! ```
//!
//! Batch writes are fail-fast and not atomic: when an `insert` or `update`
//! batch hits a conflict, entities written earlier in the same call stay
//! committed.

pub mod codec;
pub mod entity;
pub mod error;
pub mod store;

pub use codec::{EntityCodec, JsonCodec, MsgPackCodec};
pub use entity::{Envelope, TableEntity};
pub use error::{TableError, TableResult};
pub use store::MemoryTableStorage;
