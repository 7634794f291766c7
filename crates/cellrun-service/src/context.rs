//! ServiceContext — what a work function gets to talk to the substrate.

use std::time::SystemTime;

use cellrun_storage::{
    DelayedQueue, QueueStorage, StorageError, StorageProviders, StorageResult, queue_name_of,
};
use cellrun_table::MemoryTableStorage;
use serde::Serialize;

/// Storage handles plus message helpers, cloned into every execution.
#[derive(Clone)]
pub struct ServiceContext {
    storage: StorageProviders,
}

impl ServiceContext {
    pub fn new(storage: StorageProviders) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageProviders {
        &self.storage
    }

    pub fn tables(&self) -> &MemoryTableStorage {
        &self.storage.tables
    }

    // ── Immediate messages ─────────────────────────────────────────

    /// Put a message into the queue named after its type.
    pub fn put<T: Serialize>(&self, message: &T) -> StorageResult<()> {
        self.put_range(std::slice::from_ref(message))
    }

    /// Put a message into the queue `queue`.
    pub fn put_to<T: Serialize>(&self, message: &T, queue: &str) -> StorageResult<()> {
        self.put_range_to(std::slice::from_ref(message), queue)
    }

    /// Put messages into the queue named after their type.
    pub fn put_range<T: Serialize>(&self, messages: &[T]) -> StorageResult<()> {
        self.put_range_to(messages, &queue_name_of::<T>())
    }

    /// Put messages into the queue `queue`.
    pub fn put_range_to<T: Serialize>(&self, messages: &[T], queue: &str) -> StorageResult<()> {
        self.storage.queues.put_range(queue, encode_all(messages)?)
    }

    // ── Delayed messages ───────────────────────────────────────────

    /// Put a message into the queue named after its type, not before
    /// `trigger_time`.
    pub fn put_with_delay<T: Serialize>(&self, message: &T, trigger_time: SystemTime) -> StorageResult<()> {
        self.put_range_with_delay(std::slice::from_ref(message), trigger_time)
    }

    pub fn put_with_delay_to<T: Serialize>(
        &self,
        message: &T,
        trigger_time: SystemTime,
        queue: &str,
    ) -> StorageResult<()> {
        self.put_range_with_delay_to(std::slice::from_ref(message), trigger_time, queue)
    }

    pub fn put_range_with_delay<T: Serialize>(
        &self,
        messages: &[T],
        trigger_time: SystemTime,
    ) -> StorageResult<()> {
        self.put_range_with_delay_to(messages, trigger_time, &queue_name_of::<T>())
    }

    /// Put messages into `queue`; none of them becomes visible before
    /// `trigger_time`.
    pub fn put_range_with_delay_to<T: Serialize>(
        &self,
        messages: &[T],
        trigger_time: SystemTime,
        queue: &str,
    ) -> StorageResult<()> {
        self.storage
            .delayed
            .put_with_delay(queue, encode_all(messages)?, trigger_time)
    }
}

fn encode_all<T: Serialize>(messages: &[T]) -> StorageResult<Vec<Vec<u8>>> {
    messages
        .iter()
        .map(|m| serde_json::to_vec(m).map_err(|e| StorageError::Serialize(e.to_string())))
        .collect()
}
