//! Queue contract, in-memory provider and type-derived queue names.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Longest queue name accepted by the backing service.
pub const MAX_QUEUE_NAME_LEN: usize = 63;

/// Fire-and-forget message enqueue. No ordering is guaranteed to callers.
pub trait QueueStorage: Send + Sync {
    fn put_range(&self, queue: &str, messages: Vec<Vec<u8>>) -> StorageResult<()>;
}

/// Storage-safe queue name derived from a message type.
///
/// The full type path is lowercased, every run of characters outside
/// `[a-z0-9]` collapses to a single `-`, and the result is trimmed to
/// [`MAX_QUEUE_NAME_LEN`].
pub fn queue_name_of<T: ?Sized>() -> String {
    sanitize_queue_name(std::any::type_name::<T>())
}

fn sanitize_queue_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    name.truncate(MAX_QUEUE_NAME_LEN);
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Map-backed queues, one FIFO per name.
#[derive(Default)]
pub struct MemoryQueueStorage {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dequeue up to `max` messages from the front of `queue`.
    pub fn take(&self, queue: &str, max: usize) -> Vec<Vec<u8>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.get_mut(queue) {
            Some(pending) => {
                let n = max.min(pending.len());
                pending.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of messages waiting in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }
}

impl QueueStorage for MemoryQueueStorage {
    fn put_range(&self, queue: &str, messages: Vec<Vec<u8>>) -> StorageResult<()> {
        if queue.is_empty() {
            return Err(StorageError::InvalidQueueName(queue.to_string()));
        }
        let count = messages.len();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.entry(queue.to_string()).or_default().extend(messages);
        debug!(%queue, count, "messages enqueued");
        Ok(())
    }
}
