//! Delayed delivery — messages that become visible at or after a trigger time.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::queue::QueueStorage;

/// Delayed-delivery contract.
///
/// A message handed to [`DelayedQueue::put_with_delay`] must never reach its
/// queue before `trigger_time`. There is no upper bound on how late it may
/// arrive: delivery happens when [`DelayedQueue::release_due`] runs.
pub trait DelayedQueue: Send + Sync {
    fn put_with_delay(
        &self,
        queue: &str,
        messages: Vec<Vec<u8>>,
        trigger_time: SystemTime,
    ) -> StorageResult<()>;

    /// Move every message due at `now` into `queues`. Returns how many
    /// messages were released.
    fn release_due(&self, now: SystemTime, queues: &dyn QueueStorage) -> StorageResult<usize>;
}

/// Pending messages ordered by (trigger time, arrival sequence).
#[derive(Default)]
struct Pending {
    next_seq: u64,
    messages: BTreeMap<(SystemTime, u64), (String, Vec<u8>)>,
}

/// In-process delayed queue.
#[derive(Default)]
pub struct MemoryDelayedQueue {
    pending: Mutex<Pending>,
}

impl MemoryDelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .len()
    }
}

impl DelayedQueue for MemoryDelayedQueue {
    fn put_with_delay(
        &self,
        queue: &str,
        messages: Vec<Vec<u8>>,
        trigger_time: SystemTime,
    ) -> StorageResult<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let count = messages.len();
        for message in messages {
            let seq = pending.next_seq;
            pending.next_seq += 1;
            pending
                .messages
                .insert((trigger_time, seq), (queue.to_string(), message));
        }
        debug!(%queue, count, ?trigger_time, "messages delayed");
        Ok(())
    }

    fn release_due(&self, now: SystemTime, queues: &dyn QueueStorage) -> StorageResult<usize> {
        // Split off everything due, then deliver outside the lock.
        let due: Vec<((SystemTime, u64), (String, Vec<u8>))> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let later = pending.messages.split_off(&(now, u64::MAX));
            std::mem::replace(&mut pending.messages, later)
                .into_iter()
                .collect()
        };

        let total = due.len();
        let mut iter = due.into_iter().peekable();
        while let Some((key, (queue, message))) = iter.next() {
            // Batch consecutive messages bound for the same queue.
            let mut batch = vec![message];
            let mut keys = vec![key];
            while let Some((_, (next_queue, _))) = iter.peek() {
                if *next_queue != queue {
                    break;
                }
                if let Some((k, (_, m))) = iter.next() {
                    keys.push(k);
                    batch.push(m);
                }
            }

            let retry = batch.clone();
            if let Err(e) = queues.put_range(&queue, batch) {
                warn!(%queue, error = %e, "delayed delivery failed, keeping messages pending");
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                for (k, m) in keys.into_iter().zip(retry) {
                    pending.messages.insert(k, (queue.clone(), m));
                }
                for (k, (q, m)) in iter {
                    pending.messages.insert(k, (q, m));
                }
                return Err(e);
            }
        }

        if total > 0 {
            debug!(released = total, "delayed messages released");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::queue::MemoryQueueStorage;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn nothing_is_released_before_trigger_time() {
        let delayed = MemoryDelayedQueue::new();
        let queues = MemoryQueueStorage::new();
        delayed
            .put_with_delay("jobs", vec![b"late".to_vec()], at(100))
            .unwrap();

        assert_eq!(delayed.release_due(at(99), &queues).unwrap(), 0);
        assert!(queues.is_empty("jobs"));
        assert_eq!(delayed.pending_count(), 1);
    }

    #[test]
    fn due_messages_are_released_in_trigger_order() {
        let delayed = MemoryDelayedQueue::new();
        let queues = MemoryQueueStorage::new();
        delayed.put_with_delay("jobs", vec![b"b".to_vec()], at(20)).unwrap();
        delayed.put_with_delay("jobs", vec![b"a".to_vec()], at(10)).unwrap();
        delayed.put_with_delay("other", vec![b"c".to_vec()], at(15)).unwrap();
        delayed.put_with_delay("jobs", vec![b"z".to_vec()], at(30)).unwrap();

        assert_eq!(delayed.release_due(at(20), &queues).unwrap(), 3);
        assert_eq!(queues.take("jobs", 10), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(queues.take("other", 10), vec![b"c".to_vec()]);
        assert_eq!(delayed.pending_count(), 1);
    }

    struct BrokenQueues;

    impl QueueStorage for BrokenQueues {
        fn put_range(&self, queue: &str, _messages: Vec<Vec<u8>>) -> StorageResult<()> {
            Err(StorageError::InvalidQueueName(queue.to_string()))
        }
    }

    #[test]
    fn failed_delivery_keeps_messages_pending() {
        let delayed = MemoryDelayedQueue::new();
        delayed
            .put_with_delay("jobs", vec![b"1".to_vec(), b"2".to_vec()], at(1))
            .unwrap();
        delayed.put_with_delay("other", vec![b"3".to_vec()], at(2)).unwrap();

        assert!(delayed.release_due(at(5), &BrokenQueues).is_err());
        assert_eq!(delayed.pending_count(), 3);

        let queues = MemoryQueueStorage::new();
        assert_eq!(delayed.release_due(at(5), &queues).unwrap(), 3);
        assert_eq!(queues.len("jobs"), 2);
    }
}
