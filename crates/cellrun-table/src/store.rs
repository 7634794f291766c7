//! MemoryTableStorage — in-memory partitioned table store.
//!
//! Three nested maps (table → partition → row) behind one global mutex.
//! Every operation, read or write, on any table, is serialized against
//! every other, so each call observes a state that nothing mutates
//! mid-call. Rows within a partition are kept in a `BTreeMap`, which gives
//! range reads their ascending row-key order for free.
//!
//! Tables are created and deleted explicitly and never implicitly by a
//! write. Partitions are created on first insert and are never removed,
//! even when their last row is deleted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec::{EntityCodec, MsgPackCodec};
use crate::entity::{Envelope, TableEntity};
use crate::error::{TableError, TableResult};

type Partition = BTreeMap<String, Envelope>;
type Table = HashMap<String, Partition>;

/// Lock-guarded table map. Kept private so the locking strategy can change
/// without touching callers of [`MemoryTableStorage`].
#[derive(Default)]
struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    fn table(&self, name: &str) -> TableResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| TableError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> TableResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| TableError::TableNotFound(name.to_string()))
    }
}

/// Thread-safe in-memory table store.
///
/// Cheap to clone; clones share the same underlying tables.
pub struct MemoryTableStorage<C = MsgPackCodec> {
    inner: Arc<Mutex<Tables>>,
    codec: Arc<C>,
}

impl<C> Clone for MemoryTableStorage<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl MemoryTableStorage<MsgPackCodec> {
    /// Create an empty store using the default binary codec.
    pub fn new() -> Self {
        Self::with_codec(MsgPackCodec)
    }
}

impl Default for MemoryTableStorage<MsgPackCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: EntityCodec> MemoryTableStorage<C> {
    /// Create an empty store that encodes rows with `codec`.
    pub fn with_codec(codec: C) -> Self {
        debug!(codec = codec.name(), "in-memory table store opened");
        Self {
            inner: Arc::new(Mutex::new(Tables::default())),
            codec: Arc::new(codec),
        }
    }

    /// Acquire the global lock. Every write is a single map operation, so
    /// the state behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Tables ─────────────────────────────────────────────────────

    /// Create a table. Returns false (and changes nothing) if it already exists.
    pub fn create_table(&self, name: &str) -> bool {
        let mut guard = self.lock();
        if guard.tables.contains_key(name) {
            return false;
        }
        guard.tables.insert(name.to_string(), Table::new());
        debug!(table = %name, "table created");
        true
    }

    /// Delete a table with all its partitions. Returns true if it existed.
    pub fn delete_table(&self, name: &str) -> bool {
        let existed = self.lock().tables.remove(name).is_some();
        debug!(table = %name, existed, "table deleted");
        existed
    }

    /// Snapshot of the current table names.
    pub fn list_tables(&self) -> BTreeSet<String> {
        self.lock().tables.keys().cloned().collect()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.lock().tables.contains_key(name)
    }

    /// Number of rows across all partitions of a table.
    pub fn entity_count(&self, table: &str) -> TableResult<usize> {
        let guard = self.lock();
        Ok(guard.table(table)?.values().map(Partition::len).sum())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// All rows of a table, any partition, in no particular order.
    pub fn get_all<T: DeserializeOwned>(&self, table: &str) -> TableResult<Vec<TableEntity<T>>> {
        let guard = self.lock();
        let mut results = Vec::new();
        for (partition_key, partition) in guard.table(table)? {
            for (row_key, envelope) in partition {
                results.push(self.decode(partition_key, row_key, envelope)?);
            }
        }
        Ok(results)
    }

    /// All rows of one partition. An unknown partition yields an empty result.
    pub fn get_partition<T: DeserializeOwned>(
        &self,
        table: &str,
        partition_key: &str,
    ) -> TableResult<Vec<TableEntity<T>>> {
        let guard = self.lock();
        let Some(partition) = guard.table(table)?.get(partition_key) else {
            return Ok(Vec::new());
        };
        partition
            .iter()
            .map(|(row_key, envelope)| self.decode(partition_key, row_key, envelope))
            .collect()
    }

    /// Rows with `start_row_key <= row_key < end_row_key`, ascending by row
    /// key. An empty `end_row_key` leaves the range open-ended.
    pub fn get_range<T: DeserializeOwned>(
        &self,
        table: &str,
        partition_key: &str,
        start_row_key: &str,
        end_row_key: &str,
    ) -> TableResult<Vec<TableEntity<T>>> {
        let guard = self.lock();
        let Some(partition) = guard.table(table)?.get(partition_key) else {
            return Ok(Vec::new());
        };

        let end = if end_row_key.is_empty() {
            Bound::Unbounded
        } else if start_row_key < end_row_key {
            Bound::Excluded(end_row_key)
        } else {
            // BTreeMap::range panics on an inverted range.
            return Ok(Vec::new());
        };

        partition
            .range::<str, _>((Bound::Included(start_row_key), end))
            .map(|(row_key, envelope)| self.decode(partition_key, row_key, envelope))
            .collect()
    }

    /// Rows for the given keys, in the order the keys were supplied. Keys
    /// with no row are skipped.
    pub fn get_by_keys<T, I, K>(
        &self,
        table: &str,
        partition_key: &str,
        row_keys: I,
    ) -> TableResult<Vec<TableEntity<T>>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let guard = self.lock();
        let Some(partition) = guard.table(table)?.get(partition_key) else {
            return Ok(Vec::new());
        };
        let mut results = Vec::new();
        for row_key in row_keys {
            let row_key = row_key.as_ref();
            if let Some(envelope) = partition.get(row_key) {
                results.push(self.decode(partition_key, row_key, envelope)?);
            }
        }
        Ok(results)
    }

    /// Point read of a single row.
    pub fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> TableResult<Option<TableEntity<T>>> {
        let guard = self.lock();
        guard
            .table(table)?
            .get(partition_key)
            .and_then(|partition| partition.get(row_key))
            .map(|envelope| self.decode(partition_key, row_key, envelope))
            .transpose()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert entities in order.
    ///
    /// Stops at the first entity whose (partition, row) is already taken and
    /// fails with [`TableError::EntityAlreadyExists`]. Entities inserted
    /// before it remain committed; later ones are never attempted.
    pub fn insert<T: Serialize>(&self, table: &str, entities: &[TableEntity<T>]) -> TableResult<()> {
        let mut guard = self.lock();
        let target = guard.table_mut(table)?;
        for entity in entities {
            let partition = target.entry(entity.partition_key.clone()).or_default();
            if partition.contains_key(&entity.row_key) {
                debug!(
                    %table,
                    partition_key = %entity.partition_key,
                    row_key = %entity.row_key,
                    "insert rejected, entity already exists"
                );
                return Err(TableError::already_exists(
                    table,
                    &entity.partition_key,
                    &entity.row_key,
                ));
            }
            let envelope = self.codec.encode(&entity.value)?;
            partition.insert(entity.row_key.clone(), envelope);
        }
        Ok(())
    }

    /// Replace existing entities in order.
    ///
    /// Stops at the first entity with no existing row and fails with
    /// [`TableError::EntityNotFound`]; earlier updates remain applied.
    pub fn update<T: Serialize>(&self, table: &str, entities: &[TableEntity<T>]) -> TableResult<()> {
        let mut guard = self.lock();
        let target = guard.table_mut(table)?;
        for entity in entities {
            let Some(slot) = target
                .get_mut(&entity.partition_key)
                .and_then(|partition| partition.get_mut(&entity.row_key))
            else {
                return Err(TableError::not_found(
                    table,
                    &entity.partition_key,
                    &entity.row_key,
                ));
            };
            *slot = self.codec.encode(&entity.value)?;
        }
        Ok(())
    }

    /// Remove the listed rows. Missing partitions and rows are ignored.
    pub fn delete<I, K>(&self, table: &str, partition_key: &str, row_keys: I) -> TableResult<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut guard = self.lock();
        let target = guard.table_mut(table)?;
        if let Some(partition) = target.get_mut(partition_key) {
            for row_key in row_keys {
                partition.remove(row_key.as_ref());
            }
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(
        &self,
        partition_key: &str,
        row_key: &str,
        envelope: &Envelope,
    ) -> TableResult<TableEntity<T>> {
        Ok(TableEntity::new(partition_key, row_key, self.codec.decode(envelope)?))
    }
}
