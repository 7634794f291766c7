//! Services and finalizers shipped with the daemon.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cellrun_runtime::RuntimeFinalizer;
use cellrun_service::{BoxFuture, Service, ServiceContext, ServiceFeedback, ServiceSettings};
use cellrun_table::{MemoryTableStorage, TableEntity};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

pub const HEARTBEAT_TABLE: &str = "heartbeats";
pub const HEARTBEAT_PARTITION: &str = "worker";
pub const PING_QUEUE: &str = "heartbeat-pings";

/// Rows kept in the heartbeat partition; older ones are pruned.
pub const HEARTBEAT_RETENTION: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sequence: u64,
    pub at_unix_ms: u64,
}

/// Delayed follow-up scheduled by every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct BeatState {
    sequence: u64,
    last: Option<Instant>,
}

/// Writes one row per period into [`HEARTBEAT_TABLE`] and schedules a
/// delayed [`Ping`] one period later.
#[derive(Debug)]
pub struct HeartbeatService {
    period: Duration,
    state: Mutex<BeatState>,
}

impl Default for HeartbeatService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HeartbeatService {
    pub const NAME: &'static str = "heartbeat";

    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: Mutex::new(BeatState::default()),
        }
    }

    /// Next sequence number if a beat is due.
    fn due(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if state.last.is_some_and(|last| now.duration_since(last) < self.period) {
            return None;
        }
        state.last = Some(now);
        state.sequence += 1;
        Some(state.sequence)
    }
}

impl Service for HeartbeatService {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            auto_start: true,
            processing_timeout_seconds: 30,
        }
    }

    fn execute(self: Arc<Self>, ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
        Box::pin(async move {
            let Some(sequence) = self.due() else {
                return Ok(ServiceFeedback::NoWorkAvailable);
            };

            let now = SystemTime::now();
            let at_unix_ms = now.duration_since(UNIX_EPOCH)?.as_millis() as u64;
            let tables = ctx.tables();
            tables.create_table(HEARTBEAT_TABLE);
            tables.insert(
                HEARTBEAT_TABLE,
                &[TableEntity::new(
                    HEARTBEAT_PARTITION,
                    format!("{at_unix_ms:020}-{sequence:010}"),
                    Heartbeat {
                        sequence,
                        at_unix_ms,
                    },
                )],
            )?;
            prune(tables)?;

            ctx.put_with_delay_to(&Ping { sequence }, now + self.period, PING_QUEUE)?;
            debug!(service = Self::NAME, sequence, "heartbeat written");
            Ok(ServiceFeedback::DoneForNow)
        })
    }
}

fn prune(tables: &MemoryTableStorage) -> anyhow::Result<()> {
    let rows = tables.get_partition::<Heartbeat>(HEARTBEAT_TABLE, HEARTBEAT_PARTITION)?;
    if rows.len() <= HEARTBEAT_RETENTION {
        return Ok(());
    }
    let excess = rows.len() - HEARTBEAT_RETENTION;
    let stale = rows.iter().take(excess).map(|row| row.row_key.as_str());
    tables.delete(HEARTBEAT_TABLE, HEARTBEAT_PARTITION, stale)?;
    Ok(())
}

/// Runtime finalizer logging what the worker leaves behind in its tables.
pub struct TableReport {
    tables: MemoryTableStorage,
}

impl TableReport {
    pub fn new(tables: MemoryTableStorage) -> Self {
        Self { tables }
    }
}

impl RuntimeFinalizer for TableReport {
    fn finalize(&self) {
        for table in self.tables.list_tables() {
            let rows = self.tables.entity_count(&table).unwrap_or(0);
            debug!(%table, rows, "table at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellrun_storage::StorageProviders;

    #[tokio::test(start_paused = true)]
    async fn beats_once_per_period() {
        let storage = StorageProviders::in_memory();
        let ctx = ServiceContext::new(storage.clone());
        let service = Arc::new(HeartbeatService::new(Duration::from_secs(30)));

        let first = service.clone().execute(ctx.clone()).await.unwrap();
        let second = service.clone().execute(ctx.clone()).await.unwrap();
        assert_eq!(first, ServiceFeedback::DoneForNow);
        assert_eq!(second, ServiceFeedback::NoWorkAvailable);

        tokio::time::advance(Duration::from_secs(31)).await;
        let third = service.execute(ctx).await.unwrap();
        assert_eq!(third, ServiceFeedback::DoneForNow);

        let rows = storage
            .tables
            .get_partition::<Heartbeat>(HEARTBEAT_TABLE, HEARTBEAT_PARTITION)
            .unwrap();
        let sequences: Vec<u64> = rows.iter().map(|r| r.value.sequence).collect();
        assert_eq!(sequences, [1, 2]);
    }

    #[test]
    fn prune_keeps_the_newest_rows() {
        let tables = MemoryTableStorage::new();
        tables.create_table(HEARTBEAT_TABLE);
        let rows: Vec<_> = (0..HEARTBEAT_RETENTION as u64 + 5)
            .map(|i| {
                TableEntity::new(
                    HEARTBEAT_PARTITION,
                    format!("{i:020}"),
                    Heartbeat {
                        sequence: i,
                        at_unix_ms: i,
                    },
                )
            })
            .collect();
        tables.insert(HEARTBEAT_TABLE, &rows).unwrap();

        prune(&tables).unwrap();

        let kept = tables
            .get_partition::<Heartbeat>(HEARTBEAT_TABLE, HEARTBEAT_PARTITION)
            .unwrap();
        assert_eq!(kept.len(), HEARTBEAT_RETENTION);
        assert_eq!(kept[0].value.sequence, 5);
    }
}
