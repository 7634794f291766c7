//! Built-in service moving due delayed messages into their queues.

use std::sync::Arc;
use std::time::SystemTime;

use cellrun_storage::DelayedQueue;
use tracing::debug;

use crate::context::ServiceContext;
use crate::settings::ServiceSettings;
use crate::unit::{BoxFuture, Service, ServiceFeedback};

/// Pumps the delayed queue: every execution releases the messages whose
/// trigger time has passed.
#[derive(Debug, Default)]
pub struct DelayedMessageService;

impl DelayedMessageService {
    pub const NAME: &'static str = "delayed-messages";
}

impl Service for DelayedMessageService {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            auto_start: true,
            processing_timeout_seconds: 60,
        }
    }

    fn execute(self: Arc<Self>, ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
        Box::pin(async move {
            let storage = ctx.storage();
            let released = storage
                .delayed
                .release_due(SystemTime::now(), storage.queues.as_ref())?;
            if released == 0 {
                return Ok(ServiceFeedback::NoWorkAvailable);
            }
            debug!(service = Self::NAME, released, "delayed messages pumped");
            Ok(ServiceFeedback::DoneForNow)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellrun_storage::{MemoryDelayedQueue, MemoryQueueStorage, StorageProviders};
    use std::time::Duration;

    #[tokio::test]
    async fn releases_only_due_messages() {
        let queues = Arc::new(MemoryQueueStorage::new());
        let delayed = Arc::new(MemoryDelayedQueue::new());
        let base = StorageProviders::in_memory();
        let ctx = ServiceContext::new(StorageProviders::new(
            base.blobs,
            queues.clone(),
            delayed.clone(),
            base.tables,
        ));
        let service = Arc::new(DelayedMessageService);

        let feedback = service.clone().execute(ctx.clone()).await.unwrap();
        assert_eq!(feedback, ServiceFeedback::NoWorkAvailable);

        let past = SystemTime::now() - Duration::from_secs(1);
        let future = SystemTime::now() + Duration::from_secs(3600);
        ctx.put_with_delay_to(&"due", past, "jobs").unwrap();
        ctx.put_with_delay_to(&"later", future, "jobs").unwrap();

        let feedback = service.execute(ctx).await.unwrap();
        assert_eq!(feedback, ServiceFeedback::DoneForNow);
        assert_eq!(queues.len("jobs"), 1);
        assert_eq!(delayed.pending_count(), 1);
    }
}
