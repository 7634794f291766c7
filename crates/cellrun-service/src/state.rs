//! Durable service run-state.
//!
//! One blob per service, in [`SERVICE_STATE_CONTAINER`], named after the
//! service. Workers only ever read it on their throttled cadence; it is
//! changed by operators through [`ServiceStateAdmin`].

use std::sync::Arc;

use cellrun_storage::{BlobKey, BlobStorage, BlobStorageExt, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Container holding one run-state blob per service.
pub const SERVICE_STATE_CONTAINER: &str = "cellrun-services-state";

/// Whether a service should run.
///
/// A change takes effect on each worker at its next state check, so it is
/// not synchronous across a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    #[default]
    Started,
    Stopped,
}

/// Blob key of the run-state record for `service_name`.
pub fn service_state_key(service_name: &str) -> BlobKey {
    BlobKey::new(SERVICE_STATE_CONTAINER, service_name)
}

/// Read and change the durable run-state of services by name.
#[derive(Clone)]
pub struct ServiceStateAdmin {
    blobs: Arc<dyn BlobStorage>,
}

impl ServiceStateAdmin {
    pub fn new(blobs: Arc<dyn BlobStorage>) -> Self {
        Self { blobs }
    }

    /// Current durable state, `None` if the service never ran anywhere.
    pub fn state(&self, service_name: &str) -> StorageResult<Option<ServiceState>> {
        self.blobs.get_value(&service_state_key(service_name))
    }

    pub fn set_state(&self, service_name: &str, state: ServiceState) -> StorageResult<()> {
        self.blobs.put_value(&service_state_key(service_name), &state)?;
        info!(service = %service_name, ?state, "service state changed");
        Ok(())
    }

    pub fn start(&self, service_name: &str) -> StorageResult<()> {
        self.set_state(service_name, ServiceState::Started)
    }

    pub fn stop(&self, service_name: &str) -> StorageResult<()> {
        self.set_state(service_name, ServiceState::Stopped)
    }
}
