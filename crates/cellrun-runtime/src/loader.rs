//! Service discovery: what the runtime runs, and who cleans up after it.

use std::collections::BTreeMap;
use std::sync::Arc;

use cellrun_service::{Service, ServiceSettings};
use cellrun_storage::StorageProviders;
use tracing::debug;

use crate::config::ServiceOverrides;

/// Hook invoked unconditionally when the runtime shuts down.
pub trait RuntimeFinalizer: Send + Sync {
    fn finalize(&self);
}

/// A service with the settings resolved for this worker.
#[derive(Clone)]
pub struct LoadedService {
    pub service: Arc<dyn Service>,
    pub settings: ServiceSettings,
}

/// Everything one runtime execution owns. Dropped when the runtime stops.
#[derive(Default)]
pub struct Application {
    pub services: Vec<LoadedService>,
    pub finalizers: Vec<Arc<dyn RuntimeFinalizer>>,
}

impl Application {
    pub fn service_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| s.service.name().to_string())
            .collect()
    }
}

/// Supplies the services for one runtime execution.
///
/// Called once per execution; a failure is handled like any other fault
/// and restarts the runtime.
pub trait ServiceLoader: Send + Sync {
    fn load(&self, storage: &StorageProviders) -> anyhow::Result<Application>;
}

/// Loader over a fixed list of services, with optional config overrides.
#[derive(Default, Clone)]
pub struct StaticServiceLoader {
    services: Vec<Arc<dyn Service>>,
    overrides: BTreeMap<String, ServiceOverrides>,
    finalizers: Vec<Arc<dyn RuntimeFinalizer>>,
}

impl StaticServiceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, ServiceOverrides>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_finalizer(mut self, finalizer: Arc<dyn RuntimeFinalizer>) -> Self {
        self.finalizers.push(finalizer);
        self
    }
}

impl ServiceLoader for StaticServiceLoader {
    fn load(&self, _storage: &StorageProviders) -> anyhow::Result<Application> {
        let mut seen = std::collections::HashSet::new();
        let mut services = Vec::with_capacity(self.services.len());
        for service in &self.services {
            let name = service.name();
            if !seen.insert(name.to_string()) {
                anyhow::bail!("service {name} registered twice");
            }
            let declared = service.settings();
            let settings = match self.overrides.get(name) {
                Some(overrides) => overrides.apply(declared),
                None => declared,
            };
            debug!(service = %name, ?settings, "service loaded");
            services.push(LoadedService {
                service: Arc::clone(service),
                settings,
            });
        }

        Ok(Application {
            services,
            finalizers: self.finalizers.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellrun_service::{BoxFuture, ServiceContext, ServiceFeedback};

    struct Named(&'static str);

    impl Service for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn settings(&self) -> ServiceSettings {
            ServiceSettings {
                auto_start: true,
                processing_timeout_seconds: 120,
            }
        }

        fn execute(self: Arc<Self>, _ctx: ServiceContext) -> BoxFuture<anyhow::Result<ServiceFeedback>> {
            Box::pin(async { Ok(ServiceFeedback::NoWorkAvailable) })
        }
    }

    #[test]
    fn overrides_apply_by_name() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "b".to_string(),
            ServiceOverrides {
                auto_start: Some(false),
                processing_timeout_seconds: None,
            },
        );
        let loader = StaticServiceLoader::new()
            .with_service(Arc::new(Named("a")))
            .with_service(Arc::new(Named("b")))
            .with_overrides(overrides);

        let app = loader.load(&StorageProviders::in_memory()).unwrap();
        assert_eq!(app.service_names(), ["a", "b"]);
        assert!(app.services[0].settings.auto_start);
        assert!(!app.services[1].settings.auto_start);
        assert_eq!(app.services[1].settings.processing_timeout_seconds, 120);
    }

    #[test]
    fn duplicate_names_fail_to_load() {
        let loader = StaticServiceLoader::new()
            .with_service(Arc::new(Named("a")))
            .with_service(Arc::new(Named("a")));
        let err = loader.load(&StorageProviders::in_memory()).err().unwrap();
        assert!(err.to_string().contains("registered twice"));
    }
}
