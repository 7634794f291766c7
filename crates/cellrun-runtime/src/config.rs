//! Worker configuration file (`cellrun.toml`).
//!
//! ```toml
//! worker_name = "worker-01"
//!
//! [scheduler]
//! idle_sleep_ms = 10000
//! time_slice_ms = 60000
//!
//! [runtime]
//! restart_delay_ms = 5000
//!
//! [services.heartbeat]
//! auto_start = false
//! processing_timeout_seconds = 30
//! ```
//!
//! Every section is optional.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use cellrun_scheduler::SchedulerConfig;
use cellrun_service::ServiceSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_name: String,
    pub scheduler: SchedulerSection,
    pub runtime: RuntimeSection,
    /// Per-service overrides, keyed by service name.
    pub services: BTreeMap<String, ServiceOverrides>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: "cellrun-worker".to_string(),
            scheduler: SchedulerSection::default(),
            runtime: RuntimeSection::default(),
            services: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub idle_sleep_ms: u64,
    pub time_slice_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            idle_sleep_ms: defaults.idle_sleep.as_millis() as u64,
            time_slice_ms: defaults.time_slice.as_millis() as u64,
        }
    }
}

impl SchedulerSection {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            time_slice: Duration::from_millis(self.time_slice_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Pause before the host runs the runtime again after a restart exit.
    pub restart_delay_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            restart_delay_ms: 5_000,
        }
    }
}

impl RuntimeSection {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Values replacing a service's declared [`ServiceSettings`]; unset fields
/// keep the declared value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverrides {
    pub auto_start: Option<bool>,
    pub processing_timeout_seconds: Option<u64>,
}

impl ServiceOverrides {
    pub fn apply(&self, declared: ServiceSettings) -> ServiceSettings {
        ServiceSettings {
            auto_start: self.auto_start.unwrap_or(declared.auto_start),
            processing_timeout_seconds: self
                .processing_timeout_seconds
                .unwrap_or(declared.processing_timeout_seconds),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: WorkerConfig = toml::from_str(content)?;
        if config.worker_name.trim().is_empty() {
            anyhow::bail!("worker_name must not be empty");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
