//! Declared per-service settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::ServiceState;

/// Default execution timeout: 1h58, two minutes under the 2h after which
/// an unacknowledged queue message becomes visible again.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60 * 60 + 58 * 60);

/// Settings a service declares for itself; a service loader may overlay
/// values coming from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Run-state adopted when no durable state exists yet.
    pub auto_start: bool,
    /// Execution timeout in seconds; zero keeps [`DEFAULT_EXECUTION_TIMEOUT`].
    pub processing_timeout_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            auto_start: true,
            processing_timeout_seconds: 0,
        }
    }
}

impl ServiceSettings {
    pub fn execution_timeout(&self) -> Duration {
        if self.processing_timeout_seconds > 0 {
            Duration::from_secs(self.processing_timeout_seconds)
        } else {
            DEFAULT_EXECUTION_TIMEOUT
        }
    }

    pub fn default_state(&self) -> ServiceState {
        if self.auto_start {
            ServiceState::Started
        } else {
            ServiceState::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_start_with_long_timeout() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.default_state(), ServiceState::Started);
        assert_eq!(settings.execution_timeout(), Duration::from_secs(7080));
    }

    #[test]
    fn explicit_timeout_and_stopped_default() {
        let settings = ServiceSettings {
            auto_start: false,
            processing_timeout_seconds: 90,
        };
        assert_eq!(settings.default_state(), ServiceState::Stopped);
        assert_eq!(settings.execution_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: ServiceSettings =
            serde_json::from_str(r#"{"processing_timeout_seconds": 5}"#).unwrap();
        assert!(settings.auto_start);
        assert_eq!(settings.processing_timeout_seconds, 5);
    }
}
