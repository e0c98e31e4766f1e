//! Arbiter configuration

use std::time::Duration;

use crate::types::ServiceId;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the role arbiter and its sub-components
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArbiterConfig {
    /// Identifier peers listen and connect under
    pub service_id: ServiceId,
    /// Length of one discovery session
    pub scan_window: Duration,
    /// How long the device stays discoverable while accepting
    pub discoverability_window: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            service_id: ServiceId::DEFAULT,
            scan_window: Duration::from_secs(12),
            discoverability_window: Duration::from_secs(300),
        }
    }
}

impl ArbiterConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service identifier
    pub fn with_service_id(mut self, service_id: ServiceId) -> Self {
        self.service_id = service_id;
        self
    }

    /// Set the discovery session length
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the discoverability window used while accepting
    pub fn with_discoverability_window(mut self, window: Duration) -> Self {
        self.discoverability_window = window;
        self
    }
}
