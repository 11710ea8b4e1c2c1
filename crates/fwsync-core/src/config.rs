//! Configuration types for the firewall sync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{Priority, RegistryEndpoint};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Registry used to select integrators
    ///
    /// Each integrator carries its own registry endpoint for metadata; this
    /// one is only used for listing and lookup.
    pub registry: RegistryEndpoint,

    /// Process only this integrator, whatever its priority or enabled flag
    #[serde(default)]
    pub test_integrator_id: Option<String>,

    /// Deadline for each outbound registry or firewall call (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Environment tags whose clusters are never published
    #[serde(default = "default_excluded_environments")]
    pub excluded_environments: Vec<String>,

    /// Color tag of created address objects
    #[serde(default = "default_address_color")]
    pub address_color: u32,

    /// Color tag of created address groups
    #[serde(default = "default_group_color")]
    pub group_color: u32,

    /// Source identity recorded in audit events
    #[serde(default = "default_source_name")]
    pub source_name: String,

    /// Capacity of the audit event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Create a configuration with defaults for the given registry
    pub fn new(registry: RegistryEndpoint) -> Self {
        Self {
            registry,
            test_integrator_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            excluded_environments: default_excluded_environments(),
            address_color: default_address_color(),
            group_color: default_group_color(),
            source_name: default_source_name(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Run only the given integrator
    pub fn with_test_integrator(mut self, id: impl Into<String>) -> Self {
        self.test_integrator_id = Some(id.into());
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.registry.url.is_empty() {
            return Err(crate::Error::config("Registry URL cannot be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.source_name.is_empty() {
            return Err(crate::Error::config("Source name cannot be empty"));
        }
        if let Some(id) = &self.test_integrator_id
            && id.trim().is_empty()
        {
            return Err(crate::Error::config("Test integrator id cannot be blank"));
        }
        Ok(())
    }
}

/// How the scheduler drives the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Run once and exit; an external scheduler re-invokes the process
    #[default]
    OneShot,
    /// Run now and then on a fixed interval until shutdown
    Continuous,
}

impl std::str::FromStr for ScheduleMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one_shot" | "oneshot" | "once" => Ok(ScheduleMode::OneShot),
            "continuous" | "interval" => Ok(ScheduleMode::Continuous),
            other => Err(crate::Error::config(format!(
                "unknown schedule mode '{}', expected one_shot or continuous",
                other
            ))),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub mode: ScheduleMode,

    /// Priority class passed to every run
    #[serde(default)]
    pub priority: Priority,

    /// Interval between runs in continuous mode (in seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Time given to log and event consumers before a one-shot run returns
    #[serde(default = "default_flush_grace_secs")]
    pub flush_grace_secs: u64,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.mode == ScheduleMode::Continuous && self.interval_secs == 0 {
            return Err(crate::Error::config("Continuous mode interval must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_secs(self.flush_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::default(),
            priority: Priority::default(),
            interval_secs: default_interval_secs(),
            flush_grace_secs: default_flush_grace_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_excluded_environments() -> Vec<String> {
    vec!["prod".to_string(), "mgmt".to_string()]
}

fn default_address_color() -> u32 {
    3
}

fn default_group_color() -> u32 {
    13
}

fn default_source_name() -> String {
    "ROR".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_interval_secs() -> u64 {
    300
}

fn default_flush_grace_secs() -> u64 {
    2
}
