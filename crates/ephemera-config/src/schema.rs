//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Deadline, warning and sweep settings
    #[serde(default)]
    pub lifecycle: RawLifecycleConfig,

    /// External commands implementing notify/destroy
    #[serde(default)]
    pub hooks: RawHooks,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

/// Lifecycle settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLifecycleConfig {
    /// Shortest accepted lifetime, extension or freeze, in seconds
    pub min_duration_seconds: Option<u64>,

    /// Longest accepted lifetime, extension or freeze, in seconds
    pub max_duration_seconds: Option<u64>,

    /// Interval between reconciliation sweeps, in seconds
    pub sweep_interval_seconds: Option<u64>,

    /// Timeout applied to each notify/destroy call, in seconds
    pub capability_timeout_seconds: Option<u64>,

    /// Send a notice when a resource is created
    pub notify_creation: Option<bool>,

    /// Send a notice right before a resource is destroyed
    pub notify_deletion: Option<bool>,

    /// Advance warnings before the deadline
    pub warnings: Option<Vec<RawWarning>>,
}

/// Warning threshold
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWarning {
    /// Seconds before the deadline
    pub seconds_before: u64,
}

/// Hook commands (argv form). The resource id and notice kind are appended.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawHooks {
    pub notify: Option<Vec<String>>,
    pub destroy: Option<Vec<String>>,
}
