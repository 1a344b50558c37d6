//! Validated policy structures

use crate::schema::{RawConfig, RawHooks, RawLifecycleConfig, RawServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Deadline handling
    pub lifecycle: LifecyclePolicy,

    /// External notify/destroy commands
    pub hooks: HookConfig,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            lifecycle: LifecyclePolicy::from_raw(raw.lifecycle),
            hooks: HookConfig::from_raw(raw.hooks),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(ephemera_util::default_data_dir),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(ephemera_util::DATABASE_FILENAME)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: ephemera_util::default_data_dir(),
        }
    }
}

/// Deadline, warning and sweep policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Shortest accepted lifetime, extension or freeze
    pub min_duration: Duration,

    /// Longest accepted lifetime, extension or freeze
    pub max_duration: Duration,

    /// Interval between reconciliation sweeps
    pub sweep_interval: Duration,

    /// Upper bound on each notify/destroy call
    pub capability_timeout: Duration,

    pub notify_creation: bool,

    pub notify_deletion: bool,

    /// Warning offsets before the deadline, longest first
    pub warnings: Vec<Duration>,
}

impl LifecyclePolicy {
    fn from_raw(raw: RawLifecycleConfig) -> Self {
        let defaults = Self::default();

        let warnings = raw
            .warnings
            .map(|w| {
                w.into_iter()
                    .map(|w| Duration::from_secs(w.seconds_before))
                    .collect()
            })
            .unwrap_or(defaults.warnings);

        Self {
            min_duration: raw
                .min_duration_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_duration),
            max_duration: raw
                .max_duration_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_duration),
            sweep_interval: raw
                .sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            capability_timeout: raw
                .capability_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.capability_timeout),
            notify_creation: raw.notify_creation.unwrap_or(defaults.notify_creation),
            notify_deletion: raw.notify_deletion.unwrap_or(defaults.notify_deletion),
            warnings: sorted_warnings(warnings),
        }
    }

    /// Whether `duration` lies within the accepted bounds (inclusive)
    pub fn allows(&self, duration: Duration) -> bool {
        duration >= self.min_duration && duration <= self.max_duration
    }

    /// Replace the warning offsets, keeping them ordered longest first
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = Duration>) -> Self {
        self.warnings = sorted_warnings(warnings.into_iter().collect());
        self
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(crate::DEFAULT_MIN_DURATION_SECS),
            max_duration: Duration::from_secs(crate::DEFAULT_MAX_DURATION_SECS),
            sweep_interval: Duration::from_secs(12 * 3600),
            capability_timeout: Duration::from_secs(30),
            notify_creation: true,
            notify_deletion: true,
            warnings: default_warnings(),
        }
    }
}

/// Five minutes and one minute before the deadline
pub fn default_warnings() -> Vec<Duration> {
    vec![Duration::from_secs(300), Duration::from_secs(60)]
}

fn sorted_warnings(mut warnings: Vec<Duration>) -> Vec<Duration> {
    warnings.sort_unstable_by(|a, b| b.cmp(a));
    warnings.dedup();
    warnings
}

/// Hook commands. `None` means the capability is handled in-process.
#[derive(Debug, Clone, Default)]
pub struct HookConfig {
    pub notify: Option<Vec<String>>,
    pub destroy: Option<Vec<String>>,
}

impl HookConfig {
    fn from_raw(raw: RawHooks) -> Self {
        Self {
            notify: raw.notify,
            destroy: raw.destroy,
        }
    }
}
