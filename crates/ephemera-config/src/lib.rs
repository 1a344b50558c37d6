//! Configuration parsing and validation for ephemera
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Duration bounds, warning thresholds and sweep interval
//! - Optional hook commands for notify/destroy
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// One minute
pub const DEFAULT_MIN_DURATION_SECS: u64 = 60;

/// Seven days
pub const DEFAULT_MAX_DURATION_SECS: u64 = 7 * 24 * 3600;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(Policy::default());
    }
    load_config(path)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Policy::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let policy = parse_config("config_version = 1").unwrap();
        assert_eq!(policy.lifecycle, LifecyclePolicy::default());
        assert!(policy.hooks.destroy.is_none());
    }

    #[test]
    fn parse_overrides() {
        let config = r#"
            config_version = 1

            [lifecycle]
            sweep_interval_seconds = 600
            notify_creation = false

            [[lifecycle.warnings]]
            seconds_before = 30
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.lifecycle.sweep_interval, Duration::from_secs(600));
        assert!(!policy.lifecycle.notify_creation);
        assert!(policy.lifecycle.notify_deletion);
        assert_eq!(policy.lifecycle.warnings, vec![Duration::from_secs(30)]);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1

            [lifecycle]
            min_duration_seconds = 0
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1\n[service]\ndata_dir = \"/srv/ephemera\"").unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(
            policy.service.database_path(),
            std::path::PathBuf::from("/srv/ephemera/ephemera.db")
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let policy = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(policy.lifecycle, LifecyclePolicy::default());
    }
}
