//! Configuration validation

use crate::schema::{RawConfig, RawHooks, RawLifecycleConfig};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Duration bounds invalid: min {min}s, max {max}s")]
    InvalidBounds { min: u64, max: u64 },

    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("Warning threshold must be greater than zero")]
    ZeroWarning,

    #[error("Duplicate warning threshold: {0}s")]
    DuplicateWarning(u64),

    #[error("Hook '{hook}': {message}")]
    HookError { hook: &'static str, message: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_lifecycle(&config.lifecycle));
    errors.extend(validate_hooks(&config.hooks));

    errors
}

fn validate_lifecycle(lifecycle: &RawLifecycleConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let min = lifecycle
        .min_duration_seconds
        .unwrap_or(crate::DEFAULT_MIN_DURATION_SECS);
    let max = lifecycle
        .max_duration_seconds
        .unwrap_or(crate::DEFAULT_MAX_DURATION_SECS);
    if min == 0 || min > max {
        errors.push(ValidationError::InvalidBounds { min, max });
    }

    if lifecycle.sweep_interval_seconds == Some(0) {
        errors.push(ValidationError::ZeroInterval {
            field: "sweep_interval_seconds",
        });
    }

    if lifecycle.capability_timeout_seconds == Some(0) {
        errors.push(ValidationError::ZeroInterval {
            field: "capability_timeout_seconds",
        });
    }

    if let Some(warnings) = &lifecycle.warnings {
        let mut seen = HashSet::new();
        for warning in warnings {
            if warning.seconds_before == 0 {
                errors.push(ValidationError::ZeroWarning);
            } else if !seen.insert(warning.seconds_before) {
                errors.push(ValidationError::DuplicateWarning(warning.seconds_before));
            }
        }
    }

    errors
}

fn validate_hooks(hooks: &RawHooks) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (hook, argv) in [("notify", &hooks.notify), ("destroy", &hooks.destroy)] {
        let Some(argv) = argv else { continue };
        match argv.first() {
            None => errors.push(ValidationError::HookError {
                hook,
                message: "argv cannot be empty".into(),
            }),
            Some(program) if program.trim().is_empty() => {
                errors.push(ValidationError::HookError {
                    hook,
                    message: "program cannot be blank".into(),
                })
            }
            Some(_) => {}
        }
    }

    errors
}
