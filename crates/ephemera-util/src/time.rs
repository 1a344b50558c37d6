//! Time utilities for ephemera
//!
//! Deadlines are wall-clock timestamps so they survive restarts. Code that
//! needs "now" goes through a [`Clock`] so tests can drive time
//! deterministically.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `EPHEMERA_MOCK_TIME` environment variable can be set
//! to shift [`now()`] to a fixed starting point that then advances with real
//! time. Useful for exercising deadlines recorded in an existing database.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "EPHEMERA_MOCK_TIME";

/// Format accepted by [`MOCK_TIME_ENV_VAR`]
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cached offset between mock time and real time at process start.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT)
            else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = MOCK_TIME_FORMAT,
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    "Failed to convert mock time to local timezone"
                );
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(
                mock_time = %mock_time_str,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Real system time (honours mock time in debug builds)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        now()
    }
}

/// Wall clock that advances with tokio's timer.
///
/// Anchored to a wall-clock origin and moved forward by the elapsed tokio
/// [`Instant`](tokio::time::Instant). Under `tokio::time::pause()` the wall
/// clock and every `tokio::time::sleep` agree exactly, which keeps deadline
/// arithmetic and timer firing consistent in tests.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin_wall: DateTime<Local>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(now())
    }

    pub fn starting_at(origin_wall: DateTime<Local>) -> Self {
        Self {
            origin_wall,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_wall + elapsed
    }
}

/// Time left until `deadline`, or zero if it has passed
pub fn remaining_until(deadline: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
        assert_eq!(format_duration(Duration::from_secs(7 * 86_400 + 120)), "7d 0h 2m");
    }

    #[test]
    fn test_remaining_until() {
        let base = Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap();
        let deadline = base + chrono::Duration::minutes(10);

        assert_eq!(remaining_until(deadline, base), Duration::from_secs(600));
        assert_eq!(
            remaining_until(base, deadline),
            Duration::ZERO,
            "past deadlines saturate at zero"
        );
    }

    #[test]
    fn test_now_returns_time() {
        let t = SystemClock.now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time_format() {
        for s in ["2025-12-25 14:30:00", "2025-01-01 00:00:00"] {
            assert!(NaiveDateTime::parse_from_str(s, MOCK_TIME_FORMAT).is_ok(), "{s}");
        }
        for s in ["2025-12-25", "2025-12-25T14:30:00", "not a date"] {
            assert!(NaiveDateTime::parse_from_str(s, MOCK_TIME_FORMAT).is_err(), "{s}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let origin = Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap();
        let clock = TokioClock::starting_at(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::seconds(90));

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::seconds(690));
    }
}
