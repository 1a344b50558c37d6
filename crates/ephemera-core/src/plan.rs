//! Timer plan computed from a deadline

use chrono::{DateTime, Local};
use ephemera_util::remaining_until;
use std::time::Duration;

/// When each timer of a resource should fire, relative to `now`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerPlan {
    pub delete_at: DateTime<Local>,

    /// Delay until the deletion timer fires; zero means due now
    pub deletion_in: Duration,

    /// Warnings still ahead, earliest first
    pub warnings: Vec<PlannedWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedWarning {
    pub seconds_before: u64,
    pub fire_in: Duration,
}

impl TimerPlan {
    /// Compute the plan for `delete_at` with warning offsets ordered longest
    /// first. Warnings whose fire time is not in the future are skipped.
    pub fn new(delete_at: DateTime<Local>, now: DateTime<Local>, offsets: &[Duration]) -> Self {
        let warnings = offsets
            .iter()
            .filter_map(|offset| {
                let offset_chrono = chrono::Duration::from_std(*offset).ok()?;
                let fire_at = delete_at.checked_sub_signed(offset_chrono)?;
                (fire_at > now).then(|| PlannedWarning {
                    seconds_before: offset.as_secs(),
                    fire_in: remaining_until(fire_at, now),
                })
            })
            .collect();

        Self {
            delete_at,
            deletion_in: remaining_until(delete_at, now),
            warnings,
        }
    }

    /// Deadline already reached
    pub fn is_due(&self) -> bool {
        self.deletion_in.is_zero()
    }
}
