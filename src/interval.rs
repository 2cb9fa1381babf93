//! Half-open time intervals in UTC
//!
//! An advisory occupies `[start, end)`. Back-to-back bookings
//! (`a.end == b.start`) do NOT overlap; that is policy, not accident.

use crate::error::EngineError;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Build an interval from a start instant and a duration in minutes.
    ///
    /// Fails when the duration is non-positive or the start lies in the
    /// past relative to `now` (the evaluation instant, injected).
    pub fn new(start: DateTime<Utc>, duration_minutes: i64, now: DateTime<Utc>) -> Result<Self> {
        if duration_minutes <= 0 {
            return Err(EngineError::Validation(format!(
                "duration must be positive, got {} minutes",
                duration_minutes
            )));
        }
        if start < now {
            return Err(EngineError::Validation(format!(
                "start time {} is in the past (now: {})",
                start.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        Ok(Self {
            start,
            end: start + Duration::minutes(duration_minutes),
        })
    }

    /// Rebuild an interval from stored endpoints (no validation; the
    /// endpoints were validated at creation time).
    pub fn from_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True iff the two half-open intervals share at least one instant:
    /// `a.start < b.end && b.start < a.end`.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}
