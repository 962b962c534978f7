use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CRITICAL_THRESHOLD: f64 = 90.0;
pub const MEDIUM_THRESHOLD: f64 = 60.0;

/// Largest gap tolerated between a wire `fill_percentage` and the value
/// recomputed from `current_level / capacity` (one unit of the last decimal).
const FILL_TOLERANCE: f64 = 0.01 + 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Medium,
    Critical,
}

impl Status {
    /// Thresholds are strict: exactly 90.0 is medium and exactly 60.0 is normal.
    pub fn from_fill_percentage(fill_percentage: f64) -> Self {
        if fill_percentage > CRITICAL_THRESHOLD {
            Status::Critical
        } else if fill_percentage > MEDIUM_THRESHOLD {
            Status::Medium
        } else {
            Status::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Medium => "medium",
            Status::Critical => "critical",
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self {
            Status::Normal => "🟢",
            Status::Medium => "🟡",
            Status::Critical => "🔴",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry sample for one container at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub zone: String,
    pub current_level: u32,
    pub fill_percentage: f64,
    pub temperature: f64,
    pub capacity: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidReading {
    #[error("device_id is empty")]
    EmptyDeviceId,
    #[error("capacity must be positive")]
    ZeroCapacity,
    #[error("current_level {level} exceeds capacity {capacity}")]
    LevelExceedsCapacity { level: u32, capacity: u32 },
    #[error("fill_percentage {0} is outside 0..=100")]
    FillOutOfRange(f64),
    #[error("fill_percentage {wire} disagrees with current_level/capacity ({expected})")]
    FillMismatch { wire: f64, expected: f64 },
    #[error("status {wire} does not match fill_percentage {fill} (expected {expected})")]
    StatusMismatch {
        wire: Status,
        expected: Status,
        fill: f64,
    },
}

impl Reading {
    /// Checks the invariants a well-formed reading carries on the wire.
    pub fn validate(&self) -> Result<(), InvalidReading> {
        if self.device_id.trim().is_empty() {
            return Err(InvalidReading::EmptyDeviceId);
        }
        if self.capacity == 0 {
            return Err(InvalidReading::ZeroCapacity);
        }
        if self.current_level > self.capacity {
            return Err(InvalidReading::LevelExceedsCapacity {
                level: self.current_level,
                capacity: self.capacity,
            });
        }
        if !(0.0..=100.0).contains(&self.fill_percentage) {
            return Err(InvalidReading::FillOutOfRange(self.fill_percentage));
        }
        let expected = fill_percentage(self.current_level, self.capacity);
        if (expected - self.fill_percentage).abs() > FILL_TOLERANCE {
            return Err(InvalidReading::FillMismatch {
                wire: self.fill_percentage,
                expected,
            });
        }
        let expected = Status::from_fill_percentage(self.fill_percentage);
        if expected != self.status {
            return Err(InvalidReading::StatusMismatch {
                wire: self.status,
                expected,
                fill: self.fill_percentage,
            });
        }
        Ok(())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `100 * level / capacity` rounded to two decimals; zero capacity reads as empty.
pub fn fill_percentage(current_level: u32, capacity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    round2(f64::from(current_level) / f64::from(capacity) * 100.0)
}
