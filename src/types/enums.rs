#![allow(dead_code)]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle/schedule interval. Mirrors the fixed table the scheduler and
/// market-data gateway both key off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H8,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H8 => "8h",
            Interval::D1 => "1d",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::M1),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "30m" => Some(Interval::M30),
            "1h" => Some(Interval::H1),
            "2h" => Some(Interval::H2),
            "4h" => Some(Interval::H4),
            "8h" => Some(Interval::H8),
            "1d" => Some(Interval::D1),
            _ => None,
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            Interval::M1 => 60,
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::M30 => 1800,
            Interval::H1 => 3600,
            Interval::H2 => 7200,
            Interval::H4 => 14400,
            Interval::H8 => 28800,
            Interval::D1 => 86400,
        }
    }

    /// Hours equivalent, used by the scheduler's interval table.
    pub fn to_hours(&self) -> f64 {
        self.to_seconds() as f64 / 3600.0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spread direction. +1 = long spread (long A, short B). -1 = short spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    LongSpread = 1,
    ShortSpread = -1,
}

impl Direction {
    pub fn value(&self) -> i32 {
        *self as i32
    }

    pub fn from_value(v: i32) -> Option<Self> {
        match v {
            1 => Some(Direction::LongSpread),
            -1 => Some(Direction::ShortSpread),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::LongSpread => "Long A / Short B",
            Direction::ShortSpread => "Short A / Long B",
        }
    }
}

/// Reason a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    StopZ,
    EmergencyStop,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::StopZ => "stop_z",
            ExitReason::EmergencyStop => "emergency_stop",
            ExitReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single pair-cycle invocation, written to `JobLog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Error,
    Skipped,
    Warning,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
            JobStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
