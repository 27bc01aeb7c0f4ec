#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A periodic equity recording for a pair, sampled once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub id: i64,
    pub pair_id: i64,
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown_pct: f64,
}

impl EquitySnapshot {
    pub fn new(pair_id: i64, equity: f64) -> Self {
        Self {
            id: 0,
            pair_id,
            timestamp: Utc::now(),
            equity,
            drawdown_pct: 0.0,
        }
    }
}
