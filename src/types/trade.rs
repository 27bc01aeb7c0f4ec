#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable record of a completed round-trip pair trade. Written once,
/// on exit, and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub pair_id: i64,
    pub direction: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price_a: f64,
    pub exit_price_a: f64,
    pub entry_price_b: f64,
    pub exit_price_b: f64,
    pub size_a: f64,
    pub size_b: f64,
    pub hedge_ratio: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: String,
    pub duration_candles: i64,
}
