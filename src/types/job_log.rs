#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-cycle execution log for a pair: the signal snapshot the cycle
/// computed, any action it took, and an opaque JSON blob of the raw
/// candles/orders involved — kept for after-the-fact debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub pair_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub z_score: Option<f64>,
    pub hedge_ratio: Option<f64>,
    pub half_life: Option<f64>,
    pub adx: Option<f64>,
    pub rsi: Option<f64>,
    pub action: Option<String>,
    pub close_a: Option<f64>,
    pub close_b: Option<f64>,
    pub message: Option<String>,
    pub market_data: Option<Value>,
}

/// Coerces non-finite floats (NaN, +/-inf) to `None` before the value is
/// handed to the database — a non-finite float is not valid JSON.
pub fn safe_float(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

impl JobLog {
    pub fn new(pair_id: i64, status: impl Into<String>) -> Self {
        Self {
            id: 0,
            pair_id,
            timestamp: Utc::now(),
            status: status.into(),
            z_score: None,
            hedge_ratio: None,
            half_life: None,
            adx: None,
            rsi: None,
            action: None,
            close_a: None,
            close_b: None,
            message: None,
            market_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_float_drops_non_finite() {
        assert_eq!(safe_float(Some(f64::NAN)), None);
        assert_eq!(safe_float(Some(f64::INFINITY)), None);
        assert_eq!(safe_float(Some(1.5)), Some(1.5));
        assert_eq!(safe_float(None), None);
    }
}
