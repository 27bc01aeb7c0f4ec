#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A configured pair-trading strategy: the two legs, the statistical
/// parameters that drive entry/exit, and the risk sizing for the pair.
/// One row per pair; the scheduler runs one job per enabled row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub id: i64,
    pub name: String,
    pub asset_a: String,
    pub asset_b: String,
    pub market_a: i64,
    pub market_b: i64,
    pub enabled: bool,

    pub entry_z: f64,
    pub exit_z: f64,
    pub stop_z: f64,

    pub window_interval: String,
    pub window_candles: i64,
    pub train_interval: String,
    pub train_candles: i64,
    pub max_half_life: f64,
    pub max_adx: f64,

    pub rsi_period: i64,
    pub rsi_upper: f64,
    pub rsi_lower: f64,

    pub stop_loss_pct: f64,
    pub position_size_pct: f64,
    pub tx_cost_bps: f64,
    pub leverage: f64,
    pub min_equity_pct: f64,
    pub twap_minutes: i64,

    pub schedule_interval: String,

    pub current_equity: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingPair {
    /// Field defaults mirror the original row defaults exactly, so a pair
    /// created with only `name`/`asset_a`/`asset_b` behaves identically to
    /// one hand-tuned to match them.
    pub fn new(name: impl Into<String>, asset_a: impl Into<String>, asset_b: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            asset_a: asset_a.into(),
            asset_b: asset_b.into(),
            market_a: 0,
            market_b: 0,
            enabled: true,
            entry_z: 2.0,
            exit_z: 0.5,
            stop_z: 4.0,
            window_interval: "4h".to_string(),
            window_candles: 40,
            train_interval: "4h".to_string(),
            train_candles: 100,
            max_half_life: 50.0,
            max_adx: 40.0,
            rsi_period: 14,
            rsi_upper: 70.0,
            rsi_lower: 20.0,
            stop_loss_pct: 10.0,
            position_size_pct: 50.0,
            tx_cost_bps: 0.0,
            leverage: 5.0,
            min_equity_pct: 40.0,
            twap_minutes: 0,
            schedule_interval: "15m".to_string(),
            current_equity: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn position_size_fraction(&self) -> Decimal {
        Decimal::try_from(self.position_size_pct).unwrap_or(dec!(50)) / dec!(100)
    }

    pub fn min_equity_fraction(&self) -> Decimal {
        Decimal::try_from(self.min_equity_pct).unwrap_or(dec!(40)) / dec!(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_row() {
        let p = TradingPair::new("btc_eth", "BTC", "ETH");
        assert_eq!(p.entry_z, 2.0);
        assert_eq!(p.exit_z, 0.5);
        assert_eq!(p.stop_z, 4.0);
        assert_eq!(p.window_interval, "4h");
        assert_eq!(p.window_candles, 40);
        assert_eq!(p.train_candles, 100);
        assert_eq!(p.max_half_life, 50.0);
        assert_eq!(p.rsi_period, 14);
        assert_eq!(p.schedule_interval, "15m");
    }
}
