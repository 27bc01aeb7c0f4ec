#![allow(dead_code)]
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("market metadata unavailable for market {0}")]
    MetaUnavailable(i64),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Result of a single order submission. Mirrors the exchange's own
/// success/error shape rather than raising — a rejected order is ordinary
/// control flow for the pair cycle's rollback logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub filled_price: Option<f64>,
    pub filled_amount: Option<f64>,
    pub order_status: Option<String>,
    pub raw_response: Option<String>,
}

impl OrderResult {
    pub fn ok(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// An exchange-reported open position, filtered to `|size| >= 1e-10`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub market_index: i64,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
}

/// Per-market price/size decimal precision, cached after first fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketMeta {
    pub price_decimals: u32,
    pub size_decimals: u32,
}

impl MarketMeta {
    pub fn encode_price(&self, price: f64) -> i64 {
        (price * 10f64.powi(self.price_decimals as i32)).round() as i64
    }

    pub fn encode_size(&self, size: f64) -> i64 {
        (size * 10f64.powi(self.size_decimals as i32)).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_round_trips_within_precision() {
        let meta = MarketMeta {
            price_decimals: 2,
            size_decimals: 4,
        };
        let price = 1234.56;
        let encoded = meta.encode_price(price);
        let decoded = encoded as f64 / 10f64.powi(2);
        assert!((decoded - price).abs() < 1e-9);
    }
}
