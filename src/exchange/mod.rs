//! Abstracted client for the perpetual-futures exchange: order placement,
//! balance/position reads, and market-metadata decimal encoding. Concrete
//! wire format is left to the exchange's own SDK, which this crate does not
//! bind — `PerpExchangeClient` talks to a generic REST surface shaped after
//! the consumed contract in the spec, with a mock mode that never touches
//! the network.

pub mod client;
pub mod types;

pub use client::PerpExchangeClient;
pub use types::{ExchangeError, ExchangePosition, MarketMeta, OrderResult, PositionSide};

use async_trait::async_trait;

/// Order type wire constant: immediate-or-cancel limit order.
pub const ORDER_TYPE_LIMIT: u8 = 0;
/// Order type wire constant: server-side time-sliced execution.
pub const ORDER_TYPE_TWAP: u8 = 6;
/// Time-in-force wire constant: good-till-time.
pub const TIME_IN_FORCE_GTT: u8 = 1;

/// The narrow, testable contract a pair cycle drives. One instance is
/// constructed per cycle from the actively-read credential — never shared
/// or cached across cycles.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn place_order(
        &self,
        market_index: i64,
        base_amount: f64,
        price: f64,
        is_ask: bool,
        client_order_index: Option<i64>,
        market: bool,
    ) -> OrderResult;

    async fn place_twap_order(
        &self,
        market_index: i64,
        base_amount: f64,
        price: f64,
        is_ask: bool,
        duration_minutes: i64,
        client_order_index: Option<i64>,
    ) -> OrderResult;

    async fn cancel_order(&self, market_index: i64, order_id: &str) -> bool;

    async fn get_balance(&self) -> f64;

    async fn get_positions(&self) -> Vec<ExchangePosition>;
}

/// `int(time_ms) mod 2^31`, used whenever a caller omits a client order
/// index. Kept as a free function so both the cycle and tests can predict
/// the fallback deterministically when they supply their own clock.
pub fn fallback_client_order_index(time_ms: i64) -> i64 {
    time_ms.rem_euclid(1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_index_wraps_into_i31_range() {
        let idx = fallback_client_order_index(5_000_000_000_123);
        assert!((0..(1i64 << 31)).contains(&idx));
    }
}
