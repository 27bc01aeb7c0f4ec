//! Candle and orderbook fetching, normalized to aligned closing-price
//! series. Every fetch is best-effort: on any failure this module logs and
//! returns an empty/zeroed result rather than raising, so a flaky upstream
//! never crashes a cycle — it just starves it of data, which the cycle
//! already treats as insufficient-data.

use reqwest::Client;
use serde::Deserialize;
use tracing::error;

use crate::types::Interval;

/// `{mid, best_bid, best_ask}` quote for one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orderbook {
    pub mid_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
}

impl Orderbook {
    fn zero() -> Self {
        Self {
            mid_price: 0.0,
            best_bid: 0.0,
            best_ask: 0.0,
        }
    }
}

/// A market listed by the exchange, as returned by `fetch_markets`.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub market_id: i64,
    pub symbol: String,
}

/// The four (or two) price series a cycle needs: window + training for
/// each leg.
#[derive(Debug, Clone)]
pub struct PairData {
    pub prices_a: Vec<f64>,
    pub prices_b: Vec<f64>,
    pub train_a: Vec<f64>,
    pub train_b: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCandle {
    #[serde(rename = "t")]
    _t: i64,
    #[serde(rename = "c")]
    close: Option<String>,
}

/// Fetches closing-price candles for one ticker at one interval. Never
/// raises: any network/parse failure logs and yields an empty series, which
/// the caller treats as insufficient data.
pub struct MarketDataGateway {
    http: Client,
    candle_base_url: String,
    orderbook_base_url: String,
}

impl MarketDataGateway {
    pub fn new(candle_base_url: impl Into<String>, orderbook_base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            candle_base_url: candle_base_url.into(),
            orderbook_base_url: orderbook_base_url.into(),
        }
    }

    /// Fetches at least `candles_needed` candles ending now, with a 20%
    /// margin to absorb gaps in the upstream series.
    pub async fn fetch_candles(&self, ticker: &str, interval: Interval, candles_needed: usize) -> Vec<f64> {
        let buffer_candles = (candles_needed as f64 * 1.2) as i64;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - buffer_candles * interval.to_seconds() * 1000;

        let url = format!("{}/candlesSnapshot", self.candle_base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("ticker", ticker.to_string()),
                ("interval", interval.as_str().to_string()),
                ("start_ms", start_ms.to_string()),
                ("end_ms", now_ms.to_string()),
            ])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                error!(ticker, interval = interval.as_str(), error = %e, "candle fetch failed");
                return Vec::new();
            }
        };

        match resp.json::<Vec<RawCandle>>().await {
            Ok(candles) => candles.into_iter().filter_map(|c| c.close?.parse::<f64>().ok()).collect(),
            Err(e) => {
                error!(ticker, error = %e, "candle parse failed");
                Vec::new()
            }
        }
    }

    /// `mid = (bid+ask)/2` when both sides exist, else whichever side is
    /// present, else a zeroed quote.
    pub async fn fetch_orderbook(&self, market_id: i64) -> Orderbook {
        let url = format!("{}/orderBookDetails", self.orderbook_base_url);
        let resp = match self.http.get(&url).query(&[("market_id", market_id.to_string())]).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(market_id, error = %e, "orderbook fetch failed");
                return Orderbook::zero();
            }
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                error!(market_id, error = %e, "orderbook parse failed");
                return Orderbook::zero();
            }
        };

        let best_bid = body["bids"][0]["price"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let best_ask = body["asks"][0]["price"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let mid = if best_bid > 0.0 && best_ask > 0.0 {
            (best_bid + best_ask) / 2.0
        } else if best_bid > 0.0 {
            best_bid
        } else {
            best_ask
        };

        Orderbook {
            mid_price: mid,
            best_bid,
            best_ask,
        }
    }

    /// Lists markets the exchange currently offers, used by operator
    /// tooling to validate configured `market_a`/`market_b` indices.
    pub async fn fetch_markets(&self) -> Vec<MarketInfo> {
        let url = format!("{}/orderBooks", self.orderbook_base_url);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "markets fetch failed");
                return Vec::new();
            }
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "markets parse failed");
                return Vec::new();
            }
        };

        body["order_books"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|m| MarketInfo {
                market_id: m["market_id"].as_i64().unwrap_or(0),
                symbol: m["symbol"].as_str().unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Fetches all price data a cycle needs for signal computation. When
    /// `train_interval == window_interval`, fetches each leg once at
    /// `max(window_candles, train_candles)` depth and reuses it for both
    /// series, instead of four separate concurrent fetches.
    pub async fn fetch_pair_data(
        &self,
        asset_a: &str,
        asset_b: &str,
        window_interval: Interval,
        window_candles: usize,
        train_interval: Interval,
        train_candles: usize,
    ) -> PairData {
        if train_interval != window_interval {
            let (prices_a, prices_b, train_a, train_b) = tokio::join!(
                self.fetch_candles(asset_a, window_interval, window_candles),
                self.fetch_candles(asset_b, window_interval, window_candles),
                self.fetch_candles(asset_a, train_interval, train_candles),
                self.fetch_candles(asset_b, train_interval, train_candles),
            );
            PairData {
                prices_a,
                prices_b,
                train_a,
                train_b,
            }
        } else {
            let needed = window_candles.max(train_candles);
            let (prices_a, prices_b) = tokio::join!(
                self.fetch_candles(asset_a, window_interval, needed),
                self.fetch_candles(asset_b, window_interval, needed),
            );
            PairData {
                train_a: prices_a.clone(),
                train_b: prices_b.clone(),
                prices_a,
                prices_b,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderbook_falls_back_to_present_side() {
        let ob = Orderbook {
            mid_price: 0.0,
            best_bid: 10.0,
            best_ask: 0.0,
        };
        assert_eq!(ob.best_bid, 10.0);
    }

    #[tokio::test]
    async fn fetch_candles_against_unreachable_host_yields_empty() {
        let gw = MarketDataGateway::new("http://127.0.0.1:1", "http://127.0.0.1:1");
        let candles = gw.fetch_candles("BTC", Interval::H4, 40).await;
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn fetch_orderbook_against_unreachable_host_yields_zero() {
        let gw = MarketDataGateway::new("http://127.0.0.1:1", "http://127.0.0.1:1");
        let ob = gw.fetch_orderbook(1).await;
        assert_eq!(ob, Orderbook::zero());
    }
}
