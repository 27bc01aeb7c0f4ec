use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{
    fallback_client_order_index, Exchange, ExchangePosition, MarketMeta, OrderResult, PositionSide,
    ORDER_TYPE_LIMIT, ORDER_TYPE_TWAP, TIME_IN_FORCE_GTT,
};

/// Exchange client for the perpetual-futures venue. Lazily becomes "mock
/// mode" if constructed via [`PerpExchangeClient::mock`] — mock operations
/// log and return synthetic success without touching the network. Never
/// shared across cycles: one is constructed per cycle from the active
/// credential, used, and dropped.
pub struct PerpExchangeClient {
    http: Client,
    host: String,
    account_index: i64,
    api_key_index: i64,
    private_key: String,
    mock: bool,
    market_meta: RwLock<HashMap<i64, MarketMeta>>,
}

impl PerpExchangeClient {
    pub fn new(host: impl Into<String>, private_key: impl Into<String>, api_key_index: i64, account_index: i64) -> Self {
        Self {
            http: Client::new(),
            host: host.into(),
            account_index,
            api_key_index,
            private_key: private_key.into(),
            mock: false,
            market_meta: RwLock::new(HashMap::new()),
        }
    }

    /// Mock mode: every operation succeeds synthetically and no request
    /// ever leaves the process. Used when the exchange driver is
    /// unavailable, and in tests.
    pub fn mock() -> Self {
        Self {
            http: Client::new(),
            host: String::new(),
            account_index: 0,
            api_key_index: 0,
            private_key: String::new(),
            mock: true,
            market_meta: RwLock::new(HashMap::new()),
        }
    }

    async fn market_meta(&self, market_index: i64) -> Result<MarketMeta, super::ExchangeError> {
        if let Some(meta) = self.market_meta.read().await.get(&market_index).copied() {
            return Ok(meta);
        }

        let url = format!("{}/api/v1/orderBookDetails", self.host);
        let resp = self
            .http
            .get(&url)
            .query(&[("market_id", market_index.to_string())])
            .send()
            .await?;
        let body: serde_json::Value = resp.json().await?;
        let price_decimals = body["price_decimals"]
            .as_u64()
            .ok_or_else(|| super::ExchangeError::BadResponse("missing price_decimals".into()))?
            as u32;
        let size_decimals = body["size_decimals"]
            .as_u64()
            .ok_or_else(|| super::ExchangeError::BadResponse("missing size_decimals".into()))?
            as u32;

        let meta = MarketMeta {
            price_decimals,
            size_decimals,
        };
        self.market_meta.write().await.insert(market_index, meta);
        info!(market_index, ?meta, "cached market metadata");
        Ok(meta)
    }
}

#[async_trait]
impl Exchange for PerpExchangeClient {
    async fn place_order(
        &self,
        market_index: i64,
        base_amount: f64,
        price: f64,
        is_ask: bool,
        client_order_index: Option<i64>,
        market: bool,
    ) -> OrderResult {
        let client_order_index =
            client_order_index.unwrap_or_else(|| fallback_client_order_index(Utc::now().timestamp_millis()));

        if self.mock {
            info!(
                market_index,
                base_amount,
                price,
                is_ask,
                order_type = if market { "market" } else { "limit" },
                "mock order"
            );
            return OrderResult::ok(format!("mock-{client_order_index}"));
        }

        let meta = match self.market_meta(market_index).await {
            Ok(m) => m,
            Err(e) => return OrderResult::failed(e.to_string()),
        };
        let price_int = meta.encode_price(price);
        let amount_int = meta.encode_size(base_amount);
        debug!(price_int, amount_int, "order encoded to integer grid");

        let order_type = if market { 1u8 } else { ORDER_TYPE_LIMIT };
        let body = json!({
            "market_index": market_index,
            "client_order_index": client_order_index,
            "base_amount": amount_int,
            "price": price_int,
            "is_ask": is_ask,
            "order_type": order_type,
            "time_in_force": TIME_IN_FORCE_GTT,
            "account_index": self.account_index,
            "api_key_index": self.api_key_index,
        });

        let url = format!("{}/api/v1/createOrder", self.host);
        let resp = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return OrderResult::failed(e.to_string()),
        };
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%text, "order rejected");
            return OrderResult::failed(text);
        }
        let order_id = client_order_index.to_string();
        info!(order_id, "order placed");
        OrderResult::ok(order_id)
    }

    async fn place_twap_order(
        &self,
        market_index: i64,
        base_amount: f64,
        price: f64,
        is_ask: bool,
        duration_minutes: i64,
        client_order_index: Option<i64>,
    ) -> OrderResult {
        let client_order_index =
            client_order_index.unwrap_or_else(|| fallback_client_order_index(Utc::now().timestamp_millis()));

        if self.mock {
            info!(market_index, base_amount, price, is_ask, duration_minutes, "mock twap order");
            return OrderResult::ok(format!("mock-twap-{client_order_index}"));
        }

        let meta = match self.market_meta(market_index).await {
            Ok(m) => m,
            Err(e) => return OrderResult::failed(e.to_string()),
        };
        let price_int = meta.encode_price(price);
        let amount_int = meta.encode_size(base_amount);

        let body = json!({
            "market_index": market_index,
            "client_order_index": client_order_index,
            "base_amount": amount_int,
            "price": price_int,
            "is_ask": is_ask,
            "order_type": ORDER_TYPE_TWAP,
            "time_in_force": TIME_IN_FORCE_GTT,
            "order_expiry": duration_minutes * 60,
            "account_index": self.account_index,
            "api_key_index": self.api_key_index,
        });

        let url = format!("{}/api/v1/createOrder", self.host);
        let resp = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return OrderResult::failed(e.to_string()),
        };
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%text, "twap order rejected");
            return OrderResult::failed(text);
        }
        let order_id = client_order_index.to_string();
        info!(order_id, duration_minutes, "twap order placed");
        OrderResult::ok(order_id)
    }

    async fn cancel_order(&self, market_index: i64, order_id: &str) -> bool {
        if self.mock {
            info!(market_index, order_id, "mock cancel");
            return true;
        }

        let url = format!("{}/api/v1/cancelOrder", self.host);
        let body = json!({
            "market_index": market_index,
            "order_index": order_id,
            "account_index": self.account_index,
        });
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                error!(status = %resp.status(), "cancel rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "cancel failed");
                false
            }
        }
    }

    async fn get_balance(&self) -> f64 {
        if self.mock {
            return 99_999.0;
        }

        let url = format!("{}/api/v1/account", self.host);
        let resp = match self
            .http
            .get(&url)
            .query(&[("by", "index"), ("value", &self.account_index.to_string())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "balance fetch failed");
                return 0.0;
            }
        };
        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "balance response decode failed");
                return 0.0;
            }
        };
        body["accounts"][0]["available_balance"]
            .as_f64()
            .or_else(|| body["available_balance"].as_f64())
            .unwrap_or_else(|| {
                warn!(response = %body, "unexpected balance response structure");
                0.0
            })
    }

    async fn get_positions(&self) -> Vec<ExchangePosition> {
        if self.mock {
            return Vec::new();
        }

        let url = format!("{}/api/v1/account", self.host);
        let resp = match self
            .http
            .get(&url)
            .query(&[("by", "index"), ("value", &self.account_index.to_string())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "positions fetch failed");
                return Vec::new();
            }
        };
        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "positions response decode failed");
                return Vec::new();
            }
        };
        let account = if body["accounts"].is_array() && !body["accounts"].as_array().unwrap().is_empty() {
            &body["accounts"][0]
        } else {
            &body
        };
        let raw_positions = account["positions"].as_array().cloned().unwrap_or_default();

        raw_positions
            .into_iter()
            .filter_map(|pos| {
                let size = pos["size"].as_f64().unwrap_or(0.0);
                if size.abs() < 1e-10 {
                    return None;
                }
                Some(ExchangePosition {
                    market_index: pos["market_index"].as_i64().unwrap_or(0),
                    side: if size > 0.0 { PositionSide::Long } else { PositionSide::Short },
                    size: size.abs(),
                    entry_price: pos["entry_price"].as_f64().unwrap_or(0.0),
                })
            })
            .collect()
    }
}

/// Shared handle so a cycle can hold one client behind an `Arc` without
/// cloning the connection pool or cache.
pub type SharedExchange = Arc<dyn Exchange>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_places_orders_without_network() {
        let client = PerpExchangeClient::mock();
        let result = client.place_order(1, 1.5, 100.0, false, Some(42), false).await;
        assert!(result.success);
        assert_eq!(result.order_id.as_deref(), Some("mock-42"));
    }

    #[tokio::test]
    async fn mock_client_reports_large_balance() {
        let client = PerpExchangeClient::mock();
        assert_eq!(client.get_balance().await, 99_999.0);
    }

    #[tokio::test]
    async fn mock_client_has_no_positions() {
        let client = PerpExchangeClient::mock();
        assert!(client.get_positions().await.is_empty());
    }

    #[tokio::test]
    async fn mock_cancel_always_succeeds() {
        let client = PerpExchangeClient::mock();
        assert!(client.cancel_order(1, "mock-42").await);
    }
}
