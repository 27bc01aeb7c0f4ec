//! Emergency stop: a fleet-wide, out-of-band operation that can close every
//! open position and/or disable every pair in one call. Driven directly
//! against the exchange client and the scheduler, bypassing the per-pair
//! cycle entirely — there is no signal evaluation here, just an unconditional
//! reverse-leg close.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::crypto::CredentialCipher;
use crate::database::Database;
use crate::exchange::{Exchange, PerpExchangeClient};
use crate::market_data::MarketDataGateway;
use crate::notifications::{AlertType, NotificationManager};
use crate::scheduler::Scheduler;
use crate::types::{Direction, EquitySnapshot, ExitReason, Interval, OpenPosition, Trade};

#[derive(Debug, Default, serde::Serialize)]
pub struct EmergencyStopResult {
    pub positions_closed: u32,
    pub pairs_disabled: u32,
    pub errors: Vec<String>,
}

pub struct EmergencyStop {
    db: Arc<Database>,
    market_data: Arc<MarketDataGateway>,
    notifications: NotificationManager,
    cipher: Arc<CredentialCipher>,
    mock_exchange: bool,
}

impl EmergencyStop {
    pub fn new(
        db: Arc<Database>,
        market_data: Arc<MarketDataGateway>,
        notifications: NotificationManager,
        cipher: Arc<CredentialCipher>,
        mock_exchange: bool,
    ) -> Self {
        Self { db, market_data, notifications, cipher, mock_exchange }
    }

    /// Runs the requested subset of close/disable. `scheduler` is optional:
    /// disabling pairs without a live scheduler (e.g. a one-shot CLI
    /// invocation against a stopped process) just updates the DB.
    pub async fn run(&self, close_positions: bool, disable_pairs: bool, scheduler: Option<&Scheduler>) -> Result<EmergencyStopResult> {
        let mut result = EmergencyStopResult::default();

        if close_positions {
            let positions = self.db.get_all_open_positions().await?;
            for position in positions {
                match self.close_position(&position).await {
                    Ok(()) => result.positions_closed += 1,
                    Err(e) => {
                        let message = format!("Failed to close position {} (pair {}): {e}", position.id, position.pair_id);
                        error!("{message}");
                        result.errors.push(message);
                    }
                }
            }
        }

        if disable_pairs {
            let pairs = self.db.get_enabled_pairs().await?;
            self.db.disable_all_pairs().await?;
            for pair in &pairs {
                if let Some(scheduler) = scheduler {
                    scheduler.remove_job(pair.id).await;
                }
                result.pairs_disabled += 1;
            }
        }

        info!(
            positions_closed = result.positions_closed,
            pairs_disabled = result.pairs_disabled,
            errors = result.errors.len(),
            "emergency stop complete"
        );
        self.notifications.notify(AlertType::EmergencyStop {
            positions_closed: result.positions_closed as usize,
            pairs_disabled: result.pairs_disabled as usize,
            error_count: result.errors.len(),
        });
        Ok(result)
    }

    async fn make_exchange(&self) -> Result<Arc<dyn Exchange>> {
        if self.mock_exchange {
            return Ok(Arc::new(PerpExchangeClient::mock()));
        }
        let cred = self
            .db
            .get_active_credential()
            .await?
            .ok_or_else(|| anyhow::anyhow!("no active credential"))?;
        let private_key = self.cipher.decrypt(&cred.private_key_encrypted)?;
        Ok(Arc::new(PerpExchangeClient::new(cred.exchange_host, private_key, cred.api_key_index, cred.account_index)))
    }

    async fn close_position(&self, position: &OpenPosition) -> Result<()> {
        let pair = self
            .db
            .get_pair(position.pair_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("pair {} not found", position.pair_id))?;
        let exchange = self.make_exchange().await?;

        let window_interval = Interval::from_str(&pair.window_interval).unwrap_or(Interval::H4);
        let train_interval = Interval::from_str(&pair.train_interval).unwrap_or(Interval::H4);
        let data = self
            .market_data
            .fetch_pair_data(&pair.asset_a, &pair.asset_b, window_interval, 5, train_interval, 5)
            .await;

        let current_price_a = *data.prices_a.last().ok_or_else(|| anyhow::anyhow!("no price data for leg A"))?;
        let current_price_b = *data.prices_b.last().ok_or_else(|| anyhow::anyhow!("no price data for leg B"))?;

        let dollar_per_unit = position.entry_price_a + position.entry_hedge_ratio.abs() * position.entry_price_b;
        let units = if dollar_per_unit > 0.0 { position.entry_notional / dollar_per_unit } else { 0.0 };

        let is_ask_a = position.direction == 1;
        let is_ask_b = position.direction == -1;
        let size_a = units.abs();
        let size_b = (units * position.entry_hedge_ratio).abs();

        let result_a = exchange.place_order(pair.market_a, size_a, current_price_a, is_ask_a, None, true).await;
        let result_b = exchange.place_order(pair.market_b, size_b, current_price_b, is_ask_b, None, true).await;

        if !result_a.success || !result_b.success {
            let err = result_a.error.or(result_b.error).unwrap_or_default();
            anyhow::bail!("close order failed: {err}");
        }

        let spread_change = (current_price_a - position.entry_hedge_ratio * current_price_b) - position.entry_spread;
        let pnl = position.direction as f64 * spread_change * units;
        let pnl_pct = if pair.current_equity > 0.0 { pnl / pair.current_equity * 100.0 } else { 0.0 };

        let direction_label = Direction::from_value(position.direction).map(|d| d.label()).unwrap_or("unknown");
        let trade = Trade {
            id: 0,
            pair_id: pair.id,
            direction: direction_label.to_string(),
            entry_time: position.entry_time,
            exit_time: chrono::Utc::now(),
            entry_price_a: position.entry_price_a,
            exit_price_a: current_price_a,
            entry_price_b: position.entry_price_b,
            exit_price_b: current_price_b,
            size_a: (size_a * 10_000.0).round() / 10_000.0,
            size_b: (size_b * 10_000.0).round() / 10_000.0,
            hedge_ratio: position.entry_hedge_ratio,
            pnl: (pnl * 100.0).round() / 100.0,
            pnl_pct: (pnl_pct * 100.0).round() / 100.0,
            exit_reason: ExitReason::EmergencyStop.as_str().to_string(),
            duration_candles: 0,
        };
        let new_equity = pair.current_equity + pnl;
        self.db
            .record_position_close(&trade, pair.id, new_equity, &EquitySnapshot::new(pair.id, new_equity))
            .await?;

        info!(pair = %pair.name, pnl, "emergency-closed position");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialCipher;
    use crate::types::{Direction, TradingPair};

    async fn test_db() -> Arc<Database> {
        Arc::new(Database::new("sqlite::memory:").await.unwrap())
    }

    fn test_cipher() -> Arc<CredentialCipher> {
        Arc::new(CredentialCipher::new(&CredentialCipher::generate_key()).unwrap())
    }

    #[tokio::test]
    async fn disable_pairs_without_scheduler_updates_db_only() {
        let db = test_db().await;
        let pair = TradingPair::new("btc_eth", "BTC", "ETH");
        db.insert_pair(&pair).await.unwrap();

        let market_data = Arc::new(MarketDataGateway::new("http://localhost", "http://localhost"));
        let stop = EmergencyStop::new(db.clone(), market_data, NotificationManager::spawn(16), test_cipher(), true);

        let result = stop.run(false, true, None).await.unwrap();
        assert_eq!(result.pairs_disabled, 1);
        assert!(db.get_enabled_pairs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn noop_when_both_flags_false() {
        let db = test_db().await;
        let market_data = Arc::new(MarketDataGateway::new("http://localhost", "http://localhost"));
        let stop = EmergencyStop::new(db.clone(), market_data, NotificationManager::spawn(16), test_cipher(), true);

        let result = stop.run(false, false, None).await.unwrap();
        assert_eq!(result.positions_closed, 0);
        assert_eq!(result.pairs_disabled, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn close_position_failure_is_collected_not_fatal() {
        let db = test_db().await;
        let pos = OpenPosition::new(42, Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let market_data = Arc::new(MarketDataGateway::new("http://localhost", "http://localhost"));
        let stop = EmergencyStop::new(db.clone(), market_data, NotificationManager::spawn(16), test_cipher(), true);

        let result = stop.run(true, false, None).await.unwrap();
        assert_eq!(result.positions_closed, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("pair 42"));
    }
}
