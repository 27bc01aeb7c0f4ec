use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::crypto::CredentialCipher;
use crate::database::Database;
use crate::exchange::{Exchange, OrderResult, PerpExchangeClient};
use crate::market_data::{MarketDataGateway, PairData};
use crate::notifications::{AlertType, NotificationManager};
use crate::signal::{self, SignalResult};
use crate::types::{Direction, ExitReason, Interval, JobLog, JobStatus, OpenPosition, Trade, TradingPair};

/// `{count, first, last, closes}` summary of one price series, kept for
/// after-the-fact replay in `JobLog.market_data`.
fn series_summary(series: &[f64]) -> serde_json::Value {
    serde_json::json!({
        "count": series.len(),
        "first": series.first(),
        "last": series.last(),
        "closes": series,
    })
}

fn candles_json(data: &PairData) -> serde_json::Value {
    serde_json::json!({
        "prices_a": series_summary(&data.prices_a),
        "prices_b": series_summary(&data.prices_b),
        "train_a": series_summary(&data.train_a),
        "train_b": series_summary(&data.train_b),
    })
}

fn orders_json(leg_a: &OrderResult, leg_b: &OrderResult) -> serde_json::Value {
    serde_json::json!({"leg_a": leg_a, "leg_b": leg_b})
}

/// Builds the `JobLog.market_data` blob: `candles` when price data was
/// fetched, `orders` only on cycles that actually placed orders.
fn market_data_json(candles: Option<&PairData>, orders: Option<(&OrderResult, &OrderResult)>) -> Option<serde_json::Value> {
    if candles.is_none() && orders.is_none() {
        return None;
    }
    let mut obj = serde_json::Map::new();
    if let Some(data) = candles {
        obj.insert("candles".to_string(), candles_json(data));
    }
    if let Some((a, b)) = orders {
        obj.insert("orders".to_string(), orders_json(a, b));
    }
    Some(serde_json::Value::Object(obj))
}

/// One trading iteration for one pair: fetch market data, compute signals,
/// and either evaluate entry (flat) or exit (in position). Constructed once
/// and reused across cycles for every pair; holds no per-pair state itself.
pub struct PairCycle {
    db: Arc<Database>,
    market_data: Arc<MarketDataGateway>,
    notifications: NotificationManager,
    cipher: Arc<CredentialCipher>,
    mock_exchange: bool,
}

impl PairCycle {
    pub fn new(
        db: Arc<Database>,
        market_data: Arc<MarketDataGateway>,
        notifications: NotificationManager,
        cipher: Arc<CredentialCipher>,
        mock_exchange: bool,
    ) -> Self {
        Self {
            db,
            market_data,
            notifications,
            cipher,
            mock_exchange,
        }
    }

    /// Records that a tick was skipped because the previous cycle for this
    /// pair was still running. Called by the scheduler, which owns the
    /// overlap check but not a database handle of its own.
    pub async fn log_skipped_overlap(&self, pair_id: i64) {
        let mut log = JobLog::new(pair_id, JobStatus::Skipped.as_str());
        log.action = Some("cycle_skipped_overlap".to_string());
        log.message = Some("Skipped cycle because previous run is still in progress".to_string());
        if let Err(e) = self.db.insert_job_log(&log).await {
            warn!(pair_id, error = %e, "failed to log skipped cycle");
        }
    }

    /// Runs one cycle for `pair_id`. Any error surfacing from the body is
    /// trapped here, logged, and reported — a cycle never propagates a
    /// failure to the scheduler.
    pub async fn run(&self, pair_id: i64) {
        if let Err(e) = self.run_inner(pair_id).await {
            error!(pair_id, error = %e, "cycle error");
            self.notifications.notify(AlertType::CycleError {
                pair_id,
                message: e.to_string(),
            });
            let mut log = JobLog::new(pair_id, JobStatus::Error.as_str());
            log.message = Some(e.to_string());
            let _ = self.db.insert_job_log(&log).await;
        }
    }

    async fn run_inner(&self, pair_id: i64) -> Result<()> {
        let pair = match self.db.get_pair(pair_id).await? {
            Some(p) if p.enabled => p,
            _ => return Ok(()),
        };

        info!(pair = %pair.name, "starting cycle");

        let window_interval = Interval::from_str(&pair.window_interval).unwrap_or(Interval::H4);
        let train_interval = Interval::from_str(&pair.train_interval).unwrap_or(Interval::H4);

        let data = self
            .market_data
            .fetch_pair_data(
                &pair.asset_a,
                &pair.asset_b,
                window_interval,
                pair.window_candles as usize,
                train_interval,
                pair.train_candles as usize,
            )
            .await;

        if data.prices_a.is_empty() || data.prices_b.is_empty() || data.train_a.is_empty() || data.train_b.is_empty() {
            self.log(
                pair.id,
                JobStatus::Error,
                None,
                None,
                Some("Empty candle data from exchange".into()),
                None,
                None,
                Some(&data),
                None,
            )
            .await?;
            return Ok(());
        }

        let close_a = *data.prices_a.last().unwrap();
        let close_b = *data.prices_b.last().unwrap();

        if data.prices_a.len() < pair.window_candles as usize || data.prices_b.len() < pair.window_candles as usize {
            self.log(
                pair.id,
                JobStatus::Error,
                None,
                None,
                Some("Insufficient price data".into()),
                Some(close_a),
                Some(close_b),
                Some(&data),
                None,
            )
            .await?;
            return Ok(());
        }

        if data.train_a.len() < pair.train_candles as usize || data.train_b.len() < pair.train_candles as usize {
            self.log(
                pair.id,
                JobStatus::Error,
                None,
                None,
                Some("Insufficient training data".into()),
                Some(close_a),
                Some(close_b),
                Some(&data),
                None,
            )
            .await?;
            return Ok(());
        }

        let signals = signal::compute_signals(
            &data.prices_a,
            &data.prices_b,
            &data.train_a,
            &data.train_b,
            pair.window_candles as usize,
            pair.train_candles as usize,
            pair.rsi_period as usize,
        );

        info!(
            pair = %pair.name,
            z = signals.z_score,
            hr = signals.hedge_ratio,
            hl = signals.half_life,
            rsi = signals.rsi,
            "signals computed"
        );

        match self.db.get_open_position(pair.id).await? {
            None => self.handle_entry(&pair, &signals, close_a, close_b, &data).await?,
            Some(position) => self.handle_exit(&pair, &position, &signals, close_a, close_b, &data).await?,
        }

        Ok(())
    }

    async fn make_exchange(&self) -> Result<Option<Arc<dyn Exchange>>> {
        if self.mock_exchange {
            return Ok(Some(Arc::new(PerpExchangeClient::mock())));
        }
        let cred = match self.db.get_active_credential().await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let private_key = self.cipher.decrypt(&cred.private_key_encrypted)?;
        Ok(Some(Arc::new(PerpExchangeClient::new(
            cred.exchange_host,
            private_key,
            cred.api_key_index,
            cred.account_index,
        ))))
    }

    async fn place_pair_order(
        &self,
        exchange: &dyn Exchange,
        pair: &TradingPair,
        market_index: i64,
        base_amount: f64,
        price: f64,
        is_ask: bool,
    ) -> OrderResult {
        if pair.twap_minutes > 0 {
            exchange
                .place_twap_order(market_index, base_amount, price, is_ask, pair.twap_minutes, None)
                .await
        } else {
            exchange.place_order(market_index, base_amount, price, is_ask, None, true).await
        }
    }

    /// Cancels the surviving leg when its sibling failed. A failed
    /// cancellation is logged and alerted at critical severity — it leaves
    /// an orphaned single-sided position that needs operator attention.
    async fn rollback_partial_fill(
        &self,
        exchange: &dyn Exchange,
        pair: &TradingPair,
        result_a: &OrderResult,
        result_b: &OrderResult,
        stage: &str,
    ) {
        let (market_index, leg, order_id) = if result_a.success && !result_b.success {
            (pair.market_a, "A", result_a.order_id.clone())
        } else if result_b.success && !result_a.success {
            (pair.market_b, "B", result_b.order_id.clone())
        } else {
            return;
        };

        let Some(order_id) = order_id else { return };

        warn!(pair = %pair.name, stage, leg, order_id, "rolling back surviving leg");
        let cancelled = exchange.cancel_order(market_index, &order_id).await;
        if !cancelled {
            let message = format!("Could not cancel leg {leg} order {order_id}");
            error!(pair = %pair.name, stage, "{message}");
            self.notifications.notify(AlertType::RollbackFailed {
                pair_id: pair.id,
                stage: stage.to_string(),
                message: message.clone(),
            });
            let mut log = JobLog::new(pair.id, JobStatus::Error.as_str());
            log.action = Some(format!("{stage}_rollback_failed"));
            log.message = Some(message);
            let _ = self.db.insert_job_log(&log).await;
        }
    }

    async fn handle_entry(&self, pair: &TradingPair, signals: &SignalResult, close_a: f64, close_b: f64, data: &PairData) -> Result<()> {
        let exchange = match self.make_exchange().await? {
            Some(e) => e,
            None => {
                self.log(
                    pair.id,
                    JobStatus::Error,
                    Some(signals),
                    None,
                    Some("No active credential".into()),
                    Some(close_a),
                    Some(close_b),
                    Some(data),
                    None,
                )
                .await?;
                return Ok(());
            }
        };

        let balance = exchange.get_balance().await;
        let position_size = balance * pair.position_size_pct / 100.0;
        if position_size <= 0.0 {
            self.log(
                pair.id,
                JobStatus::Error,
                Some(signals),
                None,
                Some(format!("Insufficient balance: ${balance:.2}")),
                Some(close_a),
                Some(close_b),
                Some(data),
                None,
            )
            .await?;
            return Ok(());
        }

        let equity_floor = position_size * pair.min_equity_pct / 100.0;
        self.db.update_pair_equity(pair.id, position_size).await?;

        let entry = signal::evaluate_entry(
            signals,
            pair.entry_z,
            pair.max_half_life,
            pair.rsi_upper,
            pair.rsi_lower,
            position_size,
            equity_floor,
            pair.leverage,
        );

        if !entry.should_enter {
            let reason = entry.skip_reason.unwrap_or("unknown");
            let action = if reason == "no_signal" { "none".to_string() } else { format!("skip:{reason}") };
            self.log(
                pair.id,
                JobStatus::Success,
                Some(signals),
                Some(action),
                Some(format!("No entry: {reason}")),
                Some(close_a),
                Some(close_b),
                Some(data),
                None,
            )
            .await?;
            return Ok(());
        }

        let dollar_per_unit = close_a + signals.hedge_ratio.abs() * close_b;
        let units = if dollar_per_unit > 0.0 { entry.notional / dollar_per_unit } else { 0.0 };

        let is_ask_a = entry.direction == -1;
        let is_ask_b = entry.direction == 1;
        let size_a = units.abs();
        let size_b = (units * signals.hedge_ratio).abs();

        let result_a = self.place_pair_order(&*exchange, pair, pair.market_a, size_a, close_a, is_ask_a).await;
        let result_b = self.place_pair_order(&*exchange, pair, pair.market_b, size_b, close_b, is_ask_b).await;

        if !result_a.success || !result_b.success {
            let err = result_a.error.clone().or_else(|| result_b.error.clone()).unwrap_or_default();
            self.rollback_partial_fill(&*exchange, pair, &result_a, &result_b, "entry").await;
            self.log(
                pair.id,
                JobStatus::Error,
                Some(signals),
                Some("entry_failed".to_string()),
                Some(format!("Order failed (rolled back): {err}")),
                Some(close_a),
                Some(close_b),
                Some(data),
                Some((&result_a, &result_b)),
            )
            .await?;
            return Ok(());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let exchange_markets: HashSet<i64> = exchange.get_positions().await.into_iter().map(|p| p.market_index).collect();
        let has_leg_a = exchange_markets.contains(&pair.market_a);
        let has_leg_b = exchange_markets.contains(&pair.market_b);

        if !has_leg_a || !has_leg_b {
            let mut missing = Vec::new();
            if !has_leg_a {
                missing.push(format!("leg A (market {})", pair.market_a));
            }
            if !has_leg_b {
                missing.push(format!("leg B (market {})", pair.market_b));
            }
            let message = format!("Orders accepted but positions not found on exchange: {}", missing.join(", "));
            self.log(
                pair.id,
                JobStatus::Error,
                Some(signals),
                Some("entry_not_confirmed".to_string()),
                Some(message.clone()),
                Some(close_a),
                Some(close_b),
                Some(data),
                Some((&result_a, &result_b)),
            )
            .await?;
            self.notifications.notify(AlertType::SettlementMismatch {
                pair_id: pair.id,
                stage: "entry".to_string(),
            });
            return Ok(());
        }

        if self.db.get_open_position(pair.id).await?.is_some() {
            warn!(pair = %pair.name, "position already exists, aborting entry");
            self.log(
                pair.id,
                JobStatus::Skipped,
                Some(signals),
                Some("entry_aborted_duplicate".to_string()),
                Some("Position already existed at commit time".into()),
                Some(close_a),
                Some(close_b),
                Some(data),
                Some((&result_a, &result_b)),
            )
            .await?;
            return Ok(());
        }

        let direction = Direction::from_value(entry.direction).expect("evaluate_entry only returns +-1");
        let mut position = OpenPosition::new(
            pair.id,
            direction,
            signals.z_score,
            signals.current_spread,
            close_a,
            close_b,
            signals.hedge_ratio,
            entry.notional,
        );
        position.exchange_order_id_a = result_a.order_id.clone();
        position.exchange_order_id_b = result_b.order_id.clone();
        self.db.insert_open_position(&position).await?;

        let action = if entry.direction == 1 { "entry_long" } else { "entry_short" };
        info!(pair = %pair.name, action, z = signals.z_score, "entered position");
        self.notifications.notify(AlertType::PositionOpened {
            pair_id: pair.id,
            pair_name: pair.name.clone(),
            direction: entry.direction,
            notional: entry.notional,
        });
        self.log(
            pair.id,
            JobStatus::Success,
            Some(signals),
            Some(action.to_string()),
            Some(format!("Notional: ${:.0}", entry.notional)),
            Some(close_a),
            Some(close_b),
            Some(data),
            Some((&result_a, &result_b)),
        )
        .await?;
        Ok(())
    }

    async fn handle_exit(
        &self,
        pair: &TradingPair,
        position: &OpenPosition,
        signals: &SignalResult,
        close_a: f64,
        close_b: f64,
        data: &PairData,
    ) -> Result<()> {
        let exit = signal::evaluate_exit(
            signals,
            position.direction,
            position.entry_spread,
            position.entry_price_a,
            position.entry_price_b,
            position.entry_hedge_ratio,
            position.entry_notional,
            pair.current_equity,
            pair.exit_z,
            pair.stop_z,
            pair.stop_loss_pct,
            close_a,
            close_b,
        );

        if !exit.should_exit {
            self.log(
                pair.id,
                JobStatus::Success,
                Some(signals),
                Some("hold".to_string()),
                Some(format!("Unrealized: ${:.2} ({:.2}%)", exit.unrealized_pnl, exit.unrealized_pct)),
                Some(close_a),
                Some(close_b),
                Some(data),
                None,
            )
            .await?;
            return Ok(());
        }

        let exchange = match self.make_exchange().await? {
            Some(e) => e,
            None => {
                self.log(
                    pair.id,
                    JobStatus::Error,
                    Some(signals),
                    None,
                    Some("No active credential for exit".into()),
                    Some(close_a),
                    Some(close_b),
                    Some(data),
                    None,
                )
                .await?;
                return Ok(());
            }
        };

        let dollar_per_unit = position.entry_price_a + position.entry_hedge_ratio.abs() * position.entry_price_b;
        let units = if dollar_per_unit > 0.0 { position.entry_notional / dollar_per_unit } else { 0.0 };

        let is_ask_a = position.direction == 1;
        let is_ask_b = position.direction == -1;
        let size_a = units.abs();
        let size_b = (units * position.entry_hedge_ratio).abs();

        let result_a = self.place_pair_order(&*exchange, pair, pair.market_a, size_a, close_a, is_ask_a).await;
        let result_b = self.place_pair_order(&*exchange, pair, pair.market_b, size_b, close_b, is_ask_b).await;

        if !result_a.success || !result_b.success {
            let err = result_a.error.clone().or_else(|| result_b.error.clone()).unwrap_or_default();
            self.rollback_partial_fill(&*exchange, pair, &result_a, &result_b, "exit").await;
            self.log(
                pair.id,
                JobStatus::Error,
                Some(signals),
                Some("exit_failed".to_string()),
                Some(format!("Close order failed (rolled back): {err}")),
                Some(close_a),
                Some(close_b),
                Some(data),
                Some((&result_a, &result_b)),
            )
            .await?;
            return Ok(());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let exchange_markets: HashSet<i64> = exchange.get_positions().await.into_iter().map(|p| p.market_index).collect();
        let has_leg_a = exchange_markets.contains(&pair.market_a);
        let has_leg_b = exchange_markets.contains(&pair.market_b);

        if has_leg_a || has_leg_b {
            let mut still_open = Vec::new();
            if has_leg_a {
                still_open.push(format!("leg A (market {})", pair.market_a));
            }
            if has_leg_b {
                still_open.push(format!("leg B (market {})", pair.market_b));
            }
            self.log(
                pair.id,
                JobStatus::Error,
                Some(signals),
                Some("exit_not_confirmed".to_string()),
                Some(format!("Exit orders accepted but positions still open: {}", still_open.join(", "))),
                Some(close_a),
                Some(close_b),
                Some(data),
                Some((&result_a, &result_b)),
            )
            .await?;
            return Ok(());
        }

        let pnl = if exit.exit_reason == Some(ExitReason::StopLoss) {
            -pair.stop_loss_pct / 100.0 * pair.current_equity
        } else {
            let spread_change = (close_a - position.entry_hedge_ratio * close_b) - position.entry_spread;
            position.direction as f64 * spread_change * units
        };
        let pnl_pct = if pair.current_equity > 0.0 { pnl / pair.current_equity * 100.0 } else { 0.0 };

        let direction_label = Direction::from_value(position.direction).map(|d| d.label()).unwrap_or("unknown");
        let trade = Trade {
            id: 0,
            pair_id: pair.id,
            direction: direction_label.to_string(),
            entry_time: position.entry_time,
            exit_time: chrono::Utc::now(),
            entry_price_a: position.entry_price_a,
            exit_price_a: close_a,
            entry_price_b: position.entry_price_b,
            exit_price_b: close_b,
            size_a: (size_a * 10_000.0).round() / 10_000.0,
            size_b: (size_b * 10_000.0).round() / 10_000.0,
            hedge_ratio: position.entry_hedge_ratio,
            pnl: (pnl * 100.0).round() / 100.0,
            pnl_pct: (pnl_pct * 100.0).round() / 100.0,
            exit_reason: exit.exit_reason.map(|r| r.as_str()).unwrap_or("unknown").to_string(),
            duration_candles: 0,
        };
        let new_equity = pair.current_equity + pnl;
        self.db
            .record_position_close(&trade, pair.id, new_equity, &crate::types::EquitySnapshot::new(pair.id, new_equity))
            .await?;

        let reason = exit.exit_reason.map(|r| r.as_str()).unwrap_or("unknown");
        info!(pair = %pair.name, reason, pnl, pnl_pct, "exited position");
        self.notifications.notify(AlertType::PositionClosed {
            pair_id: pair.id,
            pair_name: pair.name.clone(),
            pnl,
            pnl_pct,
            reason: reason.to_string(),
        });
        self.log(
            pair.id,
            JobStatus::Success,
            Some(signals),
            Some(format!("exit:{reason}")),
            Some(format!("PnL: ${pnl:.2} ({pnl_pct:.2}%)")),
            Some(close_a),
            Some(close_b),
            Some(data),
            Some((&result_a, &result_b)),
        )
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        pair_id: i64,
        status: JobStatus,
        signals: Option<&SignalResult>,
        action: Option<String>,
        message: Option<String>,
        close_a: Option<f64>,
        close_b: Option<f64>,
        candles: Option<&PairData>,
        orders: Option<(&OrderResult, &OrderResult)>,
    ) -> Result<()> {
        let mut log = JobLog::new(pair_id, status.as_str());
        if let Some(s) = signals {
            log.z_score = Some(s.z_score);
            log.hedge_ratio = Some(s.hedge_ratio);
            log.half_life = Some(s.half_life);
            log.rsi = Some(s.rsi);
        }
        log.action = action;
        log.message = message;
        log.close_a = close_a;
        log.close_b = close_b;
        log.market_data = market_data_json(candles, orders);
        self.db.insert_job_log(&log).await?;
        Ok(())
    }
}
