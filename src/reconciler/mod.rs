//! Position reconciler: runs once at startup, before the scheduler admits
//! any jobs, to bring the DB's `open_position` table back in line with
//! whatever the exchange actually holds after a restart or crash.
//!
//! Classification per DB position follows the exchange-side sync job
//! exactly: orphan (pair row gone), confirmed (both legs present),
//! partial (one leg present — left alone, flagged for a human), stale
//! (neither leg present — removed). The auto-create step for untracked
//! exchange positions matching an enabled pair's two markets has no
//! counterpart in that job; it is implemented here directly from the
//! pair-cycle's own invariants (entry_z/entry_spread start at zero, hedge
//! ratio is the leg-B/leg-A size ratio, notional is the dollar sum of both
//! legs) rather than ported from existing sync code.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::{info, warn};

use crate::database::Database;
use crate::exchange::{Exchange, ExchangePosition, PositionSide as ExchangePositionSide};
use crate::types::{Direction, JobLog, JobStatus, OpenPosition};

pub struct Reconciler<'a> {
    db: &'a Database,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Runs the full reconciliation pass. Intended to be awaited once,
    /// before `Scheduler::start`.
    pub async fn run(&self, exchange: &dyn Exchange) -> Result<()> {
        let exchange_positions = exchange.get_positions().await;
        let by_market: HashMap<i64, ExchangePosition> =
            exchange_positions.into_iter().map(|p| (p.market_index, p)).collect();

        let db_positions = self.db.get_all_open_positions().await?;

        info!(
            db_positions = db_positions.len(),
            exchange_positions = by_market.len(),
            "position sync starting"
        );

        let mut tracked_markets: HashSet<i64> = HashSet::new();

        for position in &db_positions {
            let pair = self.db.get_pair(position.pair_id).await?;
            let pair = match pair {
                Some(p) => p,
                None => {
                    warn!(pair_id = position.pair_id, "orphaned position for deleted pair, removing");
                    self.db.delete_open_position(position.pair_id).await?;
                    continue;
                }
            };

            tracked_markets.insert(pair.market_a);
            tracked_markets.insert(pair.market_b);

            let has_a = by_market.contains_key(&pair.market_a);
            let has_b = by_market.contains_key(&pair.market_b);

            if has_a && has_b {
                info!(pair = %pair.name, "position confirmed on exchange");
            } else if has_a || has_b {
                let missing = if has_a { "B" } else { "A" };
                warn!(pair = %pair.name, missing, "partial position, leaving for manual review");
                self.log_event(
                    pair.id,
                    format!("Partial position: leg {missing} missing on exchange, leg {} still open. Not auto-closed.", if has_a { "A" } else { "B" }),
                )
                .await?;
            } else {
                warn!(pair = %pair.name, "stale position, neither leg found on exchange, removing");
                self.log_event(
                    pair.id,
                    format!(
                        "Stale position removed: direction={}, notional=${:.2}. Neither leg present on exchange.",
                        position.direction, position.entry_notional
                    ),
                )
                .await?;
                self.db.delete_open_position(pair.id).await?;
            }
        }

        let enabled_pairs = self.db.get_enabled_pairs().await?;
        for pair in &enabled_pairs {
            if self.db.get_open_position(pair.id).await?.is_some() {
                continue;
            }
            let (Some(leg_a), Some(leg_b)) = (by_market.get(&pair.market_a), by_market.get(&pair.market_b)) else {
                continue;
            };

            tracked_markets.insert(pair.market_a);
            tracked_markets.insert(pair.market_b);

            let direction = if leg_a.side == ExchangePositionSide::Long {
                Direction::LongSpread
            } else {
                Direction::ShortSpread
            };
            let hedge_ratio = if leg_a.size != 0.0 { leg_b.size / leg_a.size } else { 0.0 };
            let notional = leg_a.entry_price * leg_a.size + leg_b.entry_price * leg_b.size;

            let position = OpenPosition::new(
                pair.id,
                direction,
                0.0,
                0.0,
                leg_a.entry_price,
                leg_b.entry_price,
                hedge_ratio,
                notional,
            );
            self.db.insert_open_position(&position).await?;
            warn!(pair = %pair.name, hedge_ratio, notional, "auto-created position from untracked exchange state");
            self.log_event(
                pair.id,
                format!("Auto-created position from exchange state not tracked in the database (hedge_ratio={hedge_ratio:.4}, notional=${notional:.2})."),
            )
            .await?;
        }

        for (market_index, position) in &by_market {
            if !tracked_markets.contains(market_index) {
                warn!(market_index, side = ?position.side, size = position.size, "exchange position not tracked by any pair");
            }
        }

        info!("position sync complete");
        Ok(())
    }

    async fn log_event(&self, pair_id: i64, message: String) -> Result<()> {
        let mut log = JobLog::new(pair_id, JobStatus::Warning.as_str());
        log.action = Some("position_sync".to_string());
        log.message = Some(message);
        self.db.insert_job_log(&log).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::PositionSide;
    use crate::types::TradingPair;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeExchange {
        positions: Mutex<Vec<ExchangePosition>>,
    }

    #[async_trait]
    impl Exchange for FakeExchange {
        async fn place_order(
            &self,
            _market_index: i64,
            _base_amount: f64,
            _price: f64,
            _is_ask: bool,
            _client_order_index: Option<i64>,
            _market: bool,
        ) -> crate::exchange::OrderResult {
            unimplemented!()
        }

        async fn place_twap_order(
            &self,
            _market_index: i64,
            _base_amount: f64,
            _price: f64,
            _is_ask: bool,
            _duration_minutes: i64,
            _client_order_index: Option<i64>,
        ) -> crate::exchange::OrderResult {
            unimplemented!()
        }

        async fn cancel_order(&self, _market_index: i64, _order_id: &str) -> bool {
            unimplemented!()
        }

        async fn get_balance(&self) -> f64 {
            unimplemented!()
        }

        async fn get_positions(&self) -> Vec<ExchangePosition> {
            self.positions.lock().unwrap().clone()
        }
    }

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn confirmed_position_is_left_alone() {
        let db = test_db().await;
        let mut pair = TradingPair::new("btc_eth", "BTC", "ETH");
        pair.market_a = 1;
        pair.market_b = 2;
        let pair_id = db.insert_pair(&pair).await.unwrap();
        let pos = OpenPosition::new(pair_id, Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let exchange = FakeExchange {
            positions: Mutex::new(vec![
                ExchangePosition { market_index: 1, side: PositionSide::Long, size: 1.0, entry_price: 100.0 },
                ExchangePosition { market_index: 2, side: PositionSide::Short, size: 1.0, entry_price: 50.0 },
            ]),
        };

        Reconciler::new(&db).run(&exchange).await.unwrap();
        assert!(db.get_open_position(pair_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_position_is_deleted() {
        let db = test_db().await;
        let mut pair = TradingPair::new("btc_eth", "BTC", "ETH");
        pair.market_a = 1;
        pair.market_b = 2;
        let pair_id = db.insert_pair(&pair).await.unwrap();
        let pos = OpenPosition::new(pair_id, Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let exchange = FakeExchange { positions: Mutex::new(vec![]) };
        Reconciler::new(&db).run(&exchange).await.unwrap();
        assert!(db.get_open_position(pair_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_position_is_kept_and_flagged() {
        let db = test_db().await;
        let mut pair = TradingPair::new("btc_eth", "BTC", "ETH");
        pair.market_a = 1;
        pair.market_b = 2;
        let pair_id = db.insert_pair(&pair).await.unwrap();
        let pos = OpenPosition::new(pair_id, Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let exchange = FakeExchange {
            positions: Mutex::new(vec![ExchangePosition {
                market_index: 1,
                side: PositionSide::Long,
                size: 1.0,
                entry_price: 100.0,
            }]),
        };
        Reconciler::new(&db).run(&exchange).await.unwrap();
        assert!(db.get_open_position(pair_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphaned_position_for_deleted_pair_is_removed() {
        let db = test_db().await;
        let pos = OpenPosition::new(999, Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let exchange = FakeExchange { positions: Mutex::new(vec![]) };
        Reconciler::new(&db).run(&exchange).await.unwrap();
        assert!(db.get_open_position(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_creates_position_from_untracked_exchange_state() {
        let db = test_db().await;
        let mut pair = TradingPair::new("btc_eth", "BTC", "ETH");
        pair.market_a = 1;
        pair.market_b = 2;
        let pair_id = db.insert_pair(&pair).await.unwrap();

        let exchange = FakeExchange {
            positions: Mutex::new(vec![
                ExchangePosition { market_index: 1, side: PositionSide::Long, size: 0.5, entry_price: 100.0 },
                ExchangePosition { market_index: 2, side: PositionSide::Short, size: 1.0, entry_price: 50.0 },
            ]),
        };

        Reconciler::new(&db).run(&exchange).await.unwrap();

        let created = db.get_open_position(pair_id).await.unwrap().unwrap();
        assert_eq!(created.direction, Direction::LongSpread.value());
        assert!((created.entry_hedge_ratio - 2.0).abs() < 1e-9);
        assert!((created.entry_notional - 100.0).abs() < 1e-9);
        assert_eq!(created.entry_z, 0.0);
        assert_eq!(created.entry_spread, 0.0);
    }

    #[tokio::test]
    async fn untracked_exchange_position_is_warning_only() {
        let db = test_db().await;
        let exchange = FakeExchange {
            positions: Mutex::new(vec![ExchangePosition {
                market_index: 7,
                side: PositionSide::Long,
                size: 1.0,
                entry_price: 10.0,
            }]),
        };
        Reconciler::new(&db).run(&exchange).await.unwrap();
        assert!(db.get_all_open_positions().await.unwrap().is_empty());
    }
}
