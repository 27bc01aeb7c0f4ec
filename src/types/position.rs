#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Direction;

/// An open two-legged pair position, persisted so it survives a restart.
/// There is at most one row per `pair_id` — enforced by a unique index,
/// not by application logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: i64,
    pub pair_id: i64,
    pub direction: i32,
    pub entry_z: f64,
    pub entry_spread: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub entry_hedge_ratio: f64,
    pub entry_notional: f64,
    pub entry_time: DateTime<Utc>,
    pub exchange_order_id_a: Option<String>,
    pub exchange_order_id_b: Option<String>,
}

impl OpenPosition {
    pub fn direction_enum(&self) -> Option<Direction> {
        Direction::from_value(self.direction)
    }

    pub fn new(
        pair_id: i64,
        direction: Direction,
        entry_z: f64,
        entry_spread: f64,
        entry_price_a: f64,
        entry_price_b: f64,
        entry_hedge_ratio: f64,
        entry_notional: f64,
    ) -> Self {
        Self {
            id: 0,
            pair_id,
            direction: direction.value(),
            entry_z,
            entry_spread,
            entry_price_a,
            entry_price_b,
            entry_hedge_ratio,
            entry_notional,
            entry_time: Utc::now(),
            exchange_order_id_a: None,
            exchange_order_id_b: None,
        }
    }
}
