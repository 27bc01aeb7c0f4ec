use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::types::{Credential, EquitySnapshot, JobLog, OpenPosition, Trade, TradingPair};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        info!(db_url, "opening database");

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let db = Self { pool };
        db.create_schema().await?;
        db.run_migrations().await?;

        info!("database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_pair (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                asset_a TEXT NOT NULL,
                asset_b TEXT NOT NULL,
                market_a INTEGER NOT NULL DEFAULT 0,
                market_b INTEGER NOT NULL DEFAULT 0,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                entry_z REAL NOT NULL DEFAULT 2.0,
                exit_z REAL NOT NULL DEFAULT 0.5,
                stop_z REAL NOT NULL DEFAULT 4.0,
                window_interval TEXT NOT NULL DEFAULT '4h',
                window_candles INTEGER NOT NULL DEFAULT 40,
                train_interval TEXT NOT NULL DEFAULT '4h',
                train_candles INTEGER NOT NULL DEFAULT 100,
                max_half_life REAL NOT NULL DEFAULT 50.0,
                max_adx REAL NOT NULL DEFAULT 40.0,
                rsi_period INTEGER NOT NULL DEFAULT 14,
                rsi_upper REAL NOT NULL DEFAULT 70.0,
                rsi_lower REAL NOT NULL DEFAULT 20.0,
                stop_loss_pct REAL NOT NULL DEFAULT 10.0,
                position_size_pct REAL NOT NULL DEFAULT 50.0,
                tx_cost_bps REAL NOT NULL DEFAULT 0.0,
                leverage REAL NOT NULL DEFAULT 5.0,
                min_equity_pct REAL NOT NULL DEFAULT 40.0,
                twap_minutes INTEGER NOT NULL DEFAULT 0,
                schedule_interval TEXT NOT NULL DEFAULT '15m',
                current_equity REAL NOT NULL DEFAULT 0.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS open_position (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                direction INTEGER NOT NULL,
                entry_z REAL NOT NULL,
                entry_spread REAL NOT NULL,
                entry_price_a REAL NOT NULL,
                entry_price_b REAL NOT NULL,
                entry_hedge_ratio REAL NOT NULL,
                entry_notional REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exchange_order_id_a TEXT,
                exchange_order_id_b TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_open_position_pair_id ON open_position(pair_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                direction TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                entry_price_a REAL NOT NULL,
                exit_price_a REAL NOT NULL,
                entry_price_b REAL NOT NULL,
                exit_price_b REAL NOT NULL,
                size_a REAL NOT NULL,
                size_b REAL NOT NULL,
                hedge_ratio REAL NOT NULL,
                pnl REAL NOT NULL,
                pnl_pct REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                duration_candles INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_pair_id ON trade(pair_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                equity REAL NOT NULL,
                drawdown_pct REAL NOT NULL DEFAULT 0.0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_snapshot_pair_id ON equity_snapshot(pair_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                z_score REAL,
                hedge_ratio REAL,
                half_life REAL,
                adx REAL,
                rsi REAL,
                action TEXT,
                close_a REAL,
                close_b REAL,
                message TEXT,
                market_data TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_log_pair_id ON job_log(pair_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credential (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT 'default',
                exchange_host TEXT NOT NULL DEFAULT 'https://mainnet.zklighter.elliot.ai',
                api_key_index INTEGER NOT NULL DEFAULT 3,
                private_key_encrypted TEXT NOT NULL DEFAULT '',
                account_index INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                hashed_password TEXT NOT NULL,
                totp_secret TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Startup migrations: rename the obsolete `position_size` column to
    /// `position_size_pct` if it exists and the new one doesn't; the
    /// unique index on `open_position.pair_id` is created unconditionally
    /// above (idempotent via `IF NOT EXISTS`).
    async fn run_migrations(&self) -> Result<()> {
        let columns = sqlx::query("PRAGMA table_info(trading_pair)").fetch_all(&self.pool).await?;
        let has_old = columns.iter().any(|r| r.get::<String, _>("name") == "position_size");
        let has_new = columns.iter().any(|r| r.get::<String, _>("name") == "position_size_pct");

        if has_old && !has_new {
            info!("migrating trading_pair.position_size -> position_size_pct");
            sqlx::query("ALTER TABLE trading_pair RENAME COLUMN position_size TO position_size_pct")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    pub async fn get_pair(&self, pair_id: i64) -> Result<Option<TradingPair>> {
        let row = sqlx::query("SELECT * FROM trading_pair WHERE id = ?")
            .bind(pair_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_pair))
    }

    pub async fn get_enabled_pairs(&self) -> Result<Vec<TradingPair>> {
        let rows = sqlx::query("SELECT * FROM trading_pair WHERE is_enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_pair).collect())
    }

    pub async fn get_all_pairs(&self) -> Result<Vec<TradingPair>> {
        let rows = sqlx::query("SELECT * FROM trading_pair").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_pair).collect())
    }

    pub async fn insert_pair(&self, pair: &TradingPair) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trading_pair
                (name, asset_a, asset_b, market_a, market_b, is_enabled, entry_z, exit_z, stop_z,
                 window_interval, window_candles, train_interval, train_candles, max_half_life, max_adx,
                 rsi_period, rsi_upper, rsi_lower, stop_loss_pct, position_size_pct, tx_cost_bps,
                 leverage, min_equity_pct, twap_minutes, schedule_interval, current_equity, created_at, updated_at)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&pair.name)
        .bind(&pair.asset_a)
        .bind(&pair.asset_b)
        .bind(pair.market_a)
        .bind(pair.market_b)
        .bind(pair.enabled)
        .bind(pair.entry_z)
        .bind(pair.exit_z)
        .bind(pair.stop_z)
        .bind(&pair.window_interval)
        .bind(pair.window_candles)
        .bind(&pair.train_interval)
        .bind(pair.train_candles)
        .bind(pair.max_half_life)
        .bind(pair.max_adx)
        .bind(pair.rsi_period)
        .bind(pair.rsi_upper)
        .bind(pair.rsi_lower)
        .bind(pair.stop_loss_pct)
        .bind(pair.position_size_pct)
        .bind(pair.tx_cost_bps)
        .bind(pair.leverage)
        .bind(pair.min_equity_pct)
        .bind(pair.twap_minutes)
        .bind(&pair.schedule_interval)
        .bind(pair.current_equity)
        .bind(pair.created_at)
        .bind(pair.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_pair_equity(&self, pair_id: i64, equity: f64) -> Result<()> {
        sqlx::query("UPDATE trading_pair SET current_equity = ?, updated_at = ? WHERE id = ?")
            .bind(equity)
            .bind(Utc::now())
            .bind(pair_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn disable_all_pairs(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE trading_pair SET is_enabled = 0, updated_at = ? WHERE is_enabled = 1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_open_position(&self, pair_id: i64) -> Result<Option<OpenPosition>> {
        let row = sqlx::query("SELECT * FROM open_position WHERE pair_id = ?")
            .bind(pair_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_position))
    }

    pub async fn get_all_open_positions(&self) -> Result<Vec<OpenPosition>> {
        let rows = sqlx::query("SELECT * FROM open_position").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_position).collect())
    }

    pub async fn insert_open_position(&self, position: &OpenPosition) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO open_position
                (pair_id, direction, entry_z, entry_spread, entry_price_a, entry_price_b,
                 entry_hedge_ratio, entry_notional, entry_time, exchange_order_id_a, exchange_order_id_b)
            VALUES (?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(position.pair_id)
        .bind(position.direction)
        .bind(position.entry_z)
        .bind(position.entry_spread)
        .bind(position.entry_price_a)
        .bind(position.entry_price_b)
        .bind(position.entry_hedge_ratio)
        .bind(position.entry_notional)
        .bind(position.entry_time)
        .bind(&position.exchange_order_id_a)
        .bind(&position.exchange_order_id_b)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete_open_position(&self, pair_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM open_position WHERE pair_id = ?")
            .bind(pair_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persists a position close atomically: the closing `Trade` row, the
    /// pair's new `current_equity`, the resulting `EquitySnapshot`, and the
    /// `open_position` deletion all commit together or not at all, so a
    /// crash or error mid-write can never strand the DB with a trade
    /// recorded but the position still open (or vice versa).
    pub async fn record_position_close(&self, trade: &Trade, pair_id: i64, new_equity: f64, snapshot: &EquitySnapshot) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO trade
                (pair_id, direction, entry_time, exit_time, entry_price_a, exit_price_a,
                 entry_price_b, exit_price_b, size_a, size_b, hedge_ratio, pnl, pnl_pct,
                 exit_reason, duration_candles)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(trade.pair_id)
        .bind(&trade.direction)
        .bind(trade.entry_time)
        .bind(trade.exit_time)
        .bind(trade.entry_price_a)
        .bind(trade.exit_price_a)
        .bind(trade.entry_price_b)
        .bind(trade.exit_price_b)
        .bind(trade.size_a)
        .bind(trade.size_b)
        .bind(trade.hedge_ratio)
        .bind(trade.pnl)
        .bind(trade.pnl_pct)
        .bind(&trade.exit_reason)
        .bind(trade.duration_candles)
        .execute(&mut *tx)
        .await?;
        let trade_id = result.last_insert_rowid();

        sqlx::query("UPDATE trading_pair SET current_equity = ?, updated_at = ? WHERE id = ?")
            .bind(new_equity)
            .bind(Utc::now())
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO equity_snapshot (pair_id, timestamp, equity, drawdown_pct) VALUES (?,?,?,?)")
            .bind(snapshot.pair_id)
            .bind(snapshot.timestamp)
            .bind(snapshot.equity)
            .bind(snapshot.drawdown_pct)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM open_position WHERE pair_id = ?")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(trade_id)
    }

    pub async fn insert_job_log(&self, log: &JobLog) -> Result<i64> {
        let market_data = log.market_data.as_ref().map(|v| v.to_string());
        let result = sqlx::query(
            r#"
            INSERT INTO job_log
                (pair_id, timestamp, status, z_score, hedge_ratio, half_life, adx, rsi,
                 action, close_a, close_b, message, market_data)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(log.pair_id)
        .bind(log.timestamp)
        .bind(&log.status)
        .bind(crate::types::safe_float(log.z_score))
        .bind(crate::types::safe_float(log.hedge_ratio))
        .bind(crate::types::safe_float(log.half_life))
        .bind(crate::types::safe_float(log.adx))
        .bind(crate::types::safe_float(log.rsi))
        .bind(&log.action)
        .bind(crate::types::safe_float(log.close_a))
        .bind(crate::types::safe_float(log.close_b))
        .bind(&log.message)
        .bind(market_data)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_active_credential(&self) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credential WHERE is_active = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_credential))
    }
}

fn row_to_pair(row: sqlx::sqlite::SqliteRow) -> TradingPair {
    TradingPair {
        id: row.get("id"),
        name: row.get("name"),
        asset_a: row.get("asset_a"),
        asset_b: row.get("asset_b"),
        market_a: row.get("market_a"),
        market_b: row.get("market_b"),
        enabled: row.get::<i64, _>("is_enabled") != 0,
        entry_z: row.get("entry_z"),
        exit_z: row.get("exit_z"),
        stop_z: row.get("stop_z"),
        window_interval: row.get("window_interval"),
        window_candles: row.get("window_candles"),
        train_interval: row.get("train_interval"),
        train_candles: row.get("train_candles"),
        max_half_life: row.get("max_half_life"),
        max_adx: row.get("max_adx"),
        rsi_period: row.get("rsi_period"),
        rsi_upper: row.get("rsi_upper"),
        rsi_lower: row.get("rsi_lower"),
        stop_loss_pct: row.get("stop_loss_pct"),
        position_size_pct: row.get("position_size_pct"),
        tx_cost_bps: row.get("tx_cost_bps"),
        leverage: row.get("leverage"),
        min_equity_pct: row.get("min_equity_pct"),
        twap_minutes: row.get("twap_minutes"),
        schedule_interval: row.get("schedule_interval"),
        current_equity: row.get("current_equity"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn row_to_position(row: sqlx::sqlite::SqliteRow) -> OpenPosition {
    OpenPosition {
        id: row.get("id"),
        pair_id: row.get("pair_id"),
        direction: row.get("direction"),
        entry_z: row.get("entry_z"),
        entry_spread: row.get("entry_spread"),
        entry_price_a: row.get("entry_price_a"),
        entry_price_b: row.get("entry_price_b"),
        entry_hedge_ratio: row.get("entry_hedge_ratio"),
        entry_notional: row.get("entry_notional"),
        entry_time: row.get::<DateTime<Utc>, _>("entry_time"),
        exchange_order_id_a: row.get("exchange_order_id_a"),
        exchange_order_id_b: row.get("exchange_order_id_b"),
    }
}

fn row_to_credential(row: sqlx::sqlite::SqliteRow) -> Credential {
    Credential {
        id: row.get("id"),
        name: row.get("name"),
        exchange_host: row.get("exchange_host"),
        api_key_index: row.get("api_key_index"),
        private_key_encrypted: row.get("private_key_encrypted"),
        account_index: row.get("account_index"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn schema_creates_empty_tables() {
        let db = test_db().await;
        assert!(db.get_enabled_pairs().await.unwrap().is_empty());
        assert!(db.get_all_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_and_fetch_pair_round_trips() {
        let db = test_db().await;
        let pair = TradingPair::new("btc_eth", "BTC", "ETH");
        let id = db.insert_pair(&pair).await.unwrap();
        let fetched = db.get_pair(id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "btc_eth");
        assert_eq!(fetched.entry_z, 2.0);
    }

    #[tokio::test]
    async fn open_position_enforces_one_per_pair() {
        let db = test_db().await;
        let pair = TradingPair::new("btc_eth", "BTC", "ETH");
        let pair_id = db.insert_pair(&pair).await.unwrap();

        let direction = crate::types::Direction::LongSpread;
        let pos = OpenPosition::new(pair_id, direction, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();

        let duplicate = OpenPosition::new(pair_id, direction, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        let result = db.insert_open_position(&duplicate).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_open_position_clears_row() {
        let db = test_db().await;
        let pair = TradingPair::new("btc_eth", "BTC", "ETH");
        let pair_id = db.insert_pair(&pair).await.unwrap();
        let pos = OpenPosition::new(pair_id, crate::types::Direction::LongSpread, 2.1, 10.0, 100.0, 50.0, 1.0, 1000.0);
        db.insert_open_position(&pos).await.unwrap();
        db.delete_open_position(pair_id).await.unwrap();
        assert!(db.get_open_position(pair_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disable_all_pairs_affects_only_enabled() {
        let db = test_db().await;
        let pair = TradingPair::new("btc_eth", "BTC", "ETH");
        db.insert_pair(&pair).await.unwrap();
        let affected = db.disable_all_pairs().await.unwrap();
        assert_eq!(affected, 1);
        assert!(db.get_enabled_pairs().await.unwrap().is_empty());
    }
}
