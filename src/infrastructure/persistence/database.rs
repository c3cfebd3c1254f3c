//! SQLite-backed store (§6 persistence). Schema mirrors the six tables the
//! core requires: `market_log`, `ai_analysis`, `trade_history`,
//! `open_positions`, `strategies`, `trade_settings`.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent).await.context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!("connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                trend TEXT NOT NULL,
                structure TEXT NOT NULL,
                price TEXT NOT NULL,
                rsi TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                reason TEXT NOT NULL,
                provenance TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_market_log_symbol_time ON market_log (symbol, recorded_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create market_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_analysis (
                symbol TEXT PRIMARY KEY,
                summary TEXT NOT NULL,
                confidence REAL NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create ai_analysis table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                price TEXT NOT NULL,
                order_id TEXT NOT NULL,
                status TEXT NOT NULL,
                pnl TEXT,
                fees TEXT,
                notes TEXT,
                execution_time TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trade_history_symbol ON trade_history (symbol);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS open_positions (
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                position_json TEXT NOT NULL,
                PRIMARY KEY (symbol, side)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create open_positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rules_json TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create strategies table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                auto_trading BOOLEAN NOT NULL DEFAULT 0,
                risk_tolerance REAL NOT NULL DEFAULT 50.0,
                current_symbol TEXT NOT NULL DEFAULT 'cmt_btcusdt'
            );
            INSERT OR IGNORE INTO trade_settings (id, auto_trading, risk_tolerance, current_symbol)
            VALUES (1, 0, 50.0, 'cmt_btcusdt');
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_settings table")?;

        info!("database schema initialized");
        Ok(())
    }
}
