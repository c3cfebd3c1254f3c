//! sqlx-backed implementations of the domain persistence ports (§6).
//! Decimal and enum columns round-trip through TEXT; `Position` is stored
//! as a JSON blob since the in-memory map is authoritative and this table
//! only needs to survive a restart, not be queried column-by-column.

use crate::domain::position::{Position, Side};
use crate::domain::repositories::{
    AiAnalysisRepository, AiAnalysisRow, MarketLogEntry, MarketLogRepository, OpenPositionsRepository, StrategyRecord,
    StrategyRepository, TradeHistoryEntry, TradeHistoryRepository, TradeSettings, TradeSettingsRepository,
};
use crate::domain::signal::{Action, Provenance};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

fn action_to_str(action: Action) -> &'static str {
    match action {
        Action::Buy => "Buy",
        Action::Sell => "Sell",
        Action::Wait => "Wait",
    }
}

fn action_from_str(s: &str) -> Action {
    match s {
        "Buy" => Action::Buy,
        "Sell" => Action::Sell,
        _ => Action::Wait,
    }
}

fn provenance_to_str(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::AdvisorOk => "AdvisorOk",
        Provenance::AdvisorFallback => "AdvisorFallback",
        Provenance::AdvisorError => "AdvisorError",
        Provenance::RuleTriggered => "RuleTriggered",
        Provenance::SynthOnly => "SynthOnly",
    }
}

fn provenance_from_str(s: &str) -> Provenance {
    match s {
        "AdvisorOk" => Provenance::AdvisorOk,
        "AdvisorFallback" => Provenance::AdvisorFallback,
        "AdvisorError" => Provenance::AdvisorError,
        "RuleTriggered" => Provenance::RuleTriggered,
        _ => Provenance::SynthOnly,
    }
}

pub struct SqliteMarketLogRepository {
    pool: SqlitePool,
}

impl SqliteMarketLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketLogRepository for SqliteMarketLogRepository {
    async fn append(&self, entry: &MarketLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_log (symbol, trend, structure, price, rsi, action, confidence, reason, provenance, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.symbol)
        .bind(&entry.trend)
        .bind(&entry.structure)
        .bind(entry.price.to_string())
        .bind(entry.rsi.to_string())
        .bind(action_to_str(entry.action))
        .bind(entry.confidence)
        .bind(&entry.reason)
        .bind(provenance_to_str(entry.provenance))
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .context("failed to append market_log row")?;
        Ok(())
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<MarketLogEntry>> {
        let rows = sqlx::query("SELECT * FROM market_log WHERE symbol = ? ORDER BY recorded_at DESC LIMIT ?")
            .bind(symbol)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let price: String = row.try_get("price")?;
            let rsi: String = row.try_get("rsi")?;
            let action: String = row.try_get("action")?;
            let provenance: String = row.try_get("provenance")?;
            entries.push(MarketLogEntry {
                symbol: row.try_get("symbol")?,
                trend: row.try_get("trend")?,
                structure: row.try_get("structure")?,
                price: Decimal::from_str(&price).unwrap_or_default(),
                rsi: Decimal::from_str(&rsi).unwrap_or_default(),
                action: action_from_str(&action),
                confidence: row.try_get("confidence")?,
                reason: row.try_get("reason")?,
                provenance: provenance_from_str(&provenance),
                recorded_at: row.try_get("recorded_at")?,
            });
        }
        Ok(entries)
    }
}

pub struct SqliteAiAnalysisRepository {
    pool: SqlitePool,
}

impl SqliteAiAnalysisRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AiAnalysisRepository for SqliteAiAnalysisRepository {
    async fn upsert(&self, row: &AiAnalysisRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_analysis (symbol, summary, confidence, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET summary = excluded.summary, confidence = excluded.confidence, updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.symbol)
        .bind(&row.summary)
        .bind(row.confidence)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert ai_analysis row")?;
        Ok(())
    }

    async fn get(&self, symbol: &str) -> Result<Option<AiAnalysisRow>> {
        let row = sqlx::query("SELECT * FROM ai_analysis WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(AiAnalysisRow {
                symbol: row.try_get("symbol")?,
                summary: row.try_get("summary")?,
                confidence: row.try_get("confidence")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }
}

pub struct SqliteTradeHistoryRepository {
    pool: SqlitePool,
}

impl SqliteTradeHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeHistoryRepository for SqliteTradeHistoryRepository {
    async fn record(&self, entry: &TradeHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_history (symbol, side, size, price, order_id, status, pnl, fees, notes, execution_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.symbol)
        .bind(&entry.side)
        .bind(entry.size.to_string())
        .bind(entry.price.to_string())
        .bind(&entry.order_id)
        .bind(&entry.status)
        .bind(entry.pnl.map(|d| d.to_string()))
        .bind(entry.fees.map(|d| d.to_string()))
        .bind(&entry.notes)
        .bind(entry.execution_time)
        .execute(&self.pool)
        .await
        .context("failed to record trade_history row")?;
        info!("recorded trade {} {}", entry.symbol, entry.order_id);
        Ok(())
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<TradeHistoryEntry>> {
        let rows = sqlx::query("SELECT * FROM trade_history WHERE symbol = ? ORDER BY execution_time DESC")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let size: String = row.try_get("size")?;
            let price: String = row.try_get("price")?;
            let pnl: Option<String> = row.try_get("pnl")?;
            let fees: Option<String> = row.try_get("fees")?;
            entries.push(TradeHistoryEntry {
                symbol: row.try_get("symbol")?,
                side: row.try_get("side")?,
                size: Decimal::from_str(&size).unwrap_or_default(),
                price: Decimal::from_str(&price).unwrap_or_default(),
                order_id: row.try_get("order_id")?,
                status: row.try_get("status")?,
                pnl: pnl.and_then(|s| Decimal::from_str(&s).ok()),
                fees: fees.and_then(|s| Decimal::from_str(&s).ok()),
                notes: row.try_get("notes")?,
                execution_time: row.try_get("execution_time")?,
            });
        }
        Ok(entries)
    }
}

pub struct SqliteOpenPositionsRepository {
    pool: SqlitePool,
}

impl SqliteOpenPositionsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

#[async_trait]
impl OpenPositionsRepository for SqliteOpenPositionsRepository {
    async fn upsert(&self, position: &Position) -> Result<()> {
        let position_json = serde_json::to_string(position).context("failed to serialize position")?;
        sqlx::query(
            r#"
            INSERT INTO open_positions (symbol, side, position_json)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol, side) DO UPDATE SET position_json = excluded.position_json
            "#,
        )
        .bind(&position.symbol)
        .bind(side_str(position.side))
        .bind(position_json)
        .execute(&self.pool)
        .await
        .context("failed to upsert open_positions row")?;
        Ok(())
    }

    async fn delete(&self, symbol: &str, side: &str) -> Result<()> {
        sqlx::query("DELETE FROM open_positions WHERE symbol = ? AND side = ?")
            .bind(symbol)
            .bind(side)
            .execute(&self.pool)
            .await
            .context("failed to delete open_positions row")?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT position_json FROM open_positions").fetch_all(&self.pool).await?;
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.try_get("position_json")?;
            positions.push(serde_json::from_str(&json).context("failed to deserialize position")?);
        }
        Ok(positions)
    }
}

pub struct SqliteStrategyRepository {
    pool: SqlitePool,
}

impl SqliteStrategyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyRepository for SqliteStrategyRepository {
    async fn create(&self, strategy: &StrategyRecord) -> Result<()> {
        sqlx::query("INSERT INTO strategies (id, name, rules_json, active) VALUES (?, ?, ?, ?)")
            .bind(&strategy.id)
            .bind(&strategy.name)
            .bind(&strategy.rules_json)
            .bind(strategy.active)
            .execute(&self.pool)
            .await
            .context("failed to create strategy")?;
        Ok(())
    }

    async fn update(&self, strategy: &StrategyRecord) -> Result<()> {
        sqlx::query("UPDATE strategies SET name = ?, rules_json = ?, active = ? WHERE id = ?")
            .bind(&strategy.name)
            .bind(&strategy.rules_json)
            .bind(strategy.active)
            .bind(&strategy.id)
            .execute(&self.pool)
            .await
            .context("failed to update strategy")?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM strategies WHERE id = ?").bind(id).execute(&self.pool).await.context("failed to delete strategy")?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StrategyRecord>> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(StrategyRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                rules_json: row.try_get("rules_json")?,
                active: row.try_get("active")?,
            })),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<StrategyRecord>> {
        let rows = sqlx::query("SELECT * FROM strategies").fetch_all(&self.pool).await?;
        let mut strategies = Vec::with_capacity(rows.len());
        for row in rows {
            strategies.push(StrategyRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                rules_json: row.try_get("rules_json")?,
                active: row.try_get("active")?,
            });
        }
        Ok(strategies)
    }
}

pub struct SqliteTradeSettingsRepository {
    pool: SqlitePool,
}

impl SqliteTradeSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeSettingsRepository for SqliteTradeSettingsRepository {
    async fn get(&self) -> Result<TradeSettings> {
        let row = sqlx::query("SELECT * FROM trade_settings WHERE id = 1").fetch_one(&self.pool).await.context("failed to read trade_settings")?;
        Ok(TradeSettings {
            auto_trading: row.try_get("auto_trading")?,
            risk_tolerance: row.try_get("risk_tolerance")?,
            current_symbol: row.try_get("current_symbol")?,
        })
    }

    async fn set(&self, settings: &TradeSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_settings (id, auto_trading, risk_tolerance, current_symbol)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET auto_trading = excluded.auto_trading, risk_tolerance = excluded.risk_tolerance, current_symbol = excluded.current_symbol
            "#,
        )
        .bind(settings.auto_trading)
        .bind(settings.risk_tolerance)
        .bind(&settings.current_symbol)
        .execute(&self.pool)
        .await
        .context("failed to write trade_settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{PositionDirection, PositionSource};
    use crate::infrastructure::persistence::database::Database;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn memory_pool() -> SqlitePool {
        Database::new("sqlite::memory:").await.unwrap().pool
    }

    #[tokio::test]
    async fn market_log_append_and_recent_round_trip() {
        let pool = memory_pool().await;
        let repo = SqliteMarketLogRepository::new(pool);
        let entry = MarketLogEntry {
            symbol: "cmt_btcusdt".into(),
            trend: "Bullish".into(),
            structure: "HigherHighs".into(),
            price: dec!(50000),
            rsi: dec!(55),
            action: Action::Buy,
            confidence: 72.0,
            reason: "rule:rsi-bounce".into(),
            provenance: Provenance::RuleTriggered,
            recorded_at: Utc::now(),
        };
        repo.append(&entry).await.unwrap();
        let recent = repo.recent("cmt_btcusdt", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, Action::Buy);
        assert_eq!(recent[0].provenance, Provenance::RuleTriggered);
    }

    #[tokio::test]
    async fn open_positions_upsert_then_delete() {
        let pool = memory_pool().await;
        let repo = SqliteOpenPositionsRepository::new(pool);
        let position = Position::open(
            "cmt_btcusdt".into(),
            Side::Buy,
            PositionDirection::Long,
            dec!(1),
            dec!(100),
            dec!(98),
            dec!(104),
            10,
            dec!(1),
            "order-1".into(),
            PositionSource::Sentinel,
            Utc::now(),
        )
        .unwrap();
        repo.upsert(&position).await.unwrap();
        assert_eq!(repo.all().await.unwrap().len(), 1);
        repo.delete("cmt_btcusdt", "Buy").await.unwrap();
        assert_eq!(repo.all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn trade_settings_defaults_then_set() {
        let pool = memory_pool().await;
        let repo = SqliteTradeSettingsRepository::new(pool);
        let defaults = repo.get().await.unwrap();
        assert!(!defaults.auto_trading);
        repo.set(&TradeSettings {
            auto_trading: true,
            risk_tolerance: 40.0,
            current_symbol: "cmt_ethusdt".into(),
        })
        .await
        .unwrap();
        let updated = repo.get().await.unwrap();
        assert!(updated.auto_trading);
        assert_eq!(updated.current_symbol, "cmt_ethusdt");
    }
}
