//! Persistence ports (§6): the core depends on these traits only, never on
//! a concrete store. Every method returns a typed result; a store outage
//! degrades the caller to `StoreUnavailable`, never a panic.

use crate::domain::position::Position;
use crate::domain::signal::{Action, Provenance};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One append-only audit row per synthesized decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketLogEntry {
    pub symbol: String,
    pub trend: String,
    pub structure: String,
    pub price: Decimal,
    pub rsi: Decimal,
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub provenance: Provenance,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait MarketLogRepository: Send + Sync {
    async fn append(&self, entry: &MarketLogEntry) -> Result<()>;
    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<MarketLogEntry>>;
}

/// One-row-per-symbol AI analysis snapshot, upserted each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisRow {
    pub symbol: String,
    pub summary: String,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait AiAnalysisRepository: Send + Sync {
    async fn upsert(&self, row: &AiAnalysisRow) -> Result<()>;
    async fn get(&self, symbol: &str) -> Result<Option<AiAnalysisRow>>;
}

/// Append-only executed-trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeHistoryEntry {
    pub symbol: String,
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
    pub order_id: String,
    pub status: String,
    pub pnl: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub notes: Option<String>,
    pub execution_time: DateTime<Utc>,
}

#[async_trait]
pub trait TradeHistoryRepository: Send + Sync {
    async fn record(&self, entry: &TradeHistoryEntry) -> Result<()>;
    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<TradeHistoryEntry>>;
}

/// Mirror of the in-memory position map, keyed by `(symbol, side)`. The
/// in-memory map is authoritative; this table exists so an operator can
/// inspect state after a restart, not as a source of truth at runtime.
#[async_trait]
pub trait OpenPositionsRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> Result<()>;
    async fn delete(&self, symbol: &str, side: &str) -> Result<()>;
    async fn all(&self) -> Result<Vec<Position>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: String,
    pub name: String,
    pub rules_json: String,
    pub active: bool,
}

#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn create(&self, strategy: &StrategyRecord) -> Result<()>;
    async fn update(&self, strategy: &StrategyRecord) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<StrategyRecord>>;
    async fn list(&self) -> Result<Vec<StrategyRecord>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSettings {
    pub auto_trading: bool,
    pub risk_tolerance: f64,
    pub current_symbol: String,
}

#[async_trait]
pub trait TradeSettingsRepository: Send + Sync {
    async fn get(&self) -> Result<TradeSettings>;
    async fn set(&self, settings: &TradeSettings) -> Result<()>;
}
