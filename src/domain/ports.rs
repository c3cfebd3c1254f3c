//! Trait contracts for the two external collaborators the core depends on:
//! the exchange (C1) and the advisor. Both are typed interfaces only — the
//! concrete HTTP clients live in infrastructure and are swappable in tests.

use crate::domain::candle::Candle;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub client_oid: Option<String>,
    pub preset_take_profit: Option<Decimal>,
    pub preset_stop_loss: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderResponse {
    pub code: String,
    pub msg: String,
    pub order_id: Option<String>,
}

impl PlaceOrderResponse {
    /// The exchange's own "success" sentinel code, e.g. `"00000"`.
    pub fn is_success(&self, success_code: &str) -> bool {
        self.code == success_code
    }
}

#[derive(Debug, Clone)]
pub struct CancelOrderResponse {
    pub code: String,
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub coin_name: String,
    pub available: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExchangePositionRecord {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
}

/// C1: signed REST calls against the exchange. Every method returns a typed
/// result or error; none of them is permitted to panic across the boundary.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_candles(&self, symbol: &str, interval_code: &str, limit: usize) -> anyhow::Result<Vec<Candle>>;
    async fn get_assets(&self) -> anyhow::Result<Vec<AssetBalance>>;
    async fn place_order(&self, request: PlaceOrderRequest) -> anyhow::Result<PlaceOrderResponse>;
    async fn cancel_order(&self, order_id: &str, symbol: Option<&str>) -> anyhow::Result<CancelOrderResponse>;
    async fn list_positions(&self) -> anyhow::Result<Vec<ExchangePositionRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvisorAction {
    Buy,
    Sell,
    Wait,
}

#[derive(Debug, Clone)]
pub struct AdvisorResponse {
    pub decision: AdvisorAction,
    pub confidence: i32,
    pub reasoning: String,
}

/// Best-effort policy input, not a dependency: every synthesizer path has a
/// deterministic fallback when this call errors or times out.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, prompt: &str) -> anyhow::Result<AdvisorResponse>;
}
