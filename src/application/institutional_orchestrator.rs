//! C13: the systematic scan-and-enter cycle, run every 30s while enabled.
//! With any position open it defers entirely to the position monitor;
//! otherwise it scores every enabled symbol and enters the best one that
//! clears both the opportunity threshold and the risk gate.

use crate::application::intraday_scoring::score_signal;
use crate::application::market_data_service::MarketDataService;
use crate::application::risk_manager::RiskManager;
use crate::application::safety_layer::{SafetyLayer, TradeCandidate};
use crate::application::position_manager::PositionManager;
use crate::domain::candle::CandleSeries;
use crate::domain::errors::MarketDataError;
use crate::domain::indicators::{self, IndicatorState};
use crate::domain::ports::{ExchangeGateway, OrderSide, OrderType, PlaceOrderRequest};
use crate::domain::position::{PortfolioState, PositionDirection, PositionSource};
use crate::domain::regime::{self, RegimeState};
use crate::domain::signal::{Direction, Signal, SignalKind};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const MIN_CANDLES: usize = 500;
const CANDLE_INTERVAL: &str = "1m";
const MIN_OPPORTUNITY_SCORE: f64 = 25.0;

#[derive(Debug, Clone)]
pub struct InstitutionalSettings {
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Disabled,
    ManagingExistingPosition,
    NoCandidateAboveThreshold,
    SafetyRejected(Vec<String>),
    RiskRejected(String),
    OrderFailed(String),
    Opened { symbol: String, direction: PositionDirection },
}

struct ScoredCandidate {
    symbol: String,
    opportunity_score: f64,
    state: IndicatorState,
    signal: Signal,
}

fn returns_from(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0].abs() > 1e-9 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// `score = 0.30 trend + 0.25 momentum + 0.15 volatility + 0.15 funding
/// + 0.10 orderbook - 0.05 riskPenalty`, each term scaled to [0,100].
/// Funding, open interest, and orderbook imbalance are unavailable from
/// this gateway and contribute 0.
fn symbol_score(state: &IndicatorState, bb_width_history: &[f64], returns: &[f64], regime_confidence: f64) -> f64 {
    let adx = state.adx.to_f64().unwrap_or(0.0);
    let trend = (adx / 50.0 * 100.0).min(100.0);

    let macd_hist = state.macd_hist.to_f64().unwrap_or(0.0);
    let momentum = (macd_hist.abs() * 200.0).min(100.0);

    let vol = if returns.len() >= 2 {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    } else {
        0.0
    };
    let volatility = (vol / 0.06 * 100.0).min(100.0);
    let _ = bb_width_history;

    let funding_pressure = 0.0;
    let orderbook_imbalance = 0.0;

    // regime_confidence is 0-100; a low-confidence regime read is itself a risk signal.
    let risk_penalty = (100.0 - regime_confidence).clamp(0.0, 100.0);

    0.30 * trend + 0.25 * momentum + 0.15 * volatility + 0.15 * funding_pressure + 0.10 * orderbook_imbalance - 0.05 * risk_penalty
}

pub struct InstitutionalOrchestrator {
    exchange: Arc<dyn ExchangeGateway>,
    market_data: MarketDataService,
    risk: Arc<RiskManager>,
    safety: Arc<SafetyLayer>,
    positions: Arc<PositionManager>,
    portfolio: Arc<Mutex<PortfolioState>>,
}

impl InstitutionalOrchestrator {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        risk: Arc<RiskManager>,
        safety: Arc<SafetyLayer>,
        positions: Arc<PositionManager>,
        portfolio: Arc<Mutex<PortfolioState>>,
    ) -> Self {
        Self {
            market_data: MarketDataService::new(exchange.clone()),
            exchange,
            risk,
            safety,
            positions,
            portfolio,
        }
    }

    async fn fetch_state(&self, symbol: &str) -> Result<(IndicatorState, CandleSeries), MarketDataError> {
        let series = self.market_data.fetch_series(symbol, CANDLE_INTERVAL, MIN_CANDLES).await;
        if series.len() < MIN_CANDLES {
            return Err(MarketDataError::InsufficientData { have: series.len(), need: MIN_CANDLES });
        }
        let state = indicators::compute(&series)?;
        Ok((state, series))
    }

    async fn score_candidate(&self, symbol: &str) -> Option<ScoredCandidate> {
        let (state, series) = self.fetch_state(symbol).await.ok()?;
        let closes: Vec<f64> = series.closes().iter().filter_map(|c| c.to_f64()).collect();
        let returns = returns_from(&closes);
        let bb_width_history: Vec<f64> = std::iter::repeat(state.bb_width.to_f64().unwrap_or(0.0)).take(20).collect();
        let ema21_history: Vec<f64> = closes.iter().rev().take(21).rev().copied().collect();
        let adx_history = vec![state.adx.to_f64().unwrap_or(0.0); 3];

        let regime: RegimeState = regime::detect(&state, &bb_width_history, &returns);
        let signal = score_signal(&series.candles, &state, &bb_width_history, &ema21_history, &adx_history);

        let signal_allowed = matches!(signal.kind, SignalKind::None) || regime.allowed.contains(&signal.kind);
        if !signal_allowed {
            return None;
        }

        let base = symbol_score(&state, &bb_width_history, &returns, regime.confidence);
        let opportunity_score = 0.5 * base + 0.5 * signal.strength;

        Some(ScoredCandidate { symbol: symbol.to_string(), opportunity_score, state, signal })
    }

    pub async fn run_cycle(&self, settings: &InstitutionalSettings) -> Result<CycleOutcome, MarketDataError> {
        if !settings.enabled {
            return Ok(CycleOutcome::Disabled);
        }

        let has_open_position = {
            let portfolio = self.portfolio.lock().await;
            !portfolio.positions.is_empty()
        };
        if has_open_position {
            let prices: std::collections::HashMap<String, Decimal> = {
                let mut map = std::collections::HashMap::new();
                let symbols: Vec<String> = self.portfolio.lock().await.positions.keys().cloned().collect();
                for symbol in symbols {
                    if let Ok((state, _)) = self.fetch_state(&symbol).await {
                        map.insert(symbol, state.price);
                    }
                }
                map
            };
            let to_close = self.positions.monitor_tick(&prices).await;
            for (symbol, reason) in to_close {
                let _ = self.positions.close(&symbol, reason).await;
            }
            return Ok(CycleOutcome::ManagingExistingPosition);
        }

        let mut candidates = Vec::new();
        for symbol in &settings.symbols {
            if let Some(candidate) = self.score_candidate(symbol).await {
                candidates.push(candidate);
            }
        }
        candidates.sort_by(|a, b| b.opportunity_score.partial_cmp(&a.opportunity_score).unwrap_or(std::cmp::Ordering::Equal));

        for candidate in candidates {
            if candidate.opportunity_score < MIN_OPPORTUNITY_SCORE {
                continue;
            }
            let direction = match candidate.signal.direction {
                Direction::Long => PositionDirection::Long,
                Direction::Short => PositionDirection::Short,
                Direction::Neutral => continue,
            };

            let can_open = {
                let portfolio = self.portfolio.lock().await;
                let sized = self.risk.size_position(
                    direction,
                    candidate.state.price,
                    candidate.state.atr,
                    portfolio.current_equity,
                    portfolio.current_equity - portfolio.aggregate_margin(),
                    settings.leverage,
                );
                let check = self.risk.can_open_position(&portfolio, &candidate.symbol, sized.margin_required);
                check.map(|_| sized)
            };
            let sized = match can_open {
                Ok(sized) => sized,
                Err(e) => {
                    info!(symbol = %candidate.symbol, error = %e, "institutional candidate rejected by risk manager");
                    continue;
                }
            };

            let trade_candidate = TradeCandidate {
                symbol: &candidate.symbol,
                direction,
                entry: candidate.state.price,
                stop_loss: sized.stop_loss,
                take_profit: sized.take_profit,
                size: sized.size,
                leverage: settings.leverage,
                margin_required: sized.margin_required,
            };
            let available_margin = {
                let portfolio = self.portfolio.lock().await;
                portfolio.current_equity - portfolio.aggregate_margin()
            };
            let (ok, results) = {
                let portfolio = self.portfolio.lock().await;
                self.safety.validate_trade(&trade_candidate, &portfolio, available_margin, &self.risk.config)
            };
            if !ok {
                let reasons = results.into_iter().filter(|r| !r.passed).map(|r| r.name.to_string()).collect();
                return Ok(CycleOutcome::SafetyRejected(reasons));
            }

            let order_side = match direction {
                PositionDirection::Long => OrderSide::Buy,
                PositionDirection::Short => OrderSide::Sell,
            };
            let build_request = || PlaceOrderRequest {
                symbol: candidate.symbol.clone(),
                side: order_side,
                order_type: OrderType::Market,
                size: sized.size,
                price: None,
                client_oid: None,
                preset_take_profit: Some(sized.take_profit),
                preset_stop_loss: Some(sized.stop_loss),
            };
            let response = match crate::application::position_manager::place_order_with_retry(&self.exchange, &candidate.symbol, build_request).await {
                Ok(r) => r,
                Err(e) => return Ok(CycleOutcome::OrderFailed(e.to_string())),
            };
            let order_id = response.order_id.unwrap_or_default();

            self.positions
                .open(
                    &candidate.symbol,
                    direction,
                    sized.size,
                    candidate.state.price,
                    sized.stop_loss,
                    sized.take_profit,
                    settings.leverage,
                    candidate.state.atr,
                    order_id,
                    PositionSource::Institutional,
                )
                .await
                .map_err(|e| MarketDataError::RequestFailed { reason: e.to_string() })?;

            return Ok(CycleOutcome::Opened { symbol: candidate.symbol, direction });
        }

        Ok(CycleOutcome::NoCandidateAboveThreshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::ports::{AssetBalance, CancelOrderResponse, ExchangePositionRecord, PlaceOrderResponse};
    use crate::domain::risk::config::RiskConfig;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FlatExchange;
    #[async_trait]
    impl ExchangeGateway for FlatExchange {
        async fn fetch_candles(&self, _symbol: &str, _interval_code: &str, limit: usize) -> anyhow::Result<Vec<Candle>> {
            Ok((0..limit.max(MIN_CANDLES))
                .map(|i| Candle {
                    open_time: i as i64,
                    open: dec!(100),
                    high: dec!(100.5),
                    low: dec!(99.5),
                    close: dec!(100),
                    volume: dec!(10),
                })
                .collect())
        }
        async fn get_assets(&self) -> anyhow::Result<Vec<AssetBalance>> {
            Ok(vec![AssetBalance { coin_name: "USDT".into(), available: dec!(1000) }])
        }
        async fn place_order(&self, _request: PlaceOrderRequest) -> anyhow::Result<PlaceOrderResponse> {
            Ok(PlaceOrderResponse { code: "00000".into(), msg: "ok".into(), order_id: Some("o1".into()) })
        }
        async fn cancel_order(&self, _order_id: &str, _symbol: Option<&str>) -> anyhow::Result<CancelOrderResponse> {
            Ok(CancelOrderResponse { code: "00000".into(), msg: "ok".into() })
        }
        async fn list_positions(&self) -> anyhow::Result<Vec<ExchangePositionRecord>> {
            Ok(vec![])
        }
    }

    fn orchestrator() -> InstitutionalOrchestrator {
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(FlatExchange);
        let risk = Arc::new(RiskManager::new(RiskConfig::default()));
        let safety = Arc::new(SafetyLayer::new());
        let portfolio = Arc::new(Mutex::new(PortfolioState::new(dec!(10000), chrono::Utc::now().date_naive())));
        let positions = Arc::new(PositionManager::new(portfolio.clone(), exchange.clone(), risk.clone()));
        InstitutionalOrchestrator::new(exchange, risk, safety, positions, portfolio)
    }

    #[tokio::test]
    async fn disabled_short_circuits() {
        let orch = orchestrator();
        let settings = InstitutionalSettings { enabled: false, symbols: vec!["cmt_btcusdt".into()], leverage: 5 };
        let outcome = orch.run_cycle(&settings).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Disabled);
    }

    #[tokio::test]
    async fn flat_market_yields_no_candidate_above_threshold() {
        let orch = orchestrator();
        let settings = InstitutionalSettings { enabled: true, symbols: vec!["cmt_btcusdt".into()], leverage: 5 };
        let outcome = orch.run_cycle(&settings).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoCandidateAboveThreshold);
    }
}
