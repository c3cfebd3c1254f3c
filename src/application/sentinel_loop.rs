//! C12: the discretionary trading cycle, run every 30s while enabled and
//! the advisor is not in cooldown. Each step can short-circuit the cycle;
//! `run_cycle` returns which step produced the outcome so callers (and
//! tests) can assert on it without parsing log lines.

use crate::application::market_data_service::MarketDataService;
use crate::application::risk_manager::RiskManager;
use crate::application::safety_layer::{SafetyLayer, TradeCandidate};
use crate::application::signal_synthesizer::{AdvisorGate, sentinel_decision};
use crate::domain::classifier::{Classifier, Direction as ClassifierDirection};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::{ExchangeGateway, OrderSide, OrderType, PlaceOrderRequest};
use crate::domain::position::{PortfolioState, PositionDirection, PositionSource};
use crate::domain::rules::Rule;
use crate::domain::signal::{Action, Decision};
use crate::{application::position_manager::PositionManager, application::sentiment_service::SentimentService};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use rust_decimal_macros::dec;
use tracing::{info, warn};

const MIN_CANDLES: usize = 500;
const CANDLE_INTERVAL: &str = "1m";
const QUOTE_ASSET: &str = "USDT";
/// Minimal notional floor used when the balance lookup itself fails, so a
/// transient balance-API outage degrades to a tiny position instead of
/// blocking the cycle entirely.
const MIN_NOTIONAL_FLOOR: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
pub struct SentinelSettings {
    pub auto_trading: bool,
    pub risk_tolerance: f64,
    pub current_symbol: String,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Disabled,
    InsufficientCandles,
    ConfidenceBelowThreshold,
    RsiGuardRejected,
    ClassifierConfluenceMiss,
    InsufficientBalance,
    PositionAlreadyOpen,
    SafetyRejected(Vec<String>),
    OrderFailed(String),
    Opened { symbol: String, action: Action },
}

pub struct SentinelLoop {
    exchange: Arc<dyn ExchangeGateway>,
    market_data: MarketDataService,
    classifier: Arc<dyn Classifier>,
    sentiment: Arc<SentimentService>,
    advisor_gate: Arc<AdvisorGate>,
    risk: Arc<RiskManager>,
    safety: Arc<SafetyLayer>,
    positions: Arc<PositionManager>,
    portfolio: Arc<Mutex<PortfolioState>>,
    rules: Arc<RwLock<Vec<Rule>>>,
}

impl SentinelLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        classifier: Arc<dyn Classifier>,
        sentiment: Arc<SentimentService>,
        advisor_gate: Arc<AdvisorGate>,
        risk: Arc<RiskManager>,
        safety: Arc<SafetyLayer>,
        positions: Arc<PositionManager>,
        portfolio: Arc<Mutex<PortfolioState>>,
        rules: Arc<RwLock<Vec<Rule>>>,
    ) -> Self {
        Self {
            market_data: MarketDataService::new(exchange.clone()),
            exchange,
            classifier,
            sentiment,
            advisor_gate,
            risk,
            safety,
            positions,
            portfolio,
            rules,
        }
    }

    pub async fn run_cycle(&self, settings: &SentinelSettings) -> Result<CycleOutcome, MarketDataError> {
        if !settings.auto_trading {
            return Ok(CycleOutcome::Disabled);
        }
        let symbol = settings.current_symbol.as_str();

        let series = self.market_data.fetch_series(symbol, CANDLE_INTERVAL, MIN_CANDLES).await;
        if series.len() < MIN_CANDLES {
            return Ok(CycleOutcome::InsufficientCandles);
        }
        let state = crate::domain::indicators::compute(&series)?;

        let classifier_pred = self.classifier.predict(&series);
        let sentiment = self.sentiment.sentiment(symbol).await;
        let rules = self.rules.read().await.clone();

        let decision: Decision = sentinel_decision(
            symbol,
            &state,
            &rules,
            classifier_pred.clone(),
            Some(sentiment),
            &self.advisor_gate,
            chrono::Utc::now(),
        )
        .await;

        info!(
            symbol,
            action = ?decision.action,
            confidence = decision.confidence,
            reason = %decision.reason,
            provenance = ?decision.provenance,
            "sentinel decision synthesized"
        );

        if !matches!(decision.action, Action::Buy | Action::Sell) {
            return Ok(CycleOutcome::ConfidenceBelowThreshold);
        }
        let confidence_floor = 90.0 - settings.risk_tolerance;
        if decision.confidence < confidence_floor {
            return Ok(CycleOutcome::ConfidenceBelowThreshold);
        }

        let rsi = state.rsi.to_f64().unwrap_or(50.0);
        if (decision.action == Action::Buy && rsi > 70.0) || (decision.action == Action::Sell && rsi < 30.0) {
            return Ok(CycleOutcome::RsiGuardRejected);
        }

        if let Some(pred) = &classifier_pred {
            let agrees = match (decision.action, pred.direction) {
                (Action::Buy, ClassifierDirection::Up) => true,
                (Action::Sell, ClassifierDirection::Down) => true,
                _ => false,
            };
            if !agrees {
                info!(symbol, action = ?decision.action, classifier_direction = ?pred.direction, "Confluence check failed");
                return Ok(CycleOutcome::ClassifierConfluenceMiss);
            }
        }

        let balance = match self.exchange.get_assets().await {
            Ok(assets) => assets
                .iter()
                .find(|a| a.coin_name.eq_ignore_ascii_case(QUOTE_ASSET))
                .map(|a| a.available)
                .unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!(symbol, "balance lookup failed, falling back to minimal notional floor: {}", e);
                MIN_NOTIONAL_FLOOR
            }
        };

        let notional = if balance <= MIN_NOTIONAL_FLOOR {
            MIN_NOTIONAL_FLOOR
        } else {
            (balance * Decimal::from_f64(0.03).unwrap()).max(Decimal::from(5)).min(Decimal::from(30))
        };
        if notional > balance {
            return Ok(CycleOutcome::InsufficientBalance);
        }
        let min_size = crate::domain::risk::correlation::min_order_size(symbol).unwrap_or(Decimal::ZERO);
        let size = (notional / state.price).round_dp(4);
        if size < min_size {
            return Ok(CycleOutcome::InsufficientBalance);
        }

        if self.positions.has_position(symbol).await {
            return Ok(CycleOutcome::PositionAlreadyOpen);
        }

        let direction = if decision.action == Action::Buy {
            PositionDirection::Long
        } else {
            PositionDirection::Short
        };
        let (stop_loss, take_profit) = self.risk.stop_and_target(direction, state.price, state.atr);

        let margin_required = size * state.price / Decimal::from(settings.leverage.max(1));
        let candidate = TradeCandidate {
            symbol,
            direction,
            entry: state.price,
            stop_loss,
            take_profit,
            size,
            leverage: settings.leverage,
            margin_required,
        };
        let portfolio_snapshot = self.portfolio.lock().await;
        let (ok, results) = self
            .safety
            .validate_trade(&candidate, &portfolio_snapshot, balance, &self.risk.config);
        drop(portfolio_snapshot);
        if !ok {
            let reasons = results.into_iter().filter(|r| !r.passed).map(|r| r.name.to_string()).collect();
            return Ok(CycleOutcome::SafetyRejected(reasons));
        }

        let order_side = if decision.action == Action::Buy { OrderSide::Buy } else { OrderSide::Sell };
        let build_request = || PlaceOrderRequest {
            symbol: symbol.to_string(),
            side: order_side,
            order_type: OrderType::Market,
            size,
            price: None,
            client_oid: None,
            preset_take_profit: Some(take_profit),
            preset_stop_loss: Some(stop_loss),
        };
        let response = match crate::application::position_manager::place_order_with_retry(&self.exchange, symbol, build_request).await {
            Ok(r) => r,
            Err(e) => return Ok(CycleOutcome::OrderFailed(e.to_string())),
        };
        let order_id = response.order_id.unwrap_or_default();

        self.positions
            .open(
                symbol,
                direction,
                size,
                state.price,
                stop_loss,
                take_profit,
                settings.leverage,
                state.atr,
                order_id,
                PositionSource::Sentinel,
            )
            .await
            .map_err(|e| MarketDataError::RequestFailed { reason: e.to_string() })?;

        Ok(CycleOutcome::Opened {
            symbol: symbol.to_string(),
            action: decision.action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::{Candle, CandleSource};
    use crate::domain::classifier::ClassifierPrediction;
    use crate::domain::ports::{AssetBalance, CancelOrderResponse, ExchangePositionRecord, PlaceOrderResponse};
    use crate::domain::risk::config::RiskConfig;
    use crate::domain::sentiment::{Sentiment, SentimentProvider};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FakeExchange {
        candles: usize,
    }

    #[async_trait]
    impl ExchangeGateway for FakeExchange {
        async fn fetch_candles(&self, _symbol: &str, _interval_code: &str, _limit: usize) -> anyhow::Result<Vec<Candle>> {
            Ok((0..self.candles)
                .map(|i| Candle {
                    open_time: i as i64,
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
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

    struct UntrainedClassifier;
    impl Classifier for UntrainedClassifier {
        fn predict(&self, _series: &CandleSeries) -> Option<ClassifierPrediction> {
            None
        }
    }

    struct NeutralSentiment;
    #[async_trait]
    impl SentimentProvider for NeutralSentiment {
        async fn fetch_sentiment(&self, _symbol: &str) -> anyhow::Result<Sentiment> {
            Ok(Sentiment::neutral_fallback())
        }
    }

    struct FailingAssetsExchange;
    #[async_trait]
    impl ExchangeGateway for FailingAssetsExchange {
        async fn fetch_candles(&self, _symbol: &str, _interval_code: &str, limit: usize) -> anyhow::Result<Vec<Candle>> {
            Ok((0..limit)
                .map(|i| Candle { open_time: i as i64, open: dec!(100), high: dec!(101), low: dec!(99), close: dec!(100), volume: dec!(10) })
                .collect())
        }
        async fn get_assets(&self) -> anyhow::Result<Vec<AssetBalance>> {
            Err(anyhow::anyhow!("balance API unreachable"))
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

    struct FailingAdvisor;
    #[async_trait]
    impl crate::domain::ports::Advisor for FailingAdvisor {
        async fn advise(&self, _prompt: &str) -> anyhow::Result<crate::domain::ports::AdvisorResponse> {
            Err(anyhow::anyhow!("down"))
        }
    }

    fn loop_with(candles: usize) -> SentinelLoop {
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(FakeExchange { candles });
        let classifier: Arc<dyn Classifier> = Arc::new(UntrainedClassifier);
        let sentiment = Arc::new(SentimentService::new(Arc::new(NeutralSentiment), Arc::new(NeutralSentiment)));
        let advisor_gate = Arc::new(AdvisorGate::new(Arc::new(FailingAdvisor), 100));
        let risk = Arc::new(RiskManager::new(RiskConfig::default()));
        let safety = Arc::new(SafetyLayer::new());
        let portfolio = Arc::new(Mutex::new(PortfolioState::new(dec!(10000), chrono::Utc::now().date_naive())));
        let positions = Arc::new(PositionManager::new(portfolio.clone(), exchange.clone(), risk.clone()));
        let rules = Arc::new(RwLock::new(Vec::new()));
        SentinelLoop::new(exchange, classifier, sentiment, advisor_gate, risk, safety, positions, portfolio, rules)
    }

    fn settings(auto_trading: bool) -> SentinelSettings {
        SentinelSettings {
            auto_trading,
            risk_tolerance: 50.0,
            current_symbol: "cmt_btcusdt".into(),
            leverage: 5,
        }
    }

    #[tokio::test]
    async fn disabled_auto_trading_short_circuits() {
        let loop_ = loop_with(MIN_CANDLES);
        let outcome = loop_.run_cycle(&settings(false)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Disabled);
    }

    #[tokio::test]
    async fn fewer_than_minimum_candles_short_circuits() {
        let loop_ = loop_with(10);
        let outcome = loop_.run_cycle(&settings(true)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::InsufficientCandles);
    }

    #[tokio::test]
    async fn balance_lookup_failure_falls_back_to_minimal_notional_instead_of_erroring() {
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(FailingAssetsExchange);
        let classifier: Arc<dyn Classifier> = Arc::new(UntrainedClassifier);
        let sentiment = Arc::new(SentimentService::new(Arc::new(NeutralSentiment), Arc::new(NeutralSentiment)));
        let advisor_gate = Arc::new(AdvisorGate::new(Arc::new(FailingAdvisor), 100));
        let risk = Arc::new(RiskManager::new(RiskConfig::default()));
        let safety = Arc::new(SafetyLayer::new());
        let portfolio = Arc::new(Mutex::new(PortfolioState::new(dec!(10000), chrono::Utc::now().date_naive())));
        let positions = Arc::new(PositionManager::new(portfolio.clone(), exchange.clone(), risk.clone()));
        let rules = Arc::new(RwLock::new(vec![crate::domain::rules::Rule {
            id: "r1".into(),
            name: "always_buy".into(),
            predicate: "price > 0".into(),
            action: crate::domain::rules::RuleAction::Buy,
            active: true,
        }]));
        let loop_ = SentinelLoop::new(exchange, classifier, sentiment, advisor_gate, risk, safety, positions, portfolio, rules);

        // The fallback notional floor is far below the exchange minimum order
        // size, so the cycle still rejects the trade, but it must do so as an
        // `InsufficientBalance` outcome rather than propagating the lookup error.
        let outcome = loop_.run_cycle(&settings(true)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::InsufficientBalance);
    }
}
