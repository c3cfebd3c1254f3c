//! Top-level wiring: constructs every component from `Config`, exposes the
//! operator control surface (§6), and owns the background loop handles.

use crate::application::institutional_orchestrator::{InstitutionalOrchestrator, InstitutionalSettings};
use crate::application::market_data_service::MarketDataService;
use crate::application::mode_coordinator::{Mode, ModeCoordinator, TransitionError};
use crate::application::position_manager::{ClosedPosition, PositionManager};
use crate::application::risk_manager::RiskManager;
use crate::application::safety_layer::SafetyLayer;
use crate::application::sentinel_loop::{SentinelLoop, SentinelSettings};
use crate::application::sentiment_service::SentimentService;
use crate::application::signal_synthesizer::{AdvisorGate, sentinel_decision};
use crate::config::Config;
use crate::domain::errors::PortfolioError;
use crate::domain::ports::{ExchangeGateway, OrderSide, OrderType, PlaceOrderRequest};
use crate::domain::position::{PortfolioState, PositionDirection};
use crate::domain::rules::Rule;
use crate::domain::signal::Decision;
use crate::infrastructure::advisor::HttpAdvisor;
use crate::infrastructure::exchange::ExchangeClient;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAiAnalysisRepository, SqliteMarketLogRepository, SqliteOpenPositionsRepository, SqliteStrategyRepository,
    SqliteTradeHistoryRepository, SqliteTradeSettingsRepository,
};
use crate::infrastructure::sentiment::local_classifier::LocalClassifierSentimentProvider;
use crate::infrastructure::sentiment::news_feed::NewsFeedSentimentProvider;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

const POSITION_INTERVAL: &str = "1m";

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mode: Mode,
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub open_positions: usize,
    pub trading_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub auto_trading: bool,
    pub risk_tolerance: f64,
    pub current_symbol: String,
    pub leverage: u32,
}

/// Everything the control surface needs, built once from `Config` and
/// shared across the sentinel loop, the institutional loop, and the
/// position monitor via `Arc`.
pub struct Application {
    config: Config,
    exchange: Arc<dyn ExchangeGateway>,
    market_data: MarketDataService,
    classifier: Arc<dyn crate::domain::classifier::Classifier>,
    sentiment: Arc<SentimentService>,
    advisor_gate: Arc<AdvisorGate>,
    risk: Arc<RiskManager>,
    safety: Arc<SafetyLayer>,
    positions: Arc<PositionManager>,
    portfolio: Arc<Mutex<PortfolioState>>,
    rules: Arc<RwLock<Vec<Rule>>>,
    coordinator: Arc<ModeCoordinator>,
    settings: Arc<Mutex<Settings>>,
    database: Database,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.database_url).await.context("failed to open database")?;

        let exchange: Arc<dyn ExchangeGateway> = Arc::new(ExchangeClient::new(
            config.exchange_base_url.clone(),
            config.exchange_api_key.clone().unwrap_or_default(),
            config.exchange_api_secret.clone().unwrap_or_default(),
            config.exchange_passphrase.clone().unwrap_or_default(),
        ));

        let classifier: Arc<dyn crate::domain::classifier::Classifier> =
            Arc::new(crate::application::classifier_service::LogisticDirectionClassifier::new());

        let primary_sentiment = Arc::new(NewsFeedSentimentProvider::new(config.sentiment_feed_url.clone(), config.sentiment_api_key.clone()));
        let secondary_sentiment = Arc::new(LocalClassifierSentimentProvider::new("{symbol} trades sideways amid low volume"));
        let sentiment = Arc::new(SentimentService::new(primary_sentiment, secondary_sentiment));

        let advisor = Arc::new(HttpAdvisor::new(config.advisor_endpoint.clone(), config.advisor_api_key.clone()));
        let advisor_gate = Arc::new(AdvisorGate::new(advisor, config.advisor_max_calls_per_day));

        let risk = Arc::new(RiskManager::new(config.risk.clone()));
        let safety = Arc::new(SafetyLayer::new());

        let today = chrono::Utc::now().date_naive();
        let portfolio = Arc::new(Mutex::new(PortfolioState::new(config.starting_equity, today)));

        let positions = Arc::new(PositionManager::new(portfolio.clone(), exchange.clone(), risk.clone()));

        let rules = Arc::new(RwLock::new(Vec::new()));

        let settings_repo = SqliteTradeSettingsRepository::new(database.pool.clone());
        let stored_settings = settings_repo.get().await.unwrap_or(crate::domain::repositories::TradeSettings {
            auto_trading: false,
            risk_tolerance: 50.0,
            current_symbol: config.symbols.first().cloned().unwrap_or_else(|| "cmt_btcusdt".to_string()),
        });
        let settings = Arc::new(Mutex::new(Settings {
            auto_trading: stored_settings.auto_trading,
            risk_tolerance: stored_settings.risk_tolerance,
            current_symbol: stored_settings.current_symbol,
            leverage: 10,
        }));

        Ok(Self {
            market_data: MarketDataService::new(exchange.clone()),
            config,
            exchange,
            classifier,
            sentiment,
            advisor_gate,
            risk,
            safety,
            positions,
            portfolio,
            rules,
            coordinator: Arc::new(ModeCoordinator::new()),
            settings,
            database,
        })
    }

    fn sqlite_market_log(&self) -> SqliteMarketLogRepository {
        SqliteMarketLogRepository::new(self.database.pool.clone())
    }

    fn sqlite_ai_analysis(&self) -> SqliteAiAnalysisRepository {
        SqliteAiAnalysisRepository::new(self.database.pool.clone())
    }

    fn sqlite_trade_history(&self) -> SqliteTradeHistoryRepository {
        SqliteTradeHistoryRepository::new(self.database.pool.clone())
    }

    fn sqlite_open_positions(&self) -> SqliteOpenPositionsRepository {
        SqliteOpenPositionsRepository::new(self.database.pool.clone())
    }

    fn sqlite_strategies(&self) -> SqliteStrategyRepository {
        SqliteStrategyRepository::new(self.database.pool.clone())
    }

    fn sqlite_trade_settings(&self) -> SqliteTradeSettingsRepository {
        SqliteTradeSettingsRepository::new(self.database.pool.clone())
    }

    /// Restores positions persisted before a previous restart, and starts
    /// the always-on metrics reporter. Spawned loops (sentinel/institutional)
    /// are started on demand via the control surface, never here.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let restored = self.sqlite_open_positions().all().await.unwrap_or_default();
        if !restored.is_empty() {
            let mut portfolio = self.portfolio.lock().await;
            for position in restored {
                info!(symbol = %position.symbol, "restored open position from persistence");
                portfolio.positions.insert(position.symbol.clone(), position);
            }
        }

        let metrics = Metrics::new().context("failed to construct metrics registry")?;
        let reporter = MetricsReporter::new(self.portfolio.clone(), metrics, 60);
        tokio::spawn(reporter.run());

        let this = self.clone();
        tokio::spawn(async move {
            this.position_monitor_loop().await;
        });

        Ok(())
    }

    async fn position_monitor_loop(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.config.position_monitor_seconds);
        loop {
            tokio::time::sleep(interval).await;
            let symbol = self.settings.lock().await.current_symbol.clone();
            let series = self.market_data.fetch_series(&symbol, POSITION_INTERVAL, 1).await;
            let Some(latest) = series.last().map(|c| c.close) else { continue };
            let mut prices = std::collections::HashMap::new();
            prices.insert(symbol, latest);
            for (symbol, reason) in self.positions.monitor_tick(&prices).await {
                match self.positions.close(&symbol, reason).await {
                    Ok(closed) => self.persist_closed_position(&closed).await,
                    Err(e) => error!(symbol, "failed to close position during monitor tick: {}", e),
                }
            }
        }
    }

    async fn persist_closed_position(&self, closed: &ClosedPosition) {
        if let Err(e) = self.sqlite_open_positions().delete(&closed.symbol, "Buy").await {
            warn!("failed to delete closed position {} from store: {}", closed.symbol, e);
        }
        if let Err(e) = self.sqlite_open_positions().delete(&closed.symbol, "Sell").await {
            warn!("failed to delete closed position {} from store: {}", closed.symbol, e);
        }
        info!(symbol = %closed.symbol, pnl = %closed.realized_pnl, reason = closed.reason, "position closed");
    }

    fn build_sentinel_loop(self: &Arc<Self>) -> Arc<SentinelLoop> {
        Arc::new(SentinelLoop::new(
            self.exchange.clone(),
            self.classifier.clone(),
            self.sentiment.clone(),
            self.advisor_gate.clone(),
            self.risk.clone(),
            self.safety.clone(),
            self.positions.clone(),
            self.portfolio.clone(),
            self.rules.clone(),
        ))
    }

    fn build_institutional_orchestrator(self: &Arc<Self>) -> Arc<InstitutionalOrchestrator> {
        Arc::new(InstitutionalOrchestrator::new(
            self.exchange.clone(),
            self.risk.clone(),
            self.safety.clone(),
            self.positions.clone(),
            self.portfolio.clone(),
        ))
    }

    /// `startSentinel` (§6): `Idle -> Sentinel`. No-op if already running,
    /// rejected if Institutional is active.
    pub async fn start_sentinel(self: &Arc<Self>) -> Result<(), TransitionError> {
        let this = self.clone();
        let sentinel = self.build_sentinel_loop();
        let cycle_seconds = self.config.sentinel_cycle_seconds;
        let spawn_sentinel = move || {
            let this = this.clone();
            let sentinel = sentinel.clone();
            tokio::spawn(async move {
                let interval = std::time::Duration::from_secs(cycle_seconds);
                loop {
                    tokio::time::sleep(interval).await;
                    let settings = {
                        let s = this.settings.lock().await;
                        SentinelSettings {
                            auto_trading: s.auto_trading,
                            risk_tolerance: s.risk_tolerance,
                            current_symbol: s.current_symbol.clone(),
                            leverage: s.leverage,
                        }
                    };
                    match sentinel.run_cycle(&settings).await {
                        Ok(outcome) => info!(?outcome, "sentinel cycle complete"),
                        Err(e) => error!("sentinel cycle failed: {}", e),
                    }
                }
            })
        };
        let this_monitor = self.clone();
        let spawn_monitor = move || {
            let this_monitor = this_monitor.clone();
            tokio::spawn(async move {
                this_monitor.position_monitor_loop().await;
            })
        };
        self.coordinator.start_sentinel(spawn_sentinel, spawn_monitor).await
    }

    /// `startInstitutional` (§6): `Idle|Sentinel -> Institutional`, stopping
    /// Sentinel first if it was running.
    pub async fn start_institutional(self: &Arc<Self>) {
        let this = self.clone();
        let orchestrator = self.build_institutional_orchestrator();
        let cycle_seconds = self.config.institutional_cycle_seconds;
        let symbols = self.config.symbols.clone();
        let spawn_institutional = move || {
            let this = this.clone();
            let orchestrator = orchestrator.clone();
            let symbols = symbols.clone();
            tokio::spawn(async move {
                let interval = std::time::Duration::from_secs(cycle_seconds);
                loop {
                    tokio::time::sleep(interval).await;
                    let (enabled, leverage) = {
                        let s = this.settings.lock().await;
                        (s.auto_trading, s.leverage)
                    };
                    let settings = InstitutionalSettings {
                        enabled,
                        symbols: symbols.clone(),
                        leverage,
                    };
                    match orchestrator.run_cycle(&settings).await {
                        Ok(outcome) => info!(?outcome, "institutional cycle complete"),
                        Err(e) => error!("institutional cycle failed: {}", e),
                    }
                }
            })
        };
        let this_monitor = self.clone();
        let spawn_monitor = move || {
            let this_monitor = this_monitor.clone();
            tokio::spawn(async move {
                this_monitor.position_monitor_loop().await;
            })
        };
        self.coordinator.start_institutional(spawn_institutional, spawn_monitor).await
    }

    /// `stopSentinel` / `stopInstitutional` (§6): both collapse to the same
    /// unconditional, idempotent transition back to `Idle`.
    pub async fn stop(&self) {
        self.coordinator.stop_to_idle().await;
    }

    /// `status` (§6).
    pub async fn status(&self) -> StatusReport {
        let portfolio = self.portfolio.lock().await;
        StatusReport {
            mode: self.coordinator.current_mode().await,
            equity: portfolio.current_equity,
            daily_pnl: portfolio.daily_pnl,
            open_positions: portfolio.positions.len(),
            trading_enabled: self.config.trading_enabled(),
        }
    }

    /// `getSettings` (§6).
    pub async fn get_settings(&self) -> Settings {
        self.settings.lock().await.clone()
    }

    /// `updateSettings` (§6), persisted immediately so a restart resumes
    /// with the operator's last choice.
    pub async fn update_settings(&self, new_settings: Settings) -> Result<()> {
        {
            let mut settings = self.settings.lock().await;
            *settings = new_settings.clone();
        }
        self.sqlite_trade_settings()
            .set(&crate::domain::repositories::TradeSettings {
                auto_trading: new_settings.auto_trading,
                risk_tolerance: new_settings.risk_tolerance,
                current_symbol: new_settings.current_symbol,
            })
            .await
    }

    /// `triggerAnalysis(symbol)` (§6): the same read-only analysis path the
    /// sentinel cycle runs, without placing an order. Persists the result
    /// to `market_log`/`ai_analysis` so the operator surface can read it back.
    pub async fn trigger_analysis(&self, symbol: &str) -> Result<Decision> {
        let series = self.market_data.fetch_series(symbol, "1m", 500).await;
        let state = crate::domain::indicators::compute(&series).context("insufficient candles for analysis")?;
        let classifier_pred = self.classifier.predict(&series);
        let sentiment = self.sentiment.sentiment(symbol).await;
        let rules = self.rules.read().await.clone();

        let decision = sentinel_decision(symbol, &state, &rules, classifier_pred, Some(sentiment), &self.advisor_gate, chrono::Utc::now()).await;

        let log_entry = crate::domain::repositories::MarketLogEntry {
            symbol: symbol.to_string(),
            trend: format!("{:?}", state.trend),
            structure: "n/a".to_string(),
            price: state.price,
            rsi: state.rsi,
            action: decision.action,
            confidence: decision.confidence,
            reason: decision.reason.clone(),
            provenance: decision.provenance,
            recorded_at: chrono::Utc::now(),
        };
        if let Err(e) = self.sqlite_market_log().append(&log_entry).await {
            warn!("failed to persist market_log entry for {}: {}", symbol, e);
        }
        if let Err(e) = self
            .sqlite_ai_analysis()
            .upsert(&crate::domain::repositories::AiAnalysisRow {
                symbol: symbol.to_string(),
                summary: decision.reason.clone(),
                confidence: decision.confidence,
                updated_at: chrono::Utc::now(),
            })
            .await
        {
            warn!("failed to persist ai_analysis row for {}: {}", symbol, e);
        }

        Ok(decision)
    }

    /// `placeManualTrade(symbol, action)` (§6): sized the same way a
    /// sentinel entry is sized, gated by the same risk and safety checks.
    pub async fn place_manual_trade(&self, symbol: &str, direction: PositionDirection) -> Result<()> {
        let series = self.market_data.fetch_series(symbol, "1m", 500).await;
        let state = crate::domain::indicators::compute(&series).context("insufficient candles to size a manual trade")?;

        let assets = self.exchange.get_assets().await.context("failed to read exchange balances")?;
        let balance = assets.iter().find(|a| a.coin_name.eq_ignore_ascii_case("USDT")).map(|a| a.available).unwrap_or(Decimal::ZERO);

        let (equity, available_margin) = {
            let portfolio = self.portfolio.lock().await;
            (portfolio.current_equity, balance - portfolio.aggregate_margin())
        };

        let leverage = self.settings.lock().await.leverage;
        let sized = self.risk.size_position(direction, state.price, state.atr, equity, available_margin, leverage);

        {
            let portfolio = self.portfolio.lock().await;
            self.risk
                .can_open_position(&portfolio, symbol, sized.margin_required)
                .map_err(|e| anyhow::anyhow!("risk gate rejected manual trade: {}", e))?;
        }

        let candidate = crate::application::safety_layer::TradeCandidate {
            symbol,
            direction,
            entry: state.price,
            stop_loss: sized.stop_loss,
            take_profit: sized.take_profit,
            size: sized.size,
            leverage,
            margin_required: sized.margin_required,
        };
        let portfolio_snapshot = self.portfolio.lock().await;
        let (ok, results) = self.safety.validate_trade(&candidate, &portfolio_snapshot, balance, &self.risk.config);
        drop(portfolio_snapshot);
        if !ok {
            let reasons: Vec<String> = results.into_iter().filter(|r| !r.passed).map(|r| r.message.clone()).collect();
            anyhow::bail!("safety layer rejected manual trade: {}", reasons.join(", "));
        }

        let order_side = match direction {
            PositionDirection::Long => OrderSide::Buy,
            PositionDirection::Short => OrderSide::Sell,
        };
        let response = self
            .exchange
            .place_order(PlaceOrderRequest {
                symbol: symbol.to_string(),
                side: order_side,
                order_type: OrderType::Market,
                size: sized.size,
                price: None,
                client_oid: None,
                preset_take_profit: Some(sized.take_profit),
                preset_stop_loss: Some(sized.stop_loss),
            })
            .await
            .context("exchange rejected manual order")?;
        let order_id = response.order_id.unwrap_or_else(|| format!("manual-{}", chrono::Utc::now().timestamp_millis()));

        self.positions
            .open(
                symbol,
                direction,
                sized.size,
                state.price,
                sized.stop_loss,
                sized.take_profit,
                leverage,
                state.atr,
                order_id,
                crate::domain::position::PositionSource::Sentinel,
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to record manual position: {}", e))?;

        Ok(())
    }

    /// `forceCloseAll` (§6).
    pub async fn force_close_all(&self) -> Vec<ClosedPosition> {
        let closed = self.positions.close_all_for_shutdown().await;
        for c in &closed {
            self.persist_closed_position(c).await;
        }
        closed
    }

    /// `closePosition(symbol, side)` (§6). `side` is accepted for parity
    /// with the wire contract but every symbol carries at most one open
    /// position, so it is not needed to disambiguate.
    pub async fn close_position(&self, symbol: &str, reason: &'static str) -> Result<ClosedPosition, PortfolioError> {
        let closed = self.positions.close(symbol, reason).await?;
        self.persist_closed_position(&closed).await;
        Ok(closed)
    }

    pub async fn list_strategies(&self) -> Result<Vec<crate::domain::repositories::StrategyRecord>> {
        self.sqlite_strategies().list().await
    }

    pub async fn trade_history(&self, symbol: &str) -> Result<Vec<crate::domain::repositories::TradeHistoryEntry>> {
        self.sqlite_trade_history().find_by_symbol(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            advisor_endpoint: "https://example.invalid/advise".to_string(),
            advisor_api_key: "key".to_string(),
            advisor_max_calls_per_day: 200,
            exchange_base_url: "https://example.invalid".to_string(),
            exchange_api_key: None,
            exchange_api_secret: None,
            exchange_passphrase: None,
            sentiment_feed_url: "https://example.invalid/rss".to_string(),
            sentiment_api_key: None,
            symbols: vec!["cmt_btcusdt".to_string()],
            starting_equity: Decimal::from(10_000),
            sentinel_cycle_seconds: 60,
            institutional_cycle_seconds: 300,
            position_monitor_seconds: 15,
            risk: crate::domain::risk::config::RiskConfig::default(),
        }
    }

    #[tokio::test]
    async fn build_wires_a_fresh_idle_application() {
        let app = Application::build(test_config()).await.unwrap();
        let status = app.status().await;
        assert_eq!(status.mode, Mode::Idle);
        assert_eq!(status.equity, Decimal::from(10_000));
        assert!(!status.trading_enabled);
    }

    #[tokio::test]
    async fn update_settings_round_trips_through_persistence() {
        let app = Application::build(test_config()).await.unwrap();
        app.update_settings(Settings {
            auto_trading: true,
            risk_tolerance: 40.0,
            current_symbol: "cmt_ethusdt".to_string(),
            leverage: 5,
        })
        .await
        .unwrap();
        let settings = app.get_settings().await;
        assert!(settings.auto_trading);
        assert_eq!(settings.current_symbol, "cmt_ethusdt");
    }
}
