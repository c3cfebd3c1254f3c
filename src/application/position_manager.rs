//! C11: the sole owner of the positions map. Both mode loops submit intents
//! here rather than mutating positions directly. Open/close are atomic under
//! the internal lock; the 5s monitor holds the lock only while updating
//! in-memory state, releasing it before any outbound order.

use crate::application::risk_manager::RiskManager;
use crate::domain::errors::{ExecutionError, PortfolioError};
use crate::domain::ports::{ExchangeGateway, OrderSide as ExchangeOrderSide, OrderType, PlaceOrderRequest, PlaceOrderResponse};
use crate::domain::position::{PortfolioState, Position, PositionDirection, PositionSource, Side};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const SUCCESS_CODE: &str = "00000";
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Submits an order, retrying up to `MAX_RETRIES` times at `RETRY_DELAY`
/// spacing when the transport succeeds but the exchange rejects the order.
/// A transport-level error is retried the same way; only the last attempt's
/// failure is reported.
pub(crate) async fn place_order_with_retry(
    exchange: &Arc<dyn ExchangeGateway>,
    symbol: &str,
    request_for_attempt: impl Fn() -> PlaceOrderRequest,
) -> Result<PlaceOrderResponse, ExecutionError> {
    let mut last_reason = String::new();
    for attempt in 1..=MAX_RETRIES {
        match exchange.place_order(request_for_attempt()).await {
            Ok(response) if response.is_success(SUCCESS_CODE) => return Ok(response),
            Ok(response) => last_reason = format!("{}: {}", response.code, response.msg),
            Err(e) => last_reason = e.to_string(),
        }
        if attempt < MAX_RETRIES {
            warn!("order attempt {}/{} failed for {}: {}", attempt, MAX_RETRIES, symbol, last_reason);
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    Err(ExecutionError::ExhaustedRetries { attempts: MAX_RETRIES, reason: last_reason })
}

#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub symbol: String,
    pub realized_pnl: Decimal,
    pub reason: &'static str,
    pub externally_closed: bool,
}

pub struct PositionManager {
    portfolio: Arc<Mutex<PortfolioState>>,
    exchange: Arc<dyn ExchangeGateway>,
    risk: Arc<RiskManager>,
}

impl PositionManager {
    pub fn new(portfolio: Arc<Mutex<PortfolioState>>, exchange: Arc<dyn ExchangeGateway>, risk: Arc<RiskManager>) -> Self {
        Self { portfolio, exchange, risk }
    }

    /// Opens a position, replacing any existing one for the symbol
    /// atomically under the lock.
    pub async fn open(
        &self,
        symbol: &str,
        direction: PositionDirection,
        size: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        leverage: u32,
        atr: Decimal,
        order_id: String,
        source: PositionSource,
    ) -> Result<(), PortfolioError> {
        let side = match direction {
            PositionDirection::Long => Side::Buy,
            PositionDirection::Short => Side::Sell,
        };
        let position = Position::open(
            symbol.to_string(),
            side,
            direction,
            size,
            entry_price,
            stop_loss,
            take_profit,
            leverage,
            atr,
            order_id,
            source,
            Utc::now(),
        )
        .map_err(|e| PortfolioError::StoreUnavailable { reason: e.to_string() })?;

        let mut portfolio = self.portfolio.lock().await;
        if let Some(existing) = portfolio.positions.remove(symbol) {
            warn!("replacing existing position for {} (order {})", symbol, existing.order_id);
        }
        portfolio.positions.insert(symbol.to_string(), position);
        Ok(())
    }

    /// One 5s monitor tick: refresh prices, trailing stops, and exit
    /// conditions under the lock; the actual close orders are issued after
    /// the lock is released.
    pub async fn monitor_tick(&self, latest_prices: &HashMap<String, Decimal>) -> Vec<(String, &'static str)> {
        let mut to_close = Vec::new();
        {
            let mut portfolio = self.portfolio.lock().await;
            let now = Utc::now();
            for (symbol, position) in portfolio.positions.iter_mut() {
                if let Some(&price) = latest_prices.get(symbol) {
                    position.update_price(price);
                }
                if let Some(candidate) = self.risk.trailing_stop_candidate(position) {
                    position.trailing_stop = Some(candidate);
                }
                if let Some(reason) = self.risk.should_exit(position, now) {
                    to_close.push((symbol.clone(), reason));
                }
            }
        }
        to_close
    }

    /// Closes a position, verifying it is still present on the exchange
    /// first — an external liquidation may have already removed it.
    pub async fn close(&self, symbol: &str, reason: &'static str) -> Result<ClosedPosition, PortfolioError> {
        let position = {
            let portfolio = self.portfolio.lock().await;
            portfolio
                .positions
                .get(symbol)
                .cloned()
                .ok_or_else(|| PortfolioError::PositionNotFound { symbol: symbol.to_string() })?
        };

        let exchange_positions = self.exchange.list_positions().await.unwrap_or_default();
        let still_open = exchange_positions.iter().any(|p| p.symbol == symbol);

        let (realized_pnl, externally_closed) = if !still_open {
            (position.unrealized_pnl, true)
        } else {
            let close_side = match position.direction {
                PositionDirection::Long => ExchangeOrderSide::Sell,
                PositionDirection::Short => ExchangeOrderSide::Buy,
            };
            let build_request = || PlaceOrderRequest {
                symbol: symbol.to_string(),
                side: close_side,
                order_type: OrderType::Market,
                size: position.size,
                price: None,
                client_oid: None,
                preset_take_profit: None,
                preset_stop_loss: None,
            };
            match place_order_with_retry(&self.exchange, symbol, build_request).await {
                Ok(_) => (position.unrealized_pnl, false),
                Err(e) => {
                    warn!("close order failed for {} after retries: {}", symbol, e);
                    (position.unrealized_pnl, false)
                }
            }
        };

        let mut portfolio = self.portfolio.lock().await;
        portfolio.positions.remove(symbol);
        portfolio.total_pnl += realized_pnl;
        info!("closed {} ({}), realized_pnl={}, externally_closed={}", symbol, reason, realized_pnl, externally_closed);

        Ok(ClosedPosition {
            symbol: symbol.to_string(),
            realized_pnl,
            reason,
            externally_closed,
        })
    }

    /// Shutdown: close every open position at its last known price with
    /// reason `SystemShutdown`.
    pub async fn close_all_for_shutdown(&self) -> Vec<ClosedPosition> {
        let symbols: Vec<String> = {
            let portfolio = self.portfolio.lock().await;
            portfolio.positions.keys().cloned().collect()
        };
        let mut closed = Vec::new();
        for symbol in symbols {
            if let Ok(result) = self.close(&symbol, "SystemShutdown").await {
                closed.push(result);
            }
        }
        closed
    }

    pub async fn has_position(&self, symbol: &str) -> bool {
        self.portfolio.lock().await.positions.contains_key(symbol)
    }

    pub async fn open_position_count(&self) -> usize {
        self.portfolio.lock().await.positions.len()
    }
}
