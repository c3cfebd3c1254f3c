//! C2: fetches an ordered candle series for `(symbol, interval, limit)`.
//! Never raises across the boundary — an exchange outage degrades to a
//! synthetic random walk, tagged as such, so a downstream cycle can never
//! deadlock on the market-data source being down.

use crate::domain::candle::{Candle, CandleSeries, CandleSource};
use crate::domain::ports::ExchangeGateway;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tracing::warn;

const SYNTHETIC_ANCHOR: f64 = 100.0;
const SYNTHETIC_STEP_PCT: f64 = 0.004;
const SYNTHETIC_INTERVAL_MS: i64 = 60_000;

pub struct MarketDataService {
    exchange: Arc<dyn ExchangeGateway>,
}

impl MarketDataService {
    pub fn new(exchange: Arc<dyn ExchangeGateway>) -> Self {
        Self { exchange }
    }

    pub async fn fetch_series(&self, symbol: &str, interval_code: &str, limit: usize) -> CandleSeries {
        match self.exchange.fetch_candles(symbol, interval_code, limit).await {
            Ok(raw) => CandleSeries::normalize(symbol.to_string(), CandleSource::Exchange, raw),
            Err(e) => {
                warn!(symbol, reason = %e, "market data degraded, falling back to synthetic series");
                CandleSeries::normalize(symbol.to_string(), CandleSource::Synthetic, synthetic_walk(limit))
            }
        }
    }
}

/// A deterministic-shape, randomly-stepped walk anchored at a fixed price.
/// Exists only so a downstream cycle has warm indicators during an outage;
/// never used for sizing or signal conviction beyond that.
fn synthetic_walk(limit: usize) -> Vec<Candle> {
    let mut rng = rand::rng();
    let mut price = SYNTHETIC_ANCHOR;
    let now = chrono::Utc::now().timestamp_millis();
    let start = now - (limit as i64) * SYNTHETIC_INTERVAL_MS;

    (0..limit)
        .map(|i| {
            let step = rng.random_range(-SYNTHETIC_STEP_PCT..SYNTHETIC_STEP_PCT);
            let open = price;
            price *= 1.0 + step;
            let close = price;
            let high = open.max(close) * 1.0005;
            let low = open.min(close) * 0.9995;
            Candle {
                open_time: start + (i as i64) * SYNTHETIC_INTERVAL_MS,
                open: Decimal::from_f64(open).unwrap_or_default(),
                high: Decimal::from_f64(high).unwrap_or_default(),
                low: Decimal::from_f64(low).unwrap_or_default(),
                close: Decimal::from_f64(close).unwrap_or_default(),
                volume: Decimal::from_f64(1.0).unwrap_or_default(),
            }
        })
        .collect()
}
