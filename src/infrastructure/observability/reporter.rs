//! Push-based metrics reporter.
//!
//! Periodically outputs metrics as structured JSON to stdout.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::domain::position::PortfolioState;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub portfolio: PortfolioSnapshot,
    pub system: SystemSnapshot,
}

#[derive(Serialize)]
pub struct PortfolioSnapshot {
    pub equity_usd: f64,
    pub daily_pnl_usd: f64,
    pub total_pnl_usd: f64,
    pub positions_count: usize,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Serialize)]
pub struct SystemSnapshot {
    pub circuit_breaker_tripped: bool,
    pub sentiment_score: Option<u32>,
}

/// Outputs metrics as structured JSON logs on a configurable interval.
/// No HTTP server, no incoming connections, only outbound data.
pub struct MetricsReporter {
    portfolio: Arc<Mutex<PortfolioState>>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(portfolio: Arc<Mutex<PortfolioState>>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            portfolio,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!("MetricsReporter: starting push-based metrics (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{}", json);
                        info!(
                            "portfolio equity ${:.2} | positions {} | uptime {}s",
                            snapshot.portfolio.equity_usd, snapshot.portfolio.positions_count, snapshot.uptime_seconds
                        );
                    }
                    Err(e) => warn!("failed to serialize metrics: {}", e),
                },
                Err(e) => warn!("failed to collect metrics: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let portfolio = self.portfolio.lock().await;
        let uptime = self.start_time.elapsed().as_secs();

        let equity = portfolio.current_equity.to_f64().unwrap_or(0.0);
        let daily_pnl = portfolio.daily_pnl.to_f64().unwrap_or(0.0);
        let total_pnl = portfolio.total_pnl.to_f64().unwrap_or(0.0);

        let positions: Vec<PositionSnapshot> = portfolio
            .positions
            .values()
            .map(|p| PositionSnapshot {
                symbol: p.symbol.clone(),
                size: p.size.to_f64().unwrap_or(0.0),
                entry_price: p.entry_price.to_f64().unwrap_or(0.0),
                unrealized_pnl: p.unrealized_pnl.to_f64().unwrap_or(0.0),
            })
            .collect();

        self.metrics.portfolio_value_usd.set(equity);
        self.metrics.daily_pnl_usd.set(daily_pnl);
        self.metrics.positions_count.set(portfolio.positions.len() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            portfolio: PortfolioSnapshot {
                equity_usd: equity,
                daily_pnl_usd: daily_pnl,
                total_pnl_usd: total_pnl,
                positions_count: portfolio.positions.len(),
                positions,
            },
            system: SystemSnapshot {
                circuit_breaker_tripped: false,
                sentiment_score: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn snapshot_reflects_empty_portfolio() {
        let portfolio = Arc::new(Mutex::new(PortfolioState::new(Decimal::from(10_000), Utc::now().date_naive())));
        let metrics = Metrics::new().expect("metrics construction");
        let reporter = MetricsReporter::new(portfolio, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.expect("snapshot collection");

        assert_eq!(snapshot.portfolio.positions_count, 0);
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            portfolio: PortfolioSnapshot {
                equity_usd: 75_000.0,
                daily_pnl_usd: 500.0,
                total_pnl_usd: 2_500.0,
                positions_count: 1,
                positions: vec![PositionSnapshot {
                    symbol: "cmt_btcusdt".to_string(),
                    size: 0.5,
                    entry_price: 60_000.0,
                    unrealized_pnl: 120.0,
                }],
            },
            system: SystemSnapshot {
                circuit_breaker_tripped: false,
                sentiment_score: Some(50),
            },
        };

        let json = serde_json::to_string(&snapshot).expect("serialization");
        assert!(json.contains("cmt_btcusdt"));
        assert!(json.contains("75000"));
    }
}
