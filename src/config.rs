//! Environment configuration (§6). Required: database URL, advisor API key.
//! Optional: exchange credentials, sentiment provider key — absent
//! optionals leave the system in a degraded-but-valid state (it will run
//! with a synthetic market-data feed and no live order placement until
//! supplied).

use crate::domain::risk::config::RiskConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub advisor_endpoint: String,
    pub advisor_api_key: String,
    pub advisor_max_calls_per_day: u32,

    pub exchange_base_url: String,
    pub exchange_api_key: Option<String>,
    pub exchange_api_secret: Option<String>,
    pub exchange_passphrase: Option<String>,

    pub sentiment_feed_url: String,
    pub sentiment_api_key: Option<String>,

    pub symbols: Vec<String>,
    pub starting_equity: Decimal,

    pub sentinel_cycle_seconds: u64,
    pub institutional_cycle_seconds: u64,
    pub position_monitor_seconds: u64,

    pub risk: RiskConfig,
}

impl Config {
    /// Whether live trading is possible, i.e. the optional exchange
    /// credentials were all supplied. Without them the system still
    /// starts — sentinel/institutional cycles run against synthetic
    /// market data and analysis, but `place_order` is never reachable.
    pub fn trading_enabled(&self) -> bool {
        self.exchange_api_key.is_some() && self.exchange_api_secret.is_some() && self.exchange_passphrase.is_some()
    }

    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let advisor_api_key = env::var("ADVISOR_API_KEY").context("ADVISOR_API_KEY is required")?;

        let advisor_endpoint =
            env::var("ADVISOR_ENDPOINT").unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta/advise".to_string());

        let advisor_max_calls_per_day = env::var("ADVISOR_MAX_CALLS_PER_DAY")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<u32>()
            .context("failed to parse ADVISOR_MAX_CALLS_PER_DAY")?;

        let exchange_base_url = env::var("EXCHANGE_BASE_URL").unwrap_or_else(|_| "https://api.bitget.com".to_string());
        let exchange_api_key = env::var("EXCHANGE_API_KEY").ok().filter(|s| !s.is_empty());
        let exchange_api_secret = env::var("EXCHANGE_API_SECRET").ok().filter(|s| !s.is_empty());
        let exchange_passphrase = env::var("EXCHANGE_PASSPHRASE").ok().filter(|s| !s.is_empty());

        let sentiment_feed_url =
            env::var("SENTIMENT_FEED_URL").unwrap_or_else(|_| "https://news.google.com/rss/search?q=crypto".to_string());
        let sentiment_api_key = env::var("SENTIMENT_API_KEY").ok().filter(|s| !s.is_empty());

        let symbols_str = env::var("SYMBOLS").unwrap_or_else(|_| "cmt_btcusdt".to_string());
        let symbols: Vec<String> = symbols_str.split(',').map(|s| s.trim().to_string()).collect();

        let starting_equity = env::var("STARTING_EQUITY")
            .unwrap_or_else(|_| "10000".to_string())
            .parse::<Decimal>()
            .context("failed to parse STARTING_EQUITY")?;

        let sentinel_cycle_seconds = env::var("SENTINEL_CYCLE_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("failed to parse SENTINEL_CYCLE_SECONDS")?;

        let institutional_cycle_seconds = env::var("INSTITUTIONAL_CYCLE_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("failed to parse INSTITUTIONAL_CYCLE_SECONDS")?;

        let position_monitor_seconds = env::var("POSITION_MONITOR_SECONDS")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<u64>()
            .context("failed to parse POSITION_MONITOR_SECONDS")?;

        let risk = RiskConfig {
            risk_per_trade_pct: env_decimal("RISK_PER_TRADE_PCT", dec!(0.0125))?,
            atr_stop_min_multiplier: env_decimal("ATR_STOP_MIN_MULTIPLIER", dec!(1.3))?,
            atr_stop_max_multiplier: env_decimal("ATR_STOP_MAX_MULTIPLIER", dec!(1.8))?,
            default_risk_reward: env_decimal("DEFAULT_RISK_REWARD", dec!(2.0))?,
            max_daily_loss_pct: env_decimal("MAX_DAILY_LOSS_PCT", dec!(0.03))?,
            max_drawdown_pct: env_decimal("MAX_DRAWDOWN_PCT", dec!(0.12))?,
            max_exposure_pct: env_decimal("MAX_EXPOSURE_PCT", dec!(0.40))?,
            max_leverage: env::var("MAX_LEVERAGE")
                .unwrap_or_else(|_| "20".to_string())
                .parse::<u32>()
                .context("failed to parse MAX_LEVERAGE")?,
            max_hold_hours: env::var("MAX_HOLD_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse::<i64>()
                .context("failed to parse MAX_HOLD_HOURS")?,
            max_concurrent_positions: env::var("MAX_CONCURRENT_POSITIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<usize>()
                .context("failed to parse MAX_CONCURRENT_POSITIONS")?,
            trailing_stop_atr_multiplier: env_decimal("TRAILING_STOP_ATR_MULTIPLIER", dec!(2.0))?,
        };

        Ok(Self {
            database_url,
            advisor_endpoint,
            advisor_api_key,
            advisor_max_calls_per_day,
            exchange_base_url,
            exchange_api_key,
            exchange_api_secret,
            exchange_passphrase,
            sentiment_feed_url,
            sentiment_api_key,
            symbols,
            starting_equity,
            sentinel_cycle_seconds,
            institutional_cycle_seconds,
            position_monitor_seconds,
            risk,
        })
    }
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => raw.parse::<Decimal>().with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}
