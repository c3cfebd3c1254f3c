use crate::config::Config;
use std::env;
use std::sync::Mutex;
use std::sync::OnceLock;

// Global lock to prevent race conditions when modifying environment variables in tests
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn get_env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

fn clear_all() {
    for key in [
        "DATABASE_URL",
        "ADVISOR_API_KEY",
        "ADVISOR_ENDPOINT",
        "ADVISOR_MAX_CALLS_PER_DAY",
        "EXCHANGE_BASE_URL",
        "EXCHANGE_API_KEY",
        "EXCHANGE_API_SECRET",
        "EXCHANGE_PASSPHRASE",
        "SENTIMENT_FEED_URL",
        "SENTIMENT_API_KEY",
        "SYMBOLS",
        "STARTING_EQUITY",
        "SENTINEL_CYCLE_SECONDS",
        "INSTITUTIONAL_CYCLE_SECONDS",
        "POSITION_MONITOR_SECONDS",
        "RISK_PER_TRADE_PCT",
        "MAX_LEVERAGE",
    ] {
        env::remove_var(key);
    }
}

#[test]
fn missing_database_url_is_an_error() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("ADVISOR_API_KEY", "key");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("DATABASE_URL"));
}

#[test]
fn missing_advisor_key_is_an_error() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("DATABASE_URL", "sqlite::memory:");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("ADVISOR_API_KEY"));
}

#[test]
fn required_vars_alone_yield_degraded_but_valid_config() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("DATABASE_URL", "sqlite::memory:");
    env::set_var("ADVISOR_API_KEY", "key");

    let config = Config::from_env().unwrap();

    assert!(!config.trading_enabled());
    assert_eq!(config.symbols, vec!["cmt_btcusdt".to_string()]);
}

#[test]
fn exchange_credentials_enable_trading_only_when_all_three_present() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("DATABASE_URL", "sqlite::memory:");
    env::set_var("ADVISOR_API_KEY", "key");
    env::set_var("EXCHANGE_API_KEY", "k");
    env::set_var("EXCHANGE_API_SECRET", "s");

    let config = Config::from_env().unwrap();
    assert!(!config.trading_enabled());

    env::set_var("EXCHANGE_PASSPHRASE", "p");
    let config = Config::from_env().unwrap();
    assert!(config.trading_enabled());
}

#[test]
fn symbols_list_splits_and_trims() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("DATABASE_URL", "sqlite::memory:");
    env::set_var("ADVISOR_API_KEY", "key");
    env::set_var("SYMBOLS", "cmt_btcusdt, cmt_ethusdt ,cmt_solusdt");

    let config = Config::from_env().unwrap();
    assert_eq!(config.symbols, vec!["cmt_btcusdt", "cmt_ethusdt", "cmt_solusdt"]);
}

#[test]
fn risk_config_overrides_from_env() {
    let _guard = get_env_lock().lock().unwrap();
    clear_all();
    env::set_var("DATABASE_URL", "sqlite::memory:");
    env::set_var("ADVISOR_API_KEY", "key");
    env::set_var("RISK_PER_TRADE_PCT", "0.02");
    env::set_var("MAX_LEVERAGE", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.risk.risk_per_trade_pct.to_string(), "0.02");
    assert_eq!(config.risk.max_leverage, 10);
}
