use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk Manager tunables (C9). Defaults are the literal values named in the
/// governing institutional-risk policy; override via configuration, never by
/// editing call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub risk_per_trade_pct: Decimal,
    pub atr_stop_min_multiplier: Decimal,
    pub atr_stop_max_multiplier: Decimal,
    pub default_risk_reward: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_exposure_pct: Decimal,
    pub max_leverage: u32,
    pub max_hold_hours: i64,
    pub max_concurrent_positions: usize,
    pub trailing_stop_atr_multiplier: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: dec!(0.0125),
            atr_stop_min_multiplier: dec!(1.3),
            atr_stop_max_multiplier: dec!(1.8),
            default_risk_reward: dec!(2.0),
            max_daily_loss_pct: dec!(0.03),
            max_drawdown_pct: dec!(0.12),
            max_exposure_pct: dec!(0.40),
            max_leverage: 20,
            max_hold_hours: 24,
            max_concurrent_positions: 1,
            trailing_stop_atr_multiplier: dec!(2.0),
        }
    }
}
