//! C10: ordered pre-trade gate. Each check yields a `CheckResult`; any
//! `Critical` failure aborts the trade, `Warning`s log but don't. Grounded on
//! the validator-pipeline shape (`ValidationResult`/priority-ordered checks)
//! generalized to the nine named checks this system runs per candidate.

use crate::domain::position::{PortfolioState, PositionDirection};
use crate::domain::risk::config::RiskConfig;
use crate::domain::risk::correlation;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

pub struct TradeCandidate<'a> {
    pub symbol: &'a str,
    pub direction: PositionDirection,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub size: Decimal,
    pub leverage: u32,
    pub margin_required: Decimal,
}

fn liquidation_price(entry: Decimal, leverage: u32, direction: PositionDirection) -> Decimal {
    use rust_decimal_macros::dec;
    let factor = dec!(0.9) / Decimal::from(leverage.max(1));
    match direction {
        PositionDirection::Long => entry * (Decimal::ONE - factor),
        PositionDirection::Short => entry * (Decimal::ONE + factor),
    }
}

fn check_symbol_validity(candidate: &TradeCandidate) -> CheckResult {
    let passed = correlation::group_for(candidate.symbol).is_some();
    CheckResult {
        name: "SymbolValidity",
        passed,
        severity: Severity::Critical,
        message: if passed {
            "symbol recognized".into()
        } else {
            format!("{} is not a tradable symbol", candidate.symbol)
        },
    }
}

fn check_minimum_order_size(candidate: &TradeCandidate) -> CheckResult {
    let min = correlation::min_order_size(candidate.symbol).unwrap_or(Decimal::ZERO);
    let passed = candidate.size >= min;
    CheckResult {
        name: "MinimumOrderSize",
        passed,
        severity: Severity::Critical,
        message: format!("size {} vs minimum {}", candidate.size, min),
    }
}

fn check_price_reasonableness(candidate: &TradeCandidate) -> CheckResult {
    let risk = (candidate.entry - candidate.stop_loss).abs();
    let reward = (candidate.take_profit - candidate.entry).abs();
    let rr = if risk > Decimal::ZERO { reward / risk } else { Decimal::ZERO };
    let passed = candidate.entry > Decimal::ZERO && candidate.stop_loss > Decimal::ZERO && candidate.take_profit > Decimal::ZERO && rr >= Decimal::ONE;
    CheckResult {
        name: "PriceReasonableness",
        passed,
        severity: Severity::Critical,
        message: format!("risk:reward = {:.2}", rr),
    }
}

fn check_margin_availability(candidate: &TradeCandidate, available_margin: Decimal) -> CheckResult {
    let passed = candidate.margin_required <= available_margin;
    CheckResult {
        name: "MarginAvailability",
        passed,
        severity: Severity::Critical,
        message: format!("required {} vs available {}", candidate.margin_required, available_margin),
    }
}

fn check_liquidation_distance(candidate: &TradeCandidate) -> CheckResult {
    use rust_decimal_macros::dec;
    let liq = liquidation_price(candidate.entry, candidate.leverage, candidate.direction);
    let distance = (candidate.stop_loss - liq).abs() / candidate.entry;
    let passed = distance >= dec!(0.04);
    CheckResult {
        name: "LiquidationDistance",
        passed,
        severity: Severity::Critical,
        message: format!("stop is {:.4} from liquidation price {}", distance, liq),
    }
}

fn check_daily_loss_limit(portfolio: &PortfolioState, config: &RiskConfig) -> CheckResult {
    let loss_pct = portfolio.daily_loss_pct();
    let passed = loss_pct >= -config.max_daily_loss_pct;
    CheckResult {
        name: "DailyLossLimit",
        passed,
        severity: Severity::Critical,
        message: format!("daily pnl {:.4} vs limit -{:.4}", loss_pct, config.max_daily_loss_pct),
    }
}

fn check_max_drawdown(portfolio: &PortfolioState, config: &RiskConfig) -> CheckResult {
    let drawdown = portfolio.drawdown_pct();
    let passed = drawdown <= config.max_drawdown_pct;
    CheckResult {
        name: "MaxDrawdown",
        passed,
        severity: Severity::Critical,
        message: format!("drawdown {:.4} vs limit {:.4}", drawdown, config.max_drawdown_pct),
    }
}

fn check_exposure_limit(candidate: &TradeCandidate, portfolio: &PortfolioState, config: &RiskConfig) -> CheckResult {
    let projected = if portfolio.current_equity > Decimal::ZERO {
        (portfolio.aggregate_margin() + candidate.margin_required) / portfolio.current_equity
    } else {
        Decimal::ZERO
    };
    let passed = projected <= config.max_exposure_pct;
    CheckResult {
        name: "ExposureLimit",
        passed,
        severity: Severity::Critical,
        message: format!("post-trade exposure {:.4} vs limit {:.4}", projected, config.max_exposure_pct),
    }
}

fn check_correlation_conflict(candidate: &TradeCandidate, portfolio: &PortfolioState) -> CheckResult {
    let conflicting = correlation::conflicting_symbol(candidate.symbol, portfolio.positions.keys());
    let passed = conflicting.is_none();
    CheckResult {
        name: "CorrelationConflict",
        passed,
        severity: Severity::Critical,
        message: match conflicting {
            Some(other) => format!("conflicts with open position {}", other),
            None => "no correlation conflict".into(),
        },
    }
}

#[derive(Debug, Default)]
pub struct SafetyCounters {
    pub total_checks: u64,
    pub total_rejections: u64,
    pub rejection_reasons: HashMap<String, u64>,
}

pub struct SafetyLayer {
    counters: Mutex<SafetyCounters>,
}

impl Default for SafetyLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyLayer {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(SafetyCounters::default()),
        }
    }

    /// Runs all nine checks in order. Any `Critical` failure aborts the
    /// trade; `Warning`s are recorded but don't. Returns whether the trade
    /// may proceed alongside the full ordered result list.
    pub fn validate_trade(
        &self,
        candidate: &TradeCandidate,
        portfolio: &PortfolioState,
        available_margin: Decimal,
        config: &RiskConfig,
    ) -> (bool, Vec<CheckResult>) {
        let results = vec![
            check_symbol_validity(candidate),
            check_minimum_order_size(candidate),
            check_price_reasonableness(candidate),
            check_margin_availability(candidate, available_margin),
            check_liquidation_distance(candidate),
            check_daily_loss_limit(portfolio, config),
            check_max_drawdown(portfolio, config),
            check_exposure_limit(candidate, portfolio, config),
            check_correlation_conflict(candidate, portfolio),
        ];

        let mut counters = self.counters.lock().unwrap();
        let mut can_execute = true;
        for result in &results {
            counters.total_checks += 1;
            if !result.passed {
                if result.severity == Severity::Critical {
                    can_execute = false;
                }
                counters.total_rejections += 1;
                *counters.rejection_reasons.entry(result.name.to_string()).or_insert(0) += 1;
            }
        }
        (can_execute, results)
    }

    pub fn snapshot_counters(&self) -> SafetyCounters {
        let counters = self.counters.lock().unwrap();
        SafetyCounters {
            total_checks: counters.total_checks,
            total_rejections: counters.total_rejections,
            rejection_reasons: counters.rejection_reasons.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn candidate() -> TradeCandidate<'static> {
        TradeCandidate {
            symbol: "cmt_btcusdt",
            direction: PositionDirection::Long,
            entry: dec!(100),
            stop_loss: dec!(90),
            take_profit: dec!(120),
            size: dec!(0.01),
            leverage: 10,
            margin_required: dec!(1),
        }
    }

    #[test]
    fn passes_all_checks_with_healthy_portfolio() {
        let layer = SafetyLayer::new();
        let portfolio = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let config = RiskConfig::default();
        let (ok, results) = layer.validate_trade(&candidate(), &portfolio, dec!(100), &config);
        assert!(ok);
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn daily_loss_limit_breach_is_critical_and_aborts() {
        let layer = SafetyLayer::new();
        let mut portfolio = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        portfolio.observe_equity(dec!(9690));
        let config = RiskConfig::default();
        let (ok, results) = layer.validate_trade(&candidate(), &portfolio, dec!(100), &config);
        assert!(!ok);
        let daily = results.iter().find(|r| r.name == "DailyLossLimit").unwrap();
        assert!(!daily.passed);
    }

    #[test]
    fn minimum_order_size_rejects_dust_quantity() {
        let layer = SafetyLayer::new();
        let portfolio = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let config = RiskConfig::default();
        let mut c = candidate();
        c.size = dec!(0.00001);
        let (ok, _) = layer.validate_trade(&c, &portfolio, dec!(100), &config);
        assert!(!ok);
    }

    #[test]
    fn counters_accumulate_rejections_across_calls() {
        let layer = SafetyLayer::new();
        let mut portfolio = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        portfolio.observe_equity(dec!(9690));
        let config = RiskConfig::default();
        let _ = layer.validate_trade(&candidate(), &portfolio, dec!(100), &config);
        let _ = layer.validate_trade(&candidate(), &portfolio, dec!(100), &config);
        let counters = layer.snapshot_counters();
        assert_eq!(*counters.rejection_reasons.get("DailyLossLimit").unwrap(), 2);
    }

    #[test]
    fn liquidation_distance_rejects_tight_stop_on_high_leverage() {
        let layer = SafetyLayer::new();
        let portfolio = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let config = RiskConfig::default();
        let mut c = candidate();
        c.leverage = 20;
        c.stop_loss = dec!(99.9);
        let (ok, results) = layer.validate_trade(&c, &portfolio, dec!(100), &config);
        assert!(!ok);
        assert!(!results.iter().find(|r| r.name == "LiquidationDistance").unwrap().passed);
    }
}
