//! C9: position sizing, portfolio accounting, and kill-switch enforcement.
//! Grounded on the sizing/trailing-stop/circuit-breaker services' shapes but
//! reworked around leveraged futures positions instead of equity shares.

use crate::domain::errors::RiskViolation;
use crate::domain::position::{PortfolioState, Position, PositionDirection};
use crate::domain::risk::config::RiskConfig;
use crate::domain::risk::correlation;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Default volatility multiplier before it is clipped into the configured
/// `[atr_stop_min_multiplier, atr_stop_max_multiplier]` band.
const DEFAULT_VOLATILITY_MULTIPLIER: Decimal = dec!(1.5);

pub struct SizedEntry {
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub margin_required: Decimal,
}

pub struct RiskManager {
    pub config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    fn stop_distance(&self, atr: Decimal) -> Decimal {
        let min_distance = atr * self.config.atr_stop_min_multiplier;
        let max_distance = atr * self.config.atr_stop_max_multiplier;
        let preferred = atr * DEFAULT_VOLATILITY_MULTIPLIER;
        preferred.max(min_distance).min(max_distance)
    }

    /// Stop/target off the clamped ATR multiplier band, independent of
    /// sizing — used when size is derived some other way (e.g. a fixed
    /// notional fraction of balance).
    pub fn stop_and_target(&self, direction: PositionDirection, entry: Decimal, atr: Decimal) -> (Decimal, Decimal) {
        let distance = self.stop_distance(atr);
        match direction {
            PositionDirection::Long => (entry - distance, entry + distance * self.config.default_risk_reward),
            PositionDirection::Short => (entry + distance, entry - distance * self.config.default_risk_reward),
        }
    }

    /// §4.9 position sizing: clamp stop distance into the ATR multiplier
    /// band, size from 1.25% equity risk, down-scale to available margin.
    pub fn size_position(
        &self,
        direction: PositionDirection,
        entry: Decimal,
        atr: Decimal,
        equity: Decimal,
        available_margin: Decimal,
        leverage: u32,
    ) -> SizedEntry {
        let stop_distance = self.stop_distance(atr);

        let risk_amount = equity * self.config.risk_per_trade_pct;
        let mut size = if stop_distance > Decimal::ZERO {
            risk_amount / stop_distance
        } else {
            Decimal::ZERO
        };

        let leverage_dec = Decimal::from(leverage.max(1));
        let mut margin_required = size * entry / leverage_dec;
        if margin_required > available_margin && margin_required > Decimal::ZERO {
            let scale = available_margin / margin_required;
            size *= scale;
            margin_required = available_margin;
        }

        let (stop_loss, take_profit) = self.stop_and_target(direction, entry, atr);

        SizedEntry {
            size,
            stop_loss,
            take_profit,
            margin_required,
        }
    }

    /// §4.9 gates, evaluated independently: daily loss, drawdown, correlation,
    /// max concurrent positions, and post-trade exposure.
    pub fn can_open_position(
        &self,
        portfolio: &PortfolioState,
        candidate_symbol: &str,
        candidate_margin: Decimal,
    ) -> Result<(), RiskViolation> {
        let daily_loss_pct = portfolio.daily_loss_pct();
        if daily_loss_pct < -self.config.max_daily_loss_pct {
            return Err(RiskViolation::DailyLossLimit {
                loss_pct: daily_loss_pct,
                limit_pct: self.config.max_daily_loss_pct,
            });
        }

        let drawdown = portfolio.drawdown_pct();
        if drawdown > self.config.max_drawdown_pct {
            return Err(RiskViolation::MaxDrawdown {
                drawdown_pct: drawdown,
                limit_pct: self.config.max_drawdown_pct,
            });
        }

        if portfolio.positions.len() >= self.config.max_concurrent_positions {
            return Err(RiskViolation::MaxConcurrentPositions {
                open: portfolio.positions.len(),
                max: self.config.max_concurrent_positions,
            });
        }

        if let Some(conflicting) = correlation::conflicting_symbol(candidate_symbol, portfolio.positions.keys()) {
            return Err(RiskViolation::CorrelationConflict {
                symbol: candidate_symbol.to_string(),
                group: correlation::group_for(candidate_symbol).unwrap_or("?").to_string(),
                conflicting,
            });
        }

        if candidate_margin <= Decimal::ZERO {
            return Err(RiskViolation::ZeroSize {
                symbol: candidate_symbol.to_string(),
            });
        }

        let projected_exposure = if portfolio.current_equity > Decimal::ZERO {
            (portfolio.aggregate_margin() + candidate_margin) / portfolio.current_equity
        } else {
            Decimal::ZERO
        };
        if projected_exposure > self.config.max_exposure_pct {
            return Err(RiskViolation::ExposureLimit {
                exposure_pct: projected_exposure,
                limit_pct: self.config.max_exposure_pct,
            });
        }

        Ok(())
    }

    /// §4.11 trailing stop: activates only once unrealized profit >= 1R,
    /// tightens the working stop, never loosens it.
    pub fn trailing_stop_candidate(&self, position: &Position) -> Option<Decimal> {
        let r = position.risk_unit();
        if r <= Decimal::ZERO {
            return None;
        }
        let profit = match position.direction {
            PositionDirection::Long => position.current_price - position.entry_price,
            PositionDirection::Short => position.entry_price - position.current_price,
        };
        if profit < r {
            return None;
        }
        let multiplier = self.config.trailing_stop_atr_multiplier;
        let candidate = match position.direction {
            PositionDirection::Long => position.highest_price - position.atr_at_entry * multiplier,
            PositionDirection::Short => position.lowest_price + position.atr_at_entry * multiplier,
        };
        let tightens = match position.direction {
            PositionDirection::Long => position
                .trailing_stop
                .map(|s| candidate > s)
                .unwrap_or(candidate > position.stop_loss),
            PositionDirection::Short => position
                .trailing_stop
                .map(|s| candidate < s)
                .unwrap_or(candidate < position.stop_loss),
        };
        if tightens { Some(candidate) } else { position.trailing_stop }
    }

    /// §4.9 exit policy: stop/target touch, or the 24h time stop.
    pub fn should_exit(&self, position: &Position, now: chrono::DateTime<chrono::Utc>) -> Option<&'static str> {
        let working_stop = position.trailing_stop.unwrap_or(position.stop_loss);
        match position.direction {
            PositionDirection::Long => {
                if position.current_price <= working_stop {
                    return Some("stop_loss");
                }
                if position.current_price >= position.take_profit {
                    return Some("take_profit");
                }
            }
            PositionDirection::Short => {
                if position.current_price >= working_stop {
                    return Some("stop_loss");
                }
                if position.current_price <= position.take_profit {
                    return Some("take_profit");
                }
            }
        }
        if position.hours_open(now) >= self.config.max_hold_hours as f64 {
            return Some("time_stop");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default())
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn open_position(symbol: &str, direction: PositionDirection, size: Decimal) -> Position {
        Position::open(
            symbol.into(),
            crate::domain::position::Side::Buy,
            direction,
            size,
            dec!(100),
            dec!(98),
            dec!(104),
            1,
            dec!(1),
            "o1".into(),
            crate::domain::position::PositionSource::Sentinel,
            now(),
        )
        .unwrap()
    }

    #[test]
    fn sizing_scales_down_when_margin_insufficient() {
        let m = manager();
        let sized = m.size_position(PositionDirection::Long, dec!(100), dec!(1), dec!(10000), dec!(5), 10);
        assert!(sized.margin_required <= dec!(5));
    }

    #[test]
    fn kill_switch_blocks_on_daily_loss() {
        let m = manager();
        let mut portfolio = PortfolioState::new(dec!(10000), chrono::Utc::now().date_naive());
        portfolio.daily_start_equity = dec!(10000);
        portfolio.observe_equity(dec!(9690));
        let result = m.can_open_position(&portfolio, "cmt_btcusdt", dec!(100));
        assert!(matches!(result, Err(RiskViolation::DailyLossLimit { .. })));
    }

    #[test]
    fn correlation_conflict_blocks_same_group() {
        let mut portfolio = PortfolioState::new(dec!(10000), chrono::Utc::now().date_naive());
        portfolio
            .positions
            .insert("cmt_btcusdt".into(), open_position("cmt_btcusdt", PositionDirection::Long, dec!(1)));
        let config = RiskConfig {
            max_concurrent_positions: 5,
            ..RiskConfig::default()
        };
        let m2 = RiskManager::new(config);
        let result = m2.can_open_position(&portfolio, "cmt_ethusdt", dec!(10));
        assert!(matches!(result, Err(RiskViolation::CorrelationConflict { .. })));
    }

    #[test]
    fn trailing_stop_promotes_once_at_one_r_and_holds_when_not_tighter() {
        let m = manager();
        let mut position = open_position("cmt_btcusdt", PositionDirection::Long, dec!(1));
        position.take_profit = dec!(106);

        position.update_price(dec!(101.5));
        assert!(m.trailing_stop_candidate(&position).is_none());

        position.update_price(dec!(103));
        let candidate = m.trailing_stop_candidate(&position).unwrap();
        assert_eq!(candidate, dec!(101));
        position.trailing_stop = Some(candidate);

        position.update_price(dec!(102));
        let candidate2 = m.trailing_stop_candidate(&position);
        assert_eq!(candidate2, Some(dec!(101)));
    }

    #[test]
    fn should_exit_detects_stop_touch() {
        let m = manager();
        let mut position = open_position("cmt_btcusdt", PositionDirection::Long, dec!(1));
        position.take_profit = dec!(106);
        position.update_price(dec!(97.5));
        assert_eq!(m.should_exit(&position, now()), Some("stop_loss"));
    }
}
