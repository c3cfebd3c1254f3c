//! Position and portfolio state (C11). `Position` is created by an open,
//! mutated only by the position monitor, and destroyed by a close — no other
//! writer is permitted. Invariants are enforced at construction and on every
//! mutation site, never reconstructed ad hoc downstream.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionDirection {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Sentinel,
    Institutional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub direction: PositionDirection,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub trailing_stop: Option<Decimal>,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub opened_at: DateTime<Utc>,
    pub order_id: String,
    pub source: PositionSource,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    pub atr_at_entry: Decimal,
    pub meta: HashMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum PositionInvariantError {
    #[error("size must be positive, got {0}")]
    NonPositiveSize(Decimal),
    #[error("long position requires stop_loss < entry < take_profit (got {stop_loss}, {entry}, {take_profit})")]
    LongOrderingViolated {
        stop_loss: Decimal,
        entry: Decimal,
        take_profit: Decimal,
    },
    #[error("short position requires take_profit < entry < stop_loss (got {take_profit}, {entry}, {stop_loss})")]
    ShortOrderingViolated {
        stop_loss: Decimal,
        entry: Decimal,
        take_profit: Decimal,
    },
}

impl Position {
    pub fn open(
        symbol: String,
        side: Side,
        direction: PositionDirection,
        size: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        leverage: u32,
        atr_at_entry: Decimal,
        order_id: String,
        source: PositionSource,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, PositionInvariantError> {
        if size <= Decimal::ZERO {
            return Err(PositionInvariantError::NonPositiveSize(size));
        }
        match direction {
            PositionDirection::Long => {
                if !(stop_loss < entry_price && entry_price < take_profit) {
                    return Err(PositionInvariantError::LongOrderingViolated {
                        stop_loss,
                        entry: entry_price,
                        take_profit,
                    });
                }
            }
            PositionDirection::Short => {
                if !(take_profit < entry_price && entry_price < stop_loss) {
                    return Err(PositionInvariantError::ShortOrderingViolated {
                        stop_loss,
                        entry: entry_price,
                        take_profit,
                    });
                }
            }
        }
        let margin_used = size * entry_price / Decimal::from(leverage.max(1));
        Ok(Self {
            symbol,
            side,
            direction,
            size,
            entry_price,
            current_price: entry_price,
            stop_loss,
            take_profit,
            trailing_stop: None,
            leverage,
            margin_used,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            opened_at,
            order_id,
            source,
            highest_price: entry_price,
            lowest_price: entry_price,
            atr_at_entry,
            meta: HashMap::new(),
        })
    }

    /// Folds a new observed price into the running high/low/PnL bookkeeping.
    /// Called exclusively by the position monitor under its lock.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        if price > self.highest_price {
            self.highest_price = price;
        }
        if price < self.lowest_price {
            self.lowest_price = price;
        }
        let signed_diff = match self.direction {
            PositionDirection::Long => price - self.entry_price,
            PositionDirection::Short => self.entry_price - price,
        };
        self.unrealized_pnl = signed_diff * self.size;
        self.unrealized_pnl_pct = if self.entry_price != Decimal::ZERO {
            signed_diff / self.entry_price * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
    }

    pub fn risk_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn hours_open(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub current_equity: Decimal,
    pub peak_equity: Decimal,
    pub daily_start_equity: Decimal,
    pub last_reset_date: Option<NaiveDate>,
    pub positions: HashMap<String, Position>,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
}

impl PortfolioState {
    pub fn new(starting_equity: Decimal, today: NaiveDate) -> Self {
        Self {
            current_equity: starting_equity,
            peak_equity: starting_equity,
            daily_start_equity: starting_equity,
            last_reset_date: Some(today),
            positions: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
        }
    }

    /// Snapshots `daily_start_equity` on the first observation after a UTC
    /// day rollover, before any kill-switch evaluation that cycle.
    pub fn roll_day_if_needed(&mut self, today: NaiveDate) {
        if self.last_reset_date != Some(today) {
            self.daily_start_equity = self.current_equity;
            self.daily_pnl = Decimal::ZERO;
            self.last_reset_date = Some(today);
        }
    }

    /// Records a new equity observation, advancing the peak monotonically.
    pub fn observe_equity(&mut self, equity: Decimal) {
        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.daily_pnl = equity - self.daily_start_equity;
    }

    pub fn daily_loss_pct(&self) -> Decimal {
        if self.daily_start_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.daily_pnl / self.daily_start_equity
    }

    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.peak_equity - self.current_equity) / self.peak_equity
    }

    pub fn aggregate_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.margin_used).sum()
    }

    pub fn exposure_pct(&self) -> Decimal {
        if self.current_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.aggregate_margin() / self.current_equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn open_computes_margin_used() {
        let p = Position::open(
            "cmt_btcusdt".into(),
            Side::Buy,
            PositionDirection::Long,
            dec!(1),
            dec!(100),
            dec!(98),
            dec!(104),
            10,
            dec!(1),
            "order-1".into(),
            PositionSource::Sentinel,
            now(),
        )
        .unwrap();
        assert_eq!(p.margin_used, dec!(10));
    }

    #[test]
    fn open_rejects_non_positive_size() {
        let result = Position::open(
            "cmt_btcusdt".into(),
            Side::Buy,
            PositionDirection::Long,
            dec!(0),
            dec!(100),
            dec!(98),
            dec!(104),
            10,
            dec!(1),
            "order-1".into(),
            PositionSource::Sentinel,
            now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn open_rejects_long_with_bad_ordering() {
        let result = Position::open(
            "cmt_btcusdt".into(),
            Side::Buy,
            PositionDirection::Long,
            dec!(1),
            dec!(100),
            dec!(105),
            dec!(104),
            10,
            dec!(1),
            "order-1".into(),
            PositionSource::Sentinel,
            now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn update_price_tracks_high_and_low_monotonically() {
        let mut p = Position::open(
            "cmt_btcusdt".into(),
            Side::Buy,
            PositionDirection::Long,
            dec!(1),
            dec!(100),
            dec!(98),
            dec!(106),
            1,
            dec!(1),
            "order-1".into(),
            PositionSource::Sentinel,
            now(),
        )
        .unwrap();
        p.update_price(dec!(101.5));
        p.update_price(dec!(103));
        p.update_price(dec!(102));
        assert_eq!(p.highest_price, dec!(103));
        assert_eq!(p.lowest_price, dec!(100));
    }

    #[test]
    fn peak_equity_never_decreases() {
        let mut state = PortfolioState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        state.observe_equity(dec!(10500));
        state.observe_equity(dec!(9800));
        assert_eq!(state.peak_equity, dec!(10500));
    }

    #[test]
    fn roll_day_resets_daily_start_equity_once_per_day() {
        let day1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let mut state = PortfolioState::new(dec!(10000), day1);
        state.observe_equity(dec!(9700));
        state.roll_day_if_needed(day2);
        assert_eq!(state.daily_start_equity, dec!(9700));
        assert_eq!(state.daily_pnl, dec!(0));
    }
}
