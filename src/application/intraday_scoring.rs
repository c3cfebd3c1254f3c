//! §4.8 intraday signal scoring: four independent detectors over recent
//! indicator/candle history, combined by a first-match-wins selection order.
//! Feeds the institutional path of the synthesizer (C8).

use crate::domain::candle::Candle;
use crate::domain::indicators::IndicatorState;
use crate::domain::signal::{Direction, Signal, SignalKind};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;

fn percentile_rank(current: f64, history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.5;
    }
    let below = history.iter().filter(|&&v| v <= current).count();
    below as f64 / history.len() as f64
}

fn volatility_compression_score(state: &IndicatorState, bb_width_history: &[f64]) -> f64 {
    let width = state.bb_width.to_f64().unwrap_or(0.0);
    let percentile = percentile_rank(width, bb_width_history);
    (1.0 - percentile) * 100.0
}

fn slope5(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len().min(5);
    let tail = &values[values.len() - n..];
    (tail[tail.len() - 1] - tail[0]) / tail[0].abs().max(1e-9)
}

fn momentum_score(state: &IndicatorState, ema21_history: &[f64]) -> (f64, Direction) {
    let ema9 = state.ema9.to_f64().unwrap_or(0.0);
    let ema20 = state.ema20.to_f64().unwrap_or(0.0);
    let ema50 = state.ema50.to_f64().unwrap_or(0.0);
    let macd = state.macd.to_f64().unwrap_or(0.0);
    let macd_signal = state.macd_signal.to_f64().unwrap_or(0.0);
    let macd_hist = state.macd_hist.to_f64().unwrap_or(0.0);
    let adx = state.adx.to_f64().unwrap_or(0.0);
    let slope = slope5(ema21_history);

    let ema_bullish = ema9 > ema20 && ema20 > ema50;
    let ema_bearish = ema9 < ema20 && ema20 < ema50;
    let macd_bullish = macd > macd_signal && macd_hist > 0.0;
    let macd_bearish = macd < macd_signal && macd_hist < 0.0;

    let bullish = ema_bullish || macd_bullish;
    let bearish = ema_bearish || macd_bearish;
    if !bullish && !bearish {
        return (0.0, Direction::Neutral);
    }

    let mut score = 40.0;
    if bullish {
        if ema_bullish {
            score += 20.0;
        }
        if macd_bullish {
            score += 20.0;
        }
    } else {
        if ema_bearish {
            score += 20.0;
        }
        if macd_bearish {
            score += 20.0;
        }
    }
    score += 1.5 * slope.abs() * 100.0;
    score += 0.3 * (adx / 25.0 * 100.0).min(100.0);
    let direction = if bullish { Direction::Long } else { Direction::Short };
    (score.min(100.0), direction)
}

fn breakout_score(candles: &[Candle], state: &IndicatorState, adx_history: &[f64]) -> (f64, Direction) {
    if candles.len() < 2 {
        return (0.0, Direction::Neutral);
    }
    let last = &candles[candles.len() - 1];
    let prev = &candles[candles.len() - 2];
    let upper = state.bb_upper;
    let lower = state.bb_lower;

    let prev_inside = prev.close >= lower && prev.close <= upper;
    let breaks_up = last.close > upper && prev_inside;
    let breaks_down = last.close < lower && prev_inside;
    if !breaks_up && !breaks_down {
        return (0.0, Direction::Neutral);
    }

    let z = state.volume_z_score.to_f64().unwrap_or(0.0);
    let mut score = 50.0 + (z / 3.0 * 30.0).clamp(0.0, 30.0);
    if adx_history.len() >= 3 && adx_history[adx_history.len() - 1] > adx_history[adx_history.len() - 3] {
        score += 20.0;
    }
    let direction = if breaks_up { Direction::Long } else { Direction::Short };
    (score.min(100.0), direction)
}

fn snapback_score(candles: &[Candle], state: &IndicatorState) -> (f64, Direction) {
    if candles.len() < 4 {
        return (0.0, Direction::Neutral);
    }
    let window = &candles[candles.len() - 4..];
    let rsi = state.rsi.to_f64().unwrap_or(50.0);

    for i in 0..window.len() - 1 {
        let bar = &window[i];
        let next = &window[i + 1];
        let bar_open = bar.open.to_f64().unwrap_or(0.0);
        let bar_close = bar.close.to_f64().unwrap_or(0.0);
        let next_open = next.open.to_f64().unwrap_or(0.0);
        let next_close = next.close.to_f64().unwrap_or(0.0);
        if bar_open <= 0.0 || next_open <= 0.0 {
            continue;
        }
        let adverse = (bar_close - bar_open) / bar_open;
        let recovery = (next_close - next_open) / next_open;

        let adverse_down_recover_up = adverse <= -0.02 && recovery >= 0.01 && rsi < 30.0;
        let adverse_up_recover_down = adverse >= 0.02 && recovery <= -0.01 && rsi > 70.0;

        if adverse_down_recover_up || adverse_up_recover_down {
            let z = state.volume_z_score.to_f64().unwrap_or(0.0);
            let mut score = 50.0;
            if z > 2.0 {
                score += 20.0;
            }
            let rsi_distance = if adverse_down_recover_up { 30.0 - rsi } else { rsi - 70.0 };
            score += rsi_distance.max(0.0);
            let direction = if adverse_down_recover_up { Direction::Long } else { Direction::Short };
            return (score.min(100.0), direction);
        }
    }
    (0.0, Direction::Neutral)
}

/// Scores the four detectors and synthesizes a `Signal` by first-match-wins
/// priority: Breakout > TrendFollow > LiquidationSnapback > None.
pub fn score_signal(
    candles: &[Candle],
    state: &IndicatorState,
    bb_width_history: &[f64],
    ema21_history: &[f64],
    adx_history: &[f64],
) -> Signal {
    let compression = volatility_compression_score(state, bb_width_history);
    let (momentum, momentum_dir) = momentum_score(state, ema21_history);
    let (breakout, breakout_dir) = breakout_score(candles, state, adx_history);
    let (snapback, snapback_dir) = snapback_score(candles, state);

    let mut factors = HashMap::new();
    factors.insert("compression".to_string(), compression);
    factors.insert("momentum".to_string(), momentum);
    factors.insert("breakout".to_string(), breakout);
    factors.insert("snapback".to_string(), snapback);

    let (kind, direction, strength) = if breakout > 50.0 {
        (SignalKind::Breakout, breakout_dir, breakout)
    } else if momentum > 50.0 {
        (SignalKind::TrendFollow, momentum_dir, momentum)
    } else if snapback > 50.0 {
        (SignalKind::LiquidationSnapback, snapback_dir, snapback)
    } else {
        (SignalKind::None, Direction::Neutral, 0.0)
    };

    if matches!(kind, SignalKind::None) {
        let mut flat = Signal::flat();
        flat.factors = factors;
        return flat;
    }

    let entry = state.price;
    let atr = state.atr;
    let (stop_loss, take_profit) = match direction {
        Direction::Long => (entry - atr * Decimal::from_f64(1.5).unwrap(), entry + atr * Decimal::from_f64(3.0).unwrap()),
        Direction::Short => (entry + atr * Decimal::from_f64(1.5).unwrap(), entry - atr * Decimal::from_f64(3.0).unwrap()),
        Direction::Neutral => (entry, entry),
    };

    Signal {
        direction,
        kind,
        strength,
        entry,
        stop_loss,
        take_profit,
        risk_reward: 2.0,
        factors,
        meta: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::CandleSource;
    use crate::domain::indicators::Trend;
    use rust_decimal_macros::dec;

    fn candle(open: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: Decimal::from_f64(open).unwrap(),
            high: Decimal::from_f64(open.max(close) + 1.0).unwrap(),
            low: Decimal::from_f64(open.min(close) - 1.0).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            volume: dec!(100),
        }
    }

    fn base_state() -> IndicatorState {
        IndicatorState {
            price: dec!(100),
            rsi: dec!(50),
            ema9: dec!(100),
            ema20: dec!(100),
            ema50: dec!(100),
            atr: dec!(1),
            adx: dec!(20),
            di_plus: dec!(20),
            di_minus: dec!(15),
            bb_upper: dec!(105),
            bb_middle: dec!(100),
            bb_lower: dec!(95),
            bb_width: dec!(0.05),
            bb_percent_b: dec!(0.5),
            macd: dec!(0),
            macd_signal: dec!(0),
            macd_hist: dec!(0),
            volume_z_score: dec!(0),
            trend: Trend::Neutral,
            volume_spike: false,
        }
    }

    #[test]
    fn no_detector_triggers_yields_none_kind() {
        let candles = vec![candle(100.0, 100.0), candle(100.0, 100.5)];
        let state = base_state();
        let signal = score_signal(&candles, &state, &[0.1, 0.2, 0.3], &[100.0, 100.0], &[20.0, 20.0, 20.0]);
        assert_eq!(signal.kind, SignalKind::None);
        assert_eq!(signal.direction, Direction::Neutral);
    }

    #[test]
    fn breakout_above_band_with_prior_bar_inside_triggers() {
        let mut state = base_state();
        state.bb_upper = dec!(101);
        state.bb_lower = dec!(95);
        state.volume_z_score = dec!(2.0);
        let candles = vec![candle(99.0, 100.0), candle(100.0, 103.0)];
        let signal = score_signal(&candles, &state, &[0.1, 0.2], &[100.0, 101.0], &[15.0, 18.0, 22.0]);
        assert_eq!(signal.kind, SignalKind::Breakout);
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.strength > 50.0);
    }

    #[test]
    fn snapback_requires_adverse_then_recovery_with_rsi_cross() {
        let mut state = base_state();
        state.rsi = dec!(25);
        let candles = vec![
            candle(100.0, 100.0),
            candle(100.0, 97.0),
            candle(97.0, 98.5),
            candle(98.5, 99.0),
        ];
        let signal = score_signal(&candles, &state, &[0.1, 0.2], &[100.0, 99.0], &[20.0, 20.0, 20.0]);
        assert_eq!(signal.kind, SignalKind::LiquidationSnapback);
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn ema_alignment_alone_triggers_trend_follow_without_macd_confirmation() {
        let mut state = base_state();
        state.ema9 = dec!(103);
        state.ema20 = dec!(101);
        state.ema50 = dec!(99);
        // MACD deliberately unaligned so only the EMA trigger can fire.
        state.macd = dec!(0);
        state.macd_signal = dec!(0.5);
        state.macd_hist = dec!(-0.1);
        let candles = vec![candle(100.0, 100.0), candle(100.0, 100.5)];
        let signal = score_signal(&candles, &state, &[0.1, 0.2, 0.3], &[100.0, 101.0, 102.0, 103.0, 104.0], &[20.0, 20.0, 20.0]);
        assert_eq!(signal.kind, SignalKind::TrendFollow);
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.strength >= 60.0);
    }
}
