//! Regime classification (C7): a composite of trend strength, Bollinger-width
//! compression, and realized volatility over the indicator tail. Deterministic
//! given the same indicator history; no network or clock dependency.

use crate::domain::indicators::IndicatorState;
use crate::domain::signal::SignalKind;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Trending,
    MeanReverting,
    Compressed,
    Chaotic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub confidence: f64,
    pub allowed: HashSet<SignalKind>,
}

fn allowed_kinds(regime: Regime) -> HashSet<SignalKind> {
    match regime {
        Regime::Trending => [SignalKind::TrendFollow, SignalKind::Breakout].into_iter().collect(),
        Regime::MeanReverting => [SignalKind::MeanRevert, SignalKind::LiquidationSnapback]
            .into_iter()
            .collect(),
        Regime::Compressed => [SignalKind::Breakout].into_iter().collect(),
        Regime::Chaotic => HashSet::new(),
    }
}

fn bb_width_percentile(current: f64, history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.5;
    }
    let below = history.iter().filter(|&&w| w <= current).count();
    below as f64 / history.len() as f64
}

fn realized_volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Classifies the regime at the point `state` was computed, using the
/// trailing window of Bollinger widths and bar-over-bar returns that produced
/// it. `bb_width_history` and `returns` should cover the same lookback (last
/// 20 bars) the indicator engine used.
pub fn detect(state: &IndicatorState, bb_width_history: &[f64], returns: &[f64]) -> RegimeState {
    let adx = state.adx.to_f64().unwrap_or(0.0);
    let bb_width = state.bb_width.to_f64().unwrap_or(0.0);
    let percentile = bb_width_percentile(bb_width, bb_width_history);
    let vol = realized_volatility(returns);

    const COMPRESSION_PERCENTILE: f64 = 0.20;
    const TREND_ADX: f64 = 25.0;
    const CHAOTIC_VOL: f64 = 0.06;

    let (regime, confidence) = if vol > CHAOTIC_VOL && adx < TREND_ADX {
        (Regime::Chaotic, (vol / CHAOTIC_VOL * 50.0).min(100.0))
    } else if percentile <= COMPRESSION_PERCENTILE {
        (Regime::Compressed, ((COMPRESSION_PERCENTILE - percentile) / COMPRESSION_PERCENTILE * 100.0).clamp(0.0, 100.0))
    } else if adx >= TREND_ADX {
        (Regime::Trending, (50.0 + (adx - TREND_ADX)).min(100.0))
    } else {
        (Regime::MeanReverting, (60.0 - adx).clamp(0.0, 100.0))
    };

    RegimeState {
        regime,
        confidence,
        allowed: allowed_kinds(regime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::Trend;
    use rust_decimal_macros::dec;

    fn state(adx: f64, bb_width: f64) -> IndicatorState {
        IndicatorState {
            price: dec!(100),
            rsi: dec!(50),
            ema9: dec!(100),
            ema20: dec!(100),
            ema50: dec!(100),
            atr: dec!(1),
            adx: rust_decimal::Decimal::try_from(adx).unwrap(),
            di_plus: dec!(20),
            di_minus: dec!(15),
            bb_upper: dec!(105),
            bb_middle: dec!(100),
            bb_lower: dec!(95),
            bb_width: rust_decimal::Decimal::try_from(bb_width).unwrap(),
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
    fn strong_adx_classified_trending() {
        let s = state(35.0, 0.10);
        let history = vec![0.08, 0.09, 0.10, 0.11, 0.12];
        let regime = detect(&s, &history, &[0.001, -0.001, 0.002]);
        assert_eq!(regime.regime, Regime::Trending);
        assert!(regime.allowed.contains(&SignalKind::TrendFollow));
    }

    #[test]
    fn low_percentile_bb_width_classified_compressed() {
        let s = state(15.0, 0.02);
        let history = vec![0.10, 0.12, 0.15, 0.20, 0.25];
        let regime = detect(&s, &history, &[0.0005, 0.0003]);
        assert_eq!(regime.regime, Regime::Compressed);
        assert!(regime.allowed.contains(&SignalKind::Breakout));
    }

    #[test]
    fn high_volatility_with_weak_trend_classified_chaotic() {
        let s = state(10.0, 0.30);
        let history = vec![0.10, 0.15, 0.20];
        let returns = vec![0.08, -0.09, 0.07, -0.06];
        let regime = detect(&s, &history, &returns);
        assert_eq!(regime.regime, Regime::Chaotic);
        assert!(regime.allowed.is_empty());
    }

    #[test]
    fn mean_reverting_when_neither_trending_nor_compressed_nor_chaotic() {
        let s = state(15.0, 0.18);
        let history = vec![0.10, 0.12, 0.15, 0.20, 0.25];
        let regime = detect(&s, &history, &[0.001, -0.001]);
        assert_eq!(regime.regime, Regime::MeanReverting);
        assert!(regime.allowed.contains(&SignalKind::MeanRevert));
    }
}
