use crate::domain::candle::{Candle, CandleSeries};
use crate::domain::errors::MarketDataError;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex,
};
use ta::{DataItem, Next};

const MIN_BARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

/// A snapshot derived from the tail of a series at one instant. Never
/// mutated after construction; one is built per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorState {
    pub price: Decimal,
    pub rsi: Decimal,
    pub ema9: Decimal,
    pub ema20: Decimal,
    pub ema50: Decimal,
    pub atr: Decimal,
    pub adx: Decimal,
    pub di_plus: Decimal,
    pub di_minus: Decimal,
    pub bb_upper: Decimal,
    pub bb_middle: Decimal,
    pub bb_lower: Decimal,
    pub bb_width: Decimal,
    pub bb_percent_b: Decimal,
    pub macd: Decimal,
    pub macd_signal: Decimal,
    pub macd_hist: Decimal,
    pub volume_z_score: Decimal,
    pub trend: Trend,
    pub volume_spike: bool,
}

fn dec(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

fn as_data_items(candles: &[Candle]) -> Vec<DataItem> {
    candles
        .iter()
        .filter_map(|c| {
            DataItem::builder()
                .open(c.open.to_f64()?)
                .high(c.high.to_f64()?)
                .low(c.low.to_f64()?)
                .close(c.close.to_f64()?)
                .volume(c.volume.to_f64()?)
                .build()
                .ok()
        })
        .collect()
}

/// Wilder-smoothed ADX/DI+/DI- over the tail window. `ta` 0.5 has no ADX
/// indicator; this mirrors the hand-rolled trend-strength approach the
/// rest of the stack uses for indicators it doesn't get for free.
fn average_directional_index(candles: &[Candle], period: usize) -> (f64, f64, f64) {
    if candles.len() < period + 1 {
        return (0.0, 0.0, 0.0);
    }
    let mut tr_sum = 0.0;
    let mut plus_dm_sum = 0.0;
    let mut minus_dm_sum = 0.0;
    let mut dx_values = Vec::new();

    let mut smoothed_tr = 0.0;
    let mut smoothed_plus_dm = 0.0;
    let mut smoothed_minus_dm = 0.0;

    for i in 1..candles.len() {
        let prev = &candles[i - 1];
        let cur = &candles[i];
        let up_move = (cur.high - prev.high).to_f64().unwrap_or(0.0);
        let down_move = (prev.low - cur.low).to_f64().unwrap_or(0.0);
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };

        let tr = (cur.high - cur.low)
            .to_f64()
            .unwrap_or(0.0)
            .max((cur.high - prev.close).abs().to_f64().unwrap_or(0.0))
            .max((cur.low - prev.close).abs().to_f64().unwrap_or(0.0));

        if i <= period {
            tr_sum += tr;
            plus_dm_sum += plus_dm;
            minus_dm_sum += minus_dm;
            if i == period {
                smoothed_tr = tr_sum;
                smoothed_plus_dm = plus_dm_sum;
                smoothed_minus_dm = minus_dm_sum;
                let di_plus = if smoothed_tr > 0.0 { 100.0 * smoothed_plus_dm / smoothed_tr } else { 0.0 };
                let di_minus = if smoothed_tr > 0.0 { 100.0 * smoothed_minus_dm / smoothed_tr } else { 0.0 };
                let dx = if di_plus + di_minus > 0.0 {
                    100.0 * (di_plus - di_minus).abs() / (di_plus + di_minus)
                } else {
                    0.0
                };
                dx_values.push(dx);
            }
            continue;
        }

        smoothed_tr = smoothed_tr - (smoothed_tr / period as f64) + tr;
        smoothed_plus_dm = smoothed_plus_dm - (smoothed_plus_dm / period as f64) + plus_dm;
        smoothed_minus_dm = smoothed_minus_dm - (smoothed_minus_dm / period as f64) + minus_dm;

        let di_plus = if smoothed_tr > 0.0 { 100.0 * smoothed_plus_dm / smoothed_tr } else { 0.0 };
        let di_minus = if smoothed_tr > 0.0 { 100.0 * smoothed_minus_dm / smoothed_tr } else { 0.0 };
        let dx = if di_plus + di_minus > 0.0 {
            100.0 * (di_plus - di_minus).abs() / (di_plus + di_minus)
        } else {
            0.0
        };
        dx_values.push(dx);
    }

    let adx = if dx_values.is_empty() {
        0.0
    } else {
        let window = dx_values.len().min(period);
        let tail = &dx_values[dx_values.len() - window..];
        tail.iter().sum::<f64>() / window as f64
    };

    let total_tr = if smoothed_tr > 0.0 { smoothed_tr } else { tr_sum.max(1e-9) };
    let di_plus = 100.0 * smoothed_plus_dm.max(plus_dm_sum) / total_tr;
    let di_minus = 100.0 * smoothed_minus_dm.max(minus_dm_sum) / total_tr;
    (adx, di_plus, di_minus)
}

fn volume_z_score(candles: &[Candle]) -> (f64, bool) {
    let window = &candles[candles.len().saturating_sub(20)..];
    let volumes: Vec<f64> = window.iter().filter_map(|c| c.volume.to_f64()).collect();
    if volumes.len() < 2 {
        return (0.0, false);
    }
    let mean: f64 = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let variance: f64 = volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / volumes.len() as f64;
    let std_dev = variance.sqrt();
    let last = *volumes.last().unwrap();
    let z = if std_dev > 0.0 { (last - mean) / std_dev } else { 0.0 };
    let spike = last > 1.5 * mean;
    (z, spike)
}

/// Pure function `candles -> IndicatorState`. Requires >= 60 bars of warmup;
/// all outputs are finite by construction once that warmup is met.
pub fn compute(series: &CandleSeries) -> Result<IndicatorState, MarketDataError> {
    if series.len() < MIN_BARS {
        return Err(MarketDataError::InsufficientData {
            have: series.len(),
            need: MIN_BARS,
        });
    }

    let items = as_data_items(&series.candles);
    if items.len() < MIN_BARS {
        return Err(MarketDataError::InsufficientData {
            have: items.len(),
            need: MIN_BARS,
        });
    }

    let mut ema9 = ExponentialMovingAverage::new(9).expect("valid period");
    let mut ema20 = ExponentialMovingAverage::new(20).expect("valid period");
    let mut ema50 = ExponentialMovingAverage::new(50).expect("valid period");
    let mut rsi14 = RelativeStrengthIndex::new(14).expect("valid period");
    let mut atr14 = AverageTrueRange::new(14).expect("valid period");
    let mut bb20 = BollingerBands::new(20, 2.0).expect("valid period");
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).expect("valid periods");

    let (mut ema9_v, mut ema20_v, mut ema50_v, mut rsi_v, mut atr_v) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut bb_upper, mut bb_middle, mut bb_lower) = (0.0, 0.0, 0.0);
    let (mut macd_v, mut macd_sig_v) = (0.0, 0.0);

    for item in &items {
        ema9_v = ema9.next(item);
        ema20_v = ema20.next(item);
        ema50_v = ema50.next(item);
        rsi_v = rsi14.next(item);
        atr_v = atr14.next(item);
        let bb_out = bb20.next(item);
        bb_upper = bb_out.upper;
        bb_middle = bb_out.average;
        bb_lower = bb_out.lower;
        let macd_out = macd.next(item);
        macd_v = macd_out.macd;
        macd_sig_v = macd_out.signal;
    }

    let macd_hist_v = macd_v - macd_sig_v;
    let bb_width = if bb_middle != 0.0 { (bb_upper - bb_lower) / bb_middle } else { 0.0 };
    let last_close = series.last().expect("non-empty").close.to_f64().unwrap_or(0.0);
    let bb_percent_b = if bb_upper != bb_lower {
        (last_close - bb_lower) / (bb_upper - bb_lower)
    } else {
        0.5
    };

    let (adx, di_plus, di_minus) = average_directional_index(&series.candles, 14);
    let (vz, volume_spike) = volume_z_score(&series.candles);

    let price = series.last().expect("non-empty").close;
    let trend = if price.to_f64().unwrap_or(0.0) > ema20_v && ema20_v > ema50_v {
        Trend::Bullish
    } else if price.to_f64().unwrap_or(0.0) < ema20_v && ema20_v < ema50_v {
        Trend::Bearish
    } else {
        Trend::Neutral
    };

    Ok(IndicatorState {
        price,
        rsi: dec(rsi_v),
        ema9: dec(ema9_v),
        ema20: dec(ema20_v),
        ema50: dec(ema50_v),
        atr: dec(atr_v),
        adx: dec(adx),
        di_plus: dec(di_plus),
        di_minus: dec(di_minus),
        bb_upper: dec(bb_upper),
        bb_middle: dec(bb_middle),
        bb_lower: dec(bb_lower),
        bb_width: dec(bb_width),
        bb_percent_b: dec(bb_percent_b),
        macd: dec(macd_v),
        macd_signal: dec(macd_sig_v),
        macd_hist: dec(macd_hist_v),
        volume_z_score: dec(vz),
        trend,
        volume_spike,
    })
}
