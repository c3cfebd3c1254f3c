//! C4: binary next-bar-direction classifier. Refits on demand each cycle from
//! the trailing window of candles — no cross-cycle state is required, so the
//! simplest correct implementation is train-then-predict-then-discard.

use crate::domain::candle::CandleSeries;
use crate::domain::classifier::{Classifier, ClassifierPrediction, Direction};
use rust_decimal::prelude::ToPrimitive;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::LogisticRegression;

const MIN_TRAINING_BARS: usize = 100;

/// Features: [rsi-proxy via RSI-14 on the fly, ema20, log-return,
/// volume/rolling-mean-20]. Trained fresh per call on the last
/// `MIN_TRAINING_BARS` candles; predicts next-bar direction.
pub struct LogisticDirectionClassifier;

impl LogisticDirectionClassifier {
    pub fn new() -> Self {
        Self
    }

    fn build_features(candles: &[rust_decimal::Decimal], volumes: &[rust_decimal::Decimal]) -> Option<(Vec<Vec<f64>>, Vec<f64>)> {
        let closes: Vec<f64> = candles.iter().filter_map(|d| d.to_f64()).collect();
        let vols: Vec<f64> = volumes.iter().filter_map(|d| d.to_f64()).collect();
        if closes.len() < 22 {
            return None;
        }
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 21..closes.len() - 1 {
            let window = &closes[i - 20..=i];
            let ema20 = ema(window, 20);
            let rsi = rsi_over(&closes[i - 13..=i]);
            let log_return = (closes[i] / closes[i - 1]).ln();
            let vol_window = &vols[i - 19..=i];
            let mean_vol = vol_window.iter().sum::<f64>() / vol_window.len() as f64;
            let vol_ratio = if mean_vol > 0.0 { vols[i] / mean_vol } else { 1.0 };
            rows.push(vec![rsi, ema20, log_return, vol_ratio]);
            labels.push(if closes[i + 1] > closes[i] { 1.0 } else { 0.0 });
        }
        if rows.len() < 20 {
            return None;
        }
        Some((rows, labels))
    }
}

impl Default for LogisticDirectionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn ema(window: &[f64], period: usize) -> f64 {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = window[0];
    for &p in &window[1..] {
        value = alpha * p + (1.0 - alpha) * value;
    }
    value
}

fn rsi_over(window: &[f64]) -> f64 {
    if window.len() < 2 {
        return 50.0;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let diff = pair[1] - pair[0];
        if diff >= 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    let n = (window.len() - 1) as f64;
    let avg_gain = gains / n;
    let avg_loss = losses / n;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

impl Classifier for LogisticDirectionClassifier {
    fn predict(&self, series: &CandleSeries) -> Option<ClassifierPrediction> {
        if series.len() < MIN_TRAINING_BARS {
            return None;
        }
        let tail = &series.candles[series.len() - MIN_TRAINING_BARS..];
        let closes: Vec<rust_decimal::Decimal> = tail.iter().map(|c| c.close).collect();
        let volumes: Vec<rust_decimal::Decimal> = tail.iter().map(|c| c.volume).collect();
        let (rows, labels) = Self::build_features(&closes, &volumes)?;

        let x = DenseMatrix::from_2d_vec(&rows).ok()?;
        let model = LogisticRegression::fit(&x, &labels, Default::default()).ok()?;

        let last_row = rows.last()?.clone();
        let x_last = DenseMatrix::from_2d_vec(&vec![last_row]).ok()?;
        let prediction = model.predict(&x_last).ok()?;
        let predicted_up = prediction.first().copied().unwrap_or(0.0) >= 0.5;

        let correct = model
            .predict(&x)
            .ok()?
            .iter()
            .zip(labels.iter())
            .filter(|(p, l)| (**p >= 0.5) == (**l >= 0.5))
            .count();
        let accuracy = correct as f64 / labels.len() as f64;
        let confidence = (accuracy * 100.0).clamp(0.0, 100.0);

        Some(ClassifierPrediction {
            direction: if predicted_up { Direction::Up } else { Direction::Down },
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::{Candle, CandleSource};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn series(n: usize) -> CandleSeries {
        let mut candles = Vec::with_capacity(n);
        let mut price = 100.0_f64;
        for i in 0..n {
            price += if i % 3 == 0 { 0.6 } else { -0.2 };
            candles.push(Candle {
                open_time: i as i64 * 60_000,
                open: Decimal::from_f64(price).unwrap(),
                high: Decimal::from_f64(price + 0.5).unwrap(),
                low: Decimal::from_f64(price - 0.5).unwrap(),
                close: Decimal::from_f64(price).unwrap(),
                volume: Decimal::from_f64(100.0 + (i % 7) as f64).unwrap(),
            });
        }
        CandleSeries::normalize("cmt_btcusdt".into(), CandleSource::Exchange, candles)
    }

    #[test]
    fn untrained_below_minimum_bars() {
        let s = series(50);
        let classifier = LogisticDirectionClassifier::new();
        assert!(classifier.predict(&s).is_none());
    }

    #[test]
    fn predicts_direction_with_confidence_in_range() {
        let s = series(150);
        let classifier = LogisticDirectionClassifier::new();
        let prediction = classifier.predict(&s).expect("should train with enough bars");
        assert!(prediction.confidence >= 0.0 && prediction.confidence <= 100.0);
    }
}
