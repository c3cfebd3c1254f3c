use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Immutable once constructed; `open_time` is milliseconds since
/// epoch and is the sort/dedup key for a `CandleSeries`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Whether a series came from the real exchange mirror or a synthetic
/// fallback walk (§4.1) — never hidden from downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleSource {
    Exchange,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct CandleSeries {
    pub symbol: String,
    pub source: CandleSource,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    /// Sort ascending by `open_time` and drop duplicate timestamps, keeping
    /// the later occurrence — matches the adapter's normalization contract.
    pub fn normalize(symbol: String, source: CandleSource, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            if let Some(last) = deduped.last_mut() {
                if last.open_time == candle.open_time {
                    *last = candle;
                    continue;
                }
            }
            deduped.push(candle);
        }
        Self {
            symbol,
            source,
            candles: deduped,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(t: i64, close: Decimal) -> Candle {
        Candle {
            open_time: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn normalize_sorts_ascending() {
        let series = CandleSeries::normalize(
            "BTCUSDT".into(),
            CandleSource::Exchange,
            vec![candle(3, dec!(3)), candle(1, dec!(1)), candle(2, dec!(2))],
        );
        let times: Vec<i64> = series.candles.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn normalize_dedups_keeping_later() {
        let series = CandleSeries::normalize(
            "BTCUSDT".into(),
            CandleSource::Exchange,
            vec![candle(1, dec!(1)), candle(1, dec!(99))],
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series.candles[0].close, dec!(99));
    }

    #[test]
    fn synthetic_source_is_tagged_not_hidden() {
        let series = CandleSeries::normalize("BTCUSDT".into(), CandleSource::Synthetic, vec![candle(1, dec!(1))]);
        assert_eq!(series.source, CandleSource::Synthetic);
    }
}
