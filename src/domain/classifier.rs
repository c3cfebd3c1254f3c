use crate::domain::candle::CandleSeries;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// `{direction, confidence in [0,100]}`, or untrained when fewer than 100
/// usable bars are available. No cross-cycle state is required of a
/// conforming implementation; it may cache internally but must refit
/// whenever the newest candle timestamp advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierPrediction {
    pub direction: Direction,
    pub confidence: f64,
}

pub trait Classifier: Send + Sync {
    /// Fits on the series' trailing window and predicts the next-bar
    /// direction. `None` when fewer than 100 usable bars are present.
    fn predict(&self, series: &CandleSeries) -> Option<ClassifierPrediction>;
}
