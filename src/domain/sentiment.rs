use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// `{label, score in [-1,1], source}` per symbol, as returned by whichever
/// provider answered (or the `fallback` sentinel when both failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
    pub source: String,
}

impl Sentiment {
    pub fn neutral_fallback() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
            source: "fallback".to_string(),
        }
    }

    pub fn from_score(score: f64, source: impl Into<String>) -> Self {
        let score = score.clamp(-1.0, 1.0);
        let label = if score > 0.15 {
            SentimentLabel::Positive
        } else if score < -0.15 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        Self {
            label,
            score,
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait SentimentProvider: Send + Sync {
    async fn fetch_sentiment(&self, symbol: &str) -> anyhow::Result<Sentiment>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_clamp_into_range() {
        let s = Sentiment::from_score(5.0, "test");
        assert_eq!(s.score, 1.0);
        assert_eq!(s.label, SentimentLabel::Positive);
    }

    #[test]
    fn near_zero_scores_are_neutral() {
        let s = Sentiment::from_score(0.05, "test");
        assert_eq!(s.label, SentimentLabel::Neutral);
    }

    #[test]
    fn neutral_fallback_has_fallback_source() {
        let s = Sentiment::neutral_fallback();
        assert_eq!(s.source, "fallback");
        assert_eq!(s.score, 0.0);
    }
}
