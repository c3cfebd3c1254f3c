//! Secondary sentiment provider (§6): a local 3-way classifier over a
//! canonical headline, used when the news feed is unavailable or times out.
//! Never performs network I/O, so it cannot itself time out.

use crate::domain::sentiment::{Sentiment, SentimentProvider};
use async_trait::async_trait;
use vader_sentiment::SentimentIntensityAnalyzer;

pub struct LocalClassifierSentimentProvider {
    canonical_headline: String,
}

impl LocalClassifierSentimentProvider {
    pub fn new(canonical_headline: impl Into<String>) -> Self {
        Self {
            canonical_headline: canonical_headline.into(),
        }
    }
}

#[async_trait]
impl SentimentProvider for LocalClassifierSentimentProvider {
    async fn fetch_sentiment(&self, symbol: &str) -> anyhow::Result<Sentiment> {
        let mut analyzer = SentimentIntensityAnalyzer::new();
        let text = self.canonical_headline.replace("{symbol}", symbol);
        let scores = analyzer.polarity_scores(&text);
        let compound = scores.get("compound").copied().unwrap_or(0.0);
        Ok(Sentiment::from_score(compound, "local-classifier"))
    }
}
