//! Primary sentiment provider (§6): pulls recent items from an RSS feed,
//! filters to ones mentioning the symbol, and derives a vote-tally score
//! from simple positive/negative keyword hits. Bounded by the 5 s timeout
//! `SentimentService` wraps every provider call in.

use crate::domain::sentiment::{Sentiment, SentimentProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rss::Channel;
use std::io::Cursor;
use std::time::Duration;

const MAX_ITEMS: usize = 20;

const POSITIVE_WORDS: &[&str] = &["surge", "rally", "bullish", "gain", "soar", "breakout", "upgrade", "record"];
const NEGATIVE_WORDS: &[&str] = &["crash", "plunge", "bearish", "selloff", "slump", "downgrade", "hack", "liquidation"];

pub struct NewsFeedSentimentProvider {
    client: Client,
    feed_url: String,
    api_key: Option<String>,
}

impl NewsFeedSentimentProvider {
    pub fn new(feed_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(5)).build().unwrap_or_default(),
            feed_url,
            api_key,
        }
    }

    fn symbol_keyword(symbol: &str) -> String {
        symbol.trim_start_matches("cmt_").trim_end_matches("usdt").to_ascii_lowercase()
    }
}

#[async_trait]
impl SentimentProvider for NewsFeedSentimentProvider {
    async fn fetch_sentiment(&self, symbol: &str) -> Result<Sentiment> {
        let mut request = self.client.get(&self.feed_url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("news feed request failed")?;
        let bytes = response.bytes().await.context("news feed body unreadable")?;
        let channel = Channel::read_from(Cursor::new(bytes)).context("news feed is not valid RSS")?;

        let keyword = Self::symbol_keyword(symbol);
        let mut positive_votes = 0i32;
        let mut negative_votes = 0i32;
        let mut matched = 0usize;

        for item in channel.items().iter().take(MAX_ITEMS) {
            let haystack = format!("{} {}", item.title().unwrap_or_default(), item.description().unwrap_or_default()).to_ascii_lowercase();
            if !keyword.is_empty() && !haystack.contains(&keyword) {
                continue;
            }
            matched += 1;
            for word in POSITIVE_WORDS {
                if haystack.contains(word) {
                    positive_votes += 1;
                }
            }
            for word in NEGATIVE_WORDS {
                if haystack.contains(word) {
                    negative_votes += 1;
                }
            }
        }

        if matched == 0 {
            return Ok(Sentiment::from_score(0.0, "news-feed"));
        }

        let total_votes = positive_votes + negative_votes;
        let score = if total_votes == 0 { 0.0 } else { (positive_votes - negative_votes) as f64 / total_votes as f64 };
        Ok(Sentiment::from_score(score, "news-feed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_keyword_strips_cmt_prefix_and_usdt_suffix() {
        assert_eq!(NewsFeedSentimentProvider::symbol_keyword("cmt_btcusdt"), "btc");
    }
}
