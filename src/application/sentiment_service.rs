//! C5: sentiment lookup with a 5-minute per-symbol cache and a two-tier
//! fallback chain. Never blocks a cycle more than a few seconds — both
//! providers are called with bounded timeouts and any failure degrades to
//! the next tier, ending in `Sentiment::neutral_fallback()`.

use crate::domain::sentiment::{Sentiment, SentimentProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

struct CacheEntry {
    sentiment: Sentiment,
    fetched_at: Instant,
}

pub struct SentimentService {
    primary: Arc<dyn SentimentProvider>,
    secondary: Arc<dyn SentimentProvider>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SentimentService {
    pub fn new(primary: Arc<dyn SentimentProvider>, secondary: Arc<dyn SentimentProvider>) -> Self {
        Self {
            primary,
            secondary,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn sentiment(&self, symbol: &str) -> Sentiment {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(symbol) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return entry.sentiment.clone();
                }
            }
        }

        let sentiment = match tokio::time::timeout(PROVIDER_TIMEOUT, self.primary.fetch_sentiment(symbol)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("primary sentiment provider failed for {}: {}", symbol, e);
                self.fall_back(symbol).await
            }
            Err(_) => {
                warn!("primary sentiment provider timed out for {}", symbol);
                self.fall_back(symbol).await
            }
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            symbol.to_string(),
            CacheEntry {
                sentiment: sentiment.clone(),
                fetched_at: Instant::now(),
            },
        );
        sentiment
    }

    async fn fall_back(&self, symbol: &str) -> Sentiment {
        match tokio::time::timeout(PROVIDER_TIMEOUT, self.secondary.fetch_sentiment(symbol)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("secondary sentiment provider failed for {}: {}", symbol, e);
                Sentiment::neutral_fallback()
            }
            Err(_) => {
                warn!("secondary sentiment provider timed out for {}", symbol);
                Sentiment::neutral_fallback()
            }
        }
    }
}
