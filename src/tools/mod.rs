//! External signal adapters
//!
//! Each adapter is an independently substitutable capability. A failed
//! call returns `SourceUnavailable`, which the analyst turns into a marker.

pub mod calculator;
pub mod market_data;
pub mod news;

pub use market_data::{snapshot_from_fundamentals, HttpMarketData};
pub use news::{news_from_tavily, TavilyNews};

use crate::error::CreditError;
use crate::models::{FinancialSnapshot, NewsItem};
use crate::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Fundamentals lookup by ticker symbol.
///
/// `Ok` may carry a partially populated snapshot; `Err` means nothing was
/// obtainable.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, symbol: &str) -> Result<FinancialSnapshot>;
}

#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<NewsItem>>;
}

/// Search text used for an entity's recent news.
pub fn news_query(symbol: &str) -> String {
    format!("{} stock financial news credit risk debt earnings", symbol)
}

/// Thin JSON-over-HTTP client shared by the adapters.
#[derive(Clone)]
pub(crate) struct JsonApiClient {
    client: Client,
    base_url: String,
    input: &'static str,
}

impl JsonApiClient {
    pub(crate) fn new(base_url: &str, timeout: Duration, input: &'static str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            input,
        })
    }

    pub(crate) async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(url).send().await.map_err(|e| {
            CreditError::unavailable(self.input, format!("request to {} failed: {}", path, e))
        })?;
        self.read_json(path, response).await
    }

    pub(crate) async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                CreditError::unavailable(self.input, format!("request to {} failed: {}", path, e))
            })?;
        self.read_json(path, response).await
    }

    async fn read_json(&self, path: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            CreditError::unavailable(self.input, format!("invalid JSON response: {}", e))
        })?;

        if !status.is_success() {
            return Err(CreditError::unavailable(
                self.input,
                format!("{} returned {}: {}", path, status, body),
            ));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_news_query_mentions_credit_terms() {
        let query = news_query("JPM");
        assert!(query.starts_with("JPM "));
        assert!(query.contains("credit risk"));
    }
}
