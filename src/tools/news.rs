//! News adapter over the Tavily search API.

use super::{JsonApiClient, NewsSource};
use crate::error::CreditError;
use crate::models::NewsItem;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const TAVILY_BASE_URL: &str = "https://api.tavily.com";

pub struct TavilyNews {
    api: JsonApiClient,
    api_key: Option<String>,
}

impl TavilyNews {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(TAVILY_BASE_URL, api_key, timeout)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: JsonApiClient::new(base_url, timeout, "news")?,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl NewsSource for TavilyNews {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<NewsItem>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CreditError::unavailable("news", "TAVILY_API_KEY is not configured"))?;

        let days = (Utc::now() - since).num_days().max(1);
        let body = json!({
            "api_key": api_key,
            "query": query,
            "topic": "news",
            "search_depth": "basic",
            "max_results": max_results,
            "days": days,
        });

        let response = self.api.post_json("/search", &body).await?;
        let mut items = news_from_tavily(&response);

        // The provider window is day-granular; enforce the exact cutoff.
        items.retain(|item| item.published_at.map_or(true, |at| at >= since));
        items.truncate(max_results);

        debug!(count = items.len(), days, "News search complete");
        Ok(items)
    }
}

/// Map a Tavily search response to news items.
pub fn news_from_tavily(response: &Value) -> Vec<NewsItem> {
    let Some(results) = response.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|result| {
            let headline = result.get("title")?.as_str()?.trim().to_string();
            if headline.is_empty() {
                return None;
            }
            Some(NewsItem {
                headline,
                published_at: result
                    .get("published_date")
                    .and_then(Value::as_str)
                    .and_then(parse_published),
                source: text(result, "url"),
                summary: text(result, "content"),
            })
        })
        .collect()
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
