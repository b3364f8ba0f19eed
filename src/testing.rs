//! Scripted collaborators for unit tests.

use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::CreditError;
use crate::lakehouse::{CommitInfo, Lakehouse, RecordFilter};
use crate::llm::LanguageModel;
use crate::models::{
    AnalysisRecord, ComputedRatios, Confidence, CreditRating, FinancialSnapshot, NewsItem,
    RatingSource, RiskLevel,
};
use crate::tools::{MarketDataSource, NewsSource};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Replies with queued responses in order, recording every prompt.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failed completion.
    pub fn then_fail(self, reason: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(reason.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(reason)) => Err(CreditError::unavailable("language_model", reason)),
            None => Err(CreditError::unavailable("language_model", "script exhausted")),
        }
    }
}

#[derive(Default)]
pub struct StaticMarketData {
    snapshots: HashMap<String, FinancialSnapshot>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, snapshot: FinancialSnapshot) -> Self {
        self.snapshots.insert(snapshot.entity_id.clone(), snapshot);
        self
    }
}

#[async_trait::async_trait]
impl MarketDataSource for StaticMarketData {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, symbol: &str) -> Result<FinancialSnapshot> {
        self.snapshots
            .get(symbol)
            .cloned()
            .ok_or_else(|| CreditError::unavailable("market_data", format!("no data for {}", symbol)))
    }
}

pub struct FailingMarketData;

#[async_trait::async_trait]
impl MarketDataSource for FailingMarketData {
    fn name(&self) -> &str {
        "failing"
    }

    async fn fetch(&self, _symbol: &str) -> Result<FinancialSnapshot> {
        Err(CreditError::unavailable("market_data", "connection refused"))
    }
}

/// Never answers within any sane timeout.
pub struct StalledMarketData(pub Duration);

#[async_trait::async_trait]
impl MarketDataSource for StalledMarketData {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn fetch(&self, symbol: &str) -> Result<FinancialSnapshot> {
        tokio::time::sleep(self.0).await;
        Ok(FinancialSnapshot::empty(symbol))
    }
}

pub struct StaticNews(pub Vec<NewsItem>);

#[async_trait::async_trait]
impl NewsSource for StaticNews {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        _query: &str,
        _since: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<NewsItem>> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

pub struct FailingNews;

#[async_trait::async_trait]
impl NewsSource for FailingNews {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _: &str, _: DateTime<Utc>, _: usize) -> Result<Vec<NewsItem>> {
        Err(CreditError::unavailable("news", "quota exceeded"))
    }
}

/// Hashing embedder that fails on text containing a marker.
pub struct FailingEmbedder {
    inner: HashingEmbedder,
    marker: Option<String>,
}

impl FailingEmbedder {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            inner: HashingEmbedder::new(64),
            marker: Some(marker.to_string()),
        }
    }

    pub fn always() -> Self {
        Self {
            inner: HashingEmbedder::new(64),
            marker: None,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.marker {
            Some(marker) if !text.contains(marker.as_str()) => self.inner.embed(text).await,
            _ => Err(CreditError::unavailable("embedding", "model overloaded")),
        }
    }
}

/// Rejects every commit.
pub struct RejectingLakehouse;

#[async_trait::async_trait]
impl Lakehouse for RejectingLakehouse {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn append_batch(&self, _records: &[AnalysisRecord]) -> Result<CommitInfo> {
        Err(CreditError::CommitFailure("disk full".into()))
    }

    async fn read(&self, _: &RecordFilter, _: Option<u64>) -> Result<Vec<AnalysisRecord>> {
        Ok(Vec::new())
    }

    async fn history(&self) -> Result<Vec<CommitInfo>> {
        Ok(Vec::new())
    }
}

pub fn full_snapshot(entity_id: &str, debt_to_equity: f64, return_on_equity: f64) -> FinancialSnapshot {
    FinancialSnapshot {
        entity_id: entity_id.to_string(),
        as_of: Utc::now(),
        debt: Some(debt_to_equity * 1_000.0),
        equity: Some(100_000.0),
        cash: Some(25_000.0),
        free_cash_flow: Some(12_000.0),
        market_cap: None,
        stock_price: None,
        computed_ratios: ComputedRatios {
            debt_to_equity: Some(debt_to_equity),
            return_on_equity: Some(return_on_equity),
        },
    }
}

pub fn sample_record(
    entity_id: &str,
    rating: CreditRating,
    debt_to_equity: Option<f64>,
    return_on_equity: Option<f64>,
) -> AnalysisRecord {
    AnalysisRecord {
        entity_id: entity_id.to_string(),
        run_timestamp: Utc::now(),
        rating,
        risk_level: RiskLevel::Moderate,
        investment_grade: rating.is_investment_grade(),
        debt_to_equity,
        return_on_equity,
        free_cash_flow: Some(1_000.0),
        evidence_citations: Vec::new(),
        confidence: Confidence::Full,
        record_id: Uuid::new_v4(),
        run_id: Uuid::new_v4(),
        rating_source: RatingSource::RuleLadder,
        model_rating: None,
        unavailable_inputs: Vec::new(),
        summary: format!("{} sample", entity_id),
        news_headlines: Vec::new(),
        context_hash: String::new(),
    }
}
