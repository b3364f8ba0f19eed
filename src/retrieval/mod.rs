//! Retrieval engine
//!
//! Embeds a query and ranks stored fragments by cosine similarity. The named
//! templates only fix the query text and filter; ranking is the same.

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::CreditError;
use crate::indexer::{MetadataFilter, VectorStore};
use crate::models::RetrievalResult;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryTemplate {
    RiskFactors,
    FinancialPerformance,
    DebtLiquidity,
}

impl QueryTemplate {
    pub const ALL: [QueryTemplate; 3] = [
        QueryTemplate::RiskFactors,
        QueryTemplate::FinancialPerformance,
        QueryTemplate::DebtLiquidity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueryTemplate::RiskFactors => "risk_factors",
            QueryTemplate::FinancialPerformance => "financial_performance",
            QueryTemplate::DebtLiquidity => "debt_liquidity",
        }
    }

    pub fn query_text(&self) -> &'static str {
        match self {
            QueryTemplate::RiskFactors => {
                "risk factors business risks financial risks market risks operational risks"
            }
            QueryTemplate::FinancialPerformance => {
                "revenue earnings profit loss performance results operations financial condition"
            }
            QueryTemplate::DebtLiquidity => {
                "debt obligations borrowings liquidity capital structure financing"
            }
        }
    }
}

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
    embed_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            embed_timeout,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top-k fragments for `text` scoring above the relevance floor. An empty
    /// result is not an error.
    pub async fn query(
        &self,
        text: &str,
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<RetrievalResult> {
        let vector = match tokio::time::timeout(self.embed_timeout, self.embedder.embed(text)).await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(err)) => return Err(CreditError::unavailable("embedding", err.to_string())),
            Err(_) => {
                return Err(CreditError::unavailable(
                    "embedding",
                    format!("query embedding timed out after {:?}", self.embed_timeout),
                ))
            }
        };

        let floor = self.config.min_similarity;
        let hits: Vec<_> = self
            .store
            .query(&vector, filter, k)
            .await?
            .into_iter()
            .filter(|hit| hit.score > floor)
            .collect();

        debug!(hits = hits.len(), k, "Retrieval complete");
        Ok(RetrievalResult { hits })
    }

    /// Run a named template scoped to one entity with the configured `top_k`.
    pub async fn template(&self, template: QueryTemplate, entity_id: &str) -> Result<RetrievalResult> {
        self.query(
            template.query_text(),
            &MetadataFilter::entity(entity_id),
            self.config.top_k,
        )
        .await
    }
}
