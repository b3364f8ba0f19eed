//! Credit analyst orchestrator
//!
//! GATHER (market, news, 3 retrievals, concurrent) → SYNTHESIZE → RATE → COMMIT
//!
//! The five gathering steps fail independently and become markers in the
//! synthesis context. Only an unparseable verdict or a rejected commit ends
//! a run without a record.

pub mod context;
pub mod peer;
pub mod verdict;

pub use context::{StepOutcome, SynthesisContext};
pub use peer::{Omission, PeerComparison, PeerReport, RankedEntity, RankingMetric};
pub use verdict::{parse_verdict, SynthesisVerdict};

use crate::audit::compute_context_hash;
use crate::config::AnalysisConfig;
use crate::error::CreditError;
use crate::lakehouse::{CommitInfo, Lakehouse};
use crate::llm::LanguageModel;
use crate::models::{
    AnalysisInput, AnalysisRecord, Confidence, FinancialSnapshot, NewsItem, RatingSource,
    RetrievalResult,
};
use crate::rating::RatingEngine;
use crate::retrieval::{QueryTemplate, RetrievalEngine};
use crate::tools::{news_query, MarketDataSource, NewsSource};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A finished but uncommitted analysis.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub record: AnalysisRecord,
    pub verdict: Option<SynthesisVerdict>,
    pub reasoning_trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub record: AnalysisRecord,
    pub commit: CommitInfo,
    pub reasoning_trace: Vec<String>,
}

pub struct CreditAnalyst {
    market: Arc<dyn MarketDataSource>,
    news: Arc<dyn NewsSource>,
    retrieval: Arc<RetrievalEngine>,
    model: Arc<dyn LanguageModel>,
    lakehouse: Arc<dyn Lakehouse>,
    rating: RatingEngine,
    config: AnalysisConfig,
}

impl CreditAnalyst {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        news: Arc<dyn NewsSource>,
        retrieval: Arc<RetrievalEngine>,
        model: Arc<dyn LanguageModel>,
        lakehouse: Arc<dyn Lakehouse>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            market,
            news,
            retrieval,
            model,
            lakehouse,
            rating: RatingEngine::new(config.rating.clone()),
            config,
        }
    }

    pub fn lakehouse(&self) -> Arc<dyn Lakehouse> {
        self.lakehouse.clone()
    }

    pub fn model(&self) -> Arc<dyn LanguageModel> {
        self.model.clone()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze and commit one record.
    pub async fn run(&self, entity_id: &str) -> Result<AnalysisOutcome> {
        self.run_with_cancel(entity_id, &CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        entity_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome> {
        let mut assessment = self.assess(entity_id, cancel).await?;

        let commit = self.lakehouse.append(&assessment.record).await.map_err(|e| match e {
            CreditError::CommitFailure(_) => e,
            other => CreditError::CommitFailure(other.to_string()),
        })?;

        assessment.reasoning_trace.push(format!(
            "COMMIT: version {} ({})",
            commit.version, commit.commit_id
        ));
        info!(
            entity_id = %assessment.record.entity_id,
            commit_id = %commit.commit_id,
            version = commit.version,
            "Analysis committed"
        );

        Ok(AnalysisOutcome {
            record: assessment.record,
            commit,
            reasoning_trace: assessment.reasoning_trace,
        })
    }

    /// Run the six steps without committing.
    pub async fn assess(&self, entity_id: &str, cancel: &CancellationToken) -> Result<Assessment> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(CreditError::InvalidInput("entity_id must not be empty".into()));
        }

        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let mut reasoning_trace = vec![format!("INPUT: credit analysis for {}", entity_id)];

        info!(entity_id, run_id = %run_id, "Credit analysis: starting");

        // === GATHER (steps 1-5) ===
        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(entity_id, run_id = %run_id, "Run cancelled while gathering");
                return Err(CreditError::Cancelled(format!("{} cancelled before synthesis", entity_id)));
            }
            context = self.gather(entity_id) => context,
        };

        if cancel.is_cancelled() {
            return Err(CreditError::Cancelled(format!(
                "{} cancelled before synthesis",
                entity_id
            )));
        }

        for (step, (name, status)) in [
            (AnalysisInput::MarketData, context.market_data.describe()),
            (AnalysisInput::News, context.news.describe()),
            (AnalysisInput::RiskFactors, context.risk_factors.describe()),
            (AnalysisInput::FinancialPerformance, context.financial_performance.describe()),
            (AnalysisInput::DebtLiquidity, context.debt_liquidity.describe()),
        ]
        .into_iter()
        .enumerate()
        {
            reasoning_trace.push(format!("STEP {}: {} {}", step + 1, name.name(), status));
        }

        debug!(
            entity_id,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            missing = context.unavailable_inputs().len(),
            "Gathering complete"
        );

        // === SYNTHESIZE (step 6) ===
        let prompt = context.build_prompt(&self.config.context_limits);
        let reply = timed(
            "language_model",
            self.config.timeouts.language_model,
            self.model.complete(&prompt),
        )
        .await;

        let verdict = match reply {
            Ok(text) => {
                let verdict = parse_verdict(&text).map_err(|e| {
                    warn!(entity_id, run_id = %run_id, error = %e, "Synthesis output rejected");
                    e
                })?;
                reasoning_trace.push(format!("STEP 6: synthesis verdict {}", verdict.rating));
                Some(verdict)
            }
            Err(err) => {
                warn!(entity_id, error = %err, "Synthesis unavailable, rating from ratios only");
                reasoning_trace.push(format!("STEP 6: synthesis unavailable ({})", err));
                None
            }
        };

        // === RATE ===
        let snapshot = context.snapshot();
        let debt_to_equity = snapshot
            .and_then(context::snapshot_debt_to_equity)
            .or_else(|| verdict.as_ref().and_then(|v| v.debt_to_equity));

        let return_on_equity = snapshot
            .and_then(|s| s.computed_ratios.return_on_equity)
            .or_else(|| verdict.as_ref().and_then(|v| v.return_on_equity));

        let mut confidence = context.confidence();

        let (rating, risk_level, investment_grade, rating_source) =
            match (debt_to_equity, return_on_equity, &verdict) {
                (Some(de), Some(roe), _) => {
                    let outcome = self.rating.rate(de, roe);
                    reasoning_trace.push(format!(
                        "RATE: d/e {:.2}% roe {:.4} -> {} ({})",
                        de, roe, outcome.label, outcome.risk_level
                    ));
                    if let Some(v) = &verdict {
                        if v.rating != outcome.label {
                            warn!(
                                entity_id,
                                model_rating = %v.rating,
                                rule_rating = %outcome.label,
                                "Model rating disagrees with rule ladder, keeping rule result"
                            );
                            reasoning_trace.push(format!(
                                "RATE: model said {}, rule ladder is authoritative",
                                v.rating
                            ));
                        }
                    }
                    (
                        outcome.label,
                        outcome.risk_level,
                        outcome.investment_grade,
                        RatingSource::RuleLadder,
                    )
                }
                (_, _, Some(v)) => {
                    reasoning_trace.push(format!("RATE: ratios missing, using model rating {}", v.rating));
                    confidence = Confidence::Partial;
                    (
                        v.rating,
                        v.risk_level.unwrap_or_else(|| self.rating.risk_level_for(v.rating)),
                        v.rating.is_investment_grade(),
                        RatingSource::Model,
                    )
                }
                (_, _, None) => {
                    let fallback = self.rating.thresholds().fallback();
                    warn!(
                        entity_id,
                        rating = %fallback.label,
                        "No ratios and no verdict, storing fallback rating"
                    );
                    reasoning_trace.push(format!(
                        "RATE: no ratios and no verdict, fallback {}",
                        fallback.label
                    ));
                    (
                        fallback.label,
                        fallback.risk_level,
                        fallback.label.is_investment_grade(),
                        RatingSource::Fallback,
                    )
                }
            };

        if verdict.is_none() {
            confidence = Confidence::Partial;
        }

        let record = AnalysisRecord {
            entity_id: entity_id.to_string(),
            run_timestamp: Utc::now(),
            rating,
            risk_level,
            investment_grade,
            debt_to_equity,
            return_on_equity,
            free_cash_flow: snapshot.and_then(|s| s.free_cash_flow),
            evidence_citations: context.citations(),
            confidence,
            record_id: Uuid::new_v4(),
            run_id,
            rating_source,
            model_rating: verdict.as_ref().map(|v| v.rating),
            unavailable_inputs: context.unavailable_inputs(),
            summary: verdict.as_ref().map(|v| v.summary.clone()).unwrap_or_default(),
            news_headlines: context.news_headlines(),
            context_hash: compute_context_hash(&context),
        };

        info!(
            entity_id,
            rating = %record.rating,
            confidence = ?record.confidence,
            citations = record.evidence_citations.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Credit analysis: complete"
        );

        Ok(Assessment {
            record,
            verdict,
            reasoning_trace,
        })
    }

    async fn gather(&self, entity_id: &str) -> SynthesisContext {
        let timeouts = &self.config.timeouts;
        let since = Utc::now() - chrono::Duration::days(self.config.news_window_days);
        let query = news_query(entity_id);

        let (market, news, risk_factors, financial_performance, debt_liquidity) = tokio::join!(
            timed("market_data", timeouts.market_data, self.market.fetch(entity_id)),
            timed(
                "news",
                timeouts.news,
                self.news.search(&query, since, self.config.max_news_items)
            ),
            self.retrieval.template(QueryTemplate::RiskFactors, entity_id),
            self.retrieval.template(QueryTemplate::FinancialPerformance, entity_id),
            self.retrieval.template(QueryTemplate::DebtLiquidity, entity_id),
        );

        SynthesisContext {
            entity_id: entity_id.to_string(),
            market_data: outcome(AnalysisInput::MarketData, market, FinancialSnapshot::is_empty),
            news: outcome(AnalysisInput::News, news, |items: &Vec<NewsItem>| items.is_empty()),
            risk_factors: outcome(AnalysisInput::RiskFactors, risk_factors, RetrievalResult::is_empty),
            financial_performance: outcome(
                AnalysisInput::FinancialPerformance,
                financial_performance,
                RetrievalResult::is_empty,
            ),
            debt_liquidity: outcome(
                AnalysisInput::DebtLiquidity,
                debt_liquidity,
                RetrievalResult::is_empty,
            ),
        }
    }
}

/// Bound an external call; a timeout is reported like any other outage.
async fn timed<T>(input: &str, limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CreditError::unavailable(
            input,
            format!("timed out after {} ms", limit.as_millis()),
        )),
    }
}

fn outcome<T>(input: AnalysisInput, result: Result<T>, is_empty: impl Fn(&T) -> bool) -> StepOutcome<T> {
    match result {
        Ok(value) if is_empty(&value) => {
            debug!(step = input.name(), "Step returned no data");
            StepOutcome::Empty
        }
        Ok(value) => StepOutcome::Available(value),
        Err(err) => {
            warn!(step = input.name(), error = %err, "Step unavailable");
            StepOutcome::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, RetrievalConfig};
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::indexer::{InMemoryVectorStore, Indexer};
    use crate::lakehouse::{LocalLakehouse, RecordFilter};
    use crate::llm::DisabledModel;
    use crate::models::{CreditRating, SourceDocument};
    use crate::testing::{
        full_snapshot, FailingMarketData, FailingNews, RejectingLakehouse, ScriptedModel,
        StalledMarketData, StaticMarketData, StaticNews,
    };

    const FILING: &str = "Market risks and operational risks may affect results. \
        Revenue and earnings grew on strong operations. \
        Debt obligations and borrowings are supported by ample liquidity.";

    async fn retrieval(seed: Option<(&str, &str)>) -> Arc<RetrievalEngine> {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let store = Arc::new(InMemoryVectorStore::new());
        if let Some((entity_id, text)) = seed {
            Indexer::new(
                embedder.clone(),
                store.clone(),
                ChunkingConfig::default(),
                Duration::from_secs(1),
            )
            .unwrap()
            .ingest(&SourceDocument {
                entity_id: entity_id.into(),
                document_id: "10-K".into(),
                text: text.into(),
            })
            .await
            .unwrap();
        }
        Arc::new(RetrievalEngine::new(
            embedder,
            store,
            RetrievalConfig::default(),
            Duration::from_secs(1),
        ))
    }

    fn headline() -> Vec<NewsItem> {
        vec![NewsItem {
            headline: "JPM prices senior notes".into(),
            published_at: None,
            source: "wire".into(),
            summary: "Oversubscribed.".into(),
        }]
    }

    fn analyst(
        market: Arc<dyn MarketDataSource>,
        news: Arc<dyn NewsSource>,
        retrieval: Arc<RetrievalEngine>,
        model: Arc<dyn LanguageModel>,
        lakehouse: Arc<dyn Lakehouse>,
    ) -> CreditAnalyst {
        CreditAnalyst::new(market, news, retrieval, model, lakehouse, AnalysisConfig::default())
    }

    #[tokio::test]
    async fn test_full_run_commits_rule_rating_with_full_confidence() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let model = Arc::new(ScriptedModel::new([
            r#"{"rating": "A", "risk_level": "low", "summary": "Stable franchise."}"#,
        ]));
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("JPM", 90.0, 0.09))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("JPM", FILING))).await,
            model.clone(),
            lakehouse.clone(),
        );

        let outcome = analyst.run("JPM").await.unwrap();
        assert_eq!(outcome.record.rating, CreditRating::A);
        assert_eq!(outcome.record.confidence, Confidence::Full);
        assert_eq!(outcome.record.rating_source, RatingSource::RuleLadder);
        assert!(!outcome.record.evidence_citations.is_empty());
        assert_eq!(outcome.record.news_headlines, vec!["JPM prices senior notes"]);
        assert_eq!(outcome.commit.version, 0);
        assert!(outcome.reasoning_trace.iter().any(|t| t.starts_with("COMMIT")));

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("DEBT & LIQUIDITY"));
        assert!(!prompt.contains("UNAVAILABLE"));
    }

    #[tokio::test]
    async fn test_no_evidence_and_no_market_data_still_commits_partial_record() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let analyst = analyst(
            Arc::new(FailingMarketData),
            Arc::new(FailingNews),
            retrieval(None).await,
            Arc::new(ScriptedModel::new([r#"{"rating": "BB", "risk_level": "substantial"}"#])),
            lakehouse.clone(),
        );

        let outcome = analyst.run("TSLA").await.unwrap();
        assert_eq!(outcome.record.confidence, Confidence::Partial);
        assert_eq!(outcome.record.rating, CreditRating::Bb);
        assert_eq!(outcome.record.rating_source, RatingSource::Model);
        assert_eq!(outcome.record.unavailable_inputs.len(), 5);
        assert!(outcome.record.evidence_citations.is_empty());

        let rows = lakehouse.read(&RecordFilter::entity("TSLA"), None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_synthesis_commits_nothing() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("AAPL", 45.0, 0.12))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("AAPL", FILING))).await,
            Arc::new(ScriptedModel::new(["Apple looks great, maybe AA?"])),
            lakehouse.clone(),
        );

        let err = analyst.run("AAPL").await.unwrap_err();
        assert!(matches!(err, CreditError::SynthesisParseFailure(_)));
        assert!(lakehouse.read(&RecordFilter::entity("AAPL"), None).await.unwrap().is_empty());
        assert!(lakehouse.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rule_ladder_overrides_disagreeing_model() {
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("MSFT", 15.0, 0.20))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("MSFT", FILING))).await,
            Arc::new(ScriptedModel::new([r#"{"rating": "BB"}"#])),
            Arc::new(LocalLakehouse::in_memory()),
        );

        let record = analyst.run("MSFT").await.unwrap().record;
        assert_eq!(record.rating, CreditRating::Aaa);
        assert_eq!(record.model_rating, Some(CreditRating::Bb));
        assert!(record.rating_disagreement());
        assert!(record.investment_grade);
    }

    #[tokio::test]
    async fn test_debt_to_equity_derived_from_raw_figures() {
        let mut snapshot = full_snapshot("JNJ", 45.0, 0.12);
        snapshot.computed_ratios.debt_to_equity = None;
        snapshot.debt = Some(45_000.0);
        snapshot.equity = Some(100_000.0);

        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(snapshot)),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("JNJ", FILING))).await,
            Arc::new(ScriptedModel::new([r#"{"rating": "AA"}"#])),
            Arc::new(LocalLakehouse::in_memory()),
        );

        let record = analyst.run("JNJ").await.unwrap().record;
        assert!((record.debt_to_equity.unwrap() - 45.0).abs() < 1e-9);
        assert_eq!(record.rating, CreditRating::Aa);
        assert_eq!(record.confidence, Confidence::Partial);
    }

    #[tokio::test]
    async fn test_model_outage_falls_back_to_ratios() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("WFC", 140.0, 0.02))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("WFC", FILING))).await,
            Arc::new(ScriptedModel::new(Vec::<String>::new()).then_fail("503")),
            lakehouse.clone(),
        );

        let record = analyst.run("WFC").await.unwrap().record;
        assert_eq!(record.rating, CreditRating::Bbb);
        assert!(record.model_rating.is_none());
        assert_eq!(record.confidence, Confidence::Partial);
    }

    #[tokio::test]
    async fn test_model_outage_without_ratios_commits_fallback_record() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let analyst = analyst(
            Arc::new(FailingMarketData),
            Arc::new(FailingNews),
            retrieval(None).await,
            Arc::new(DisabledModel::new("GEMINI_API_KEY not set")),
            lakehouse.clone(),
        );

        let outcome = analyst.run("TSLA").await.unwrap();
        assert_eq!(outcome.record.rating, CreditRating::Ccc);
        assert_eq!(outcome.record.rating_source, RatingSource::Fallback);
        assert_eq!(outcome.record.confidence, Confidence::Partial);
        assert!(!outcome.record.investment_grade);
        assert!(outcome.record.model_rating.is_none());
        assert_eq!(lakehouse.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_step_timeout_becomes_marker() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let model = Arc::new(ScriptedModel::new([
            r#"{"rating": "BB", "risk_level": "substantial"}"#,
        ]));
        let mut config = AnalysisConfig::default();
        config.timeouts.market_data = Duration::from_millis(50);
        let analyst = CreditAnalyst::new(
            Arc::new(StalledMarketData(Duration::from_secs(3600))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("JPM", FILING))).await,
            model.clone(),
            lakehouse.clone(),
            config,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(5), analyst.run("JPM"))
            .await
            .expect("market data timeout not applied")
            .unwrap();

        assert_eq!(outcome.record.unavailable_inputs, vec![AnalysisInput::MarketData]);
        assert_eq!(outcome.record.confidence, Confidence::Partial);
        assert_eq!(outcome.record.rating, CreditRating::Bb);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("UNAVAILABLE (market_data unavailable: timed out after 50 ms)"));
        assert!(outcome.reasoning_trace.iter().any(|t| t.contains("timed out")));
        assert_eq!(lakehouse.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_documents_match_entity_regardless_of_case() {
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("AAPL", 45.0, 0.12))),
            Arc::new(StaticNews(headline())),
            retrieval(Some(("aapl", FILING))).await,
            Arc::new(ScriptedModel::new([r#"{"rating": "AA"}"#])),
            Arc::new(LocalLakehouse::in_memory()),
        );

        let record = analyst.run("AAPL").await.unwrap().record;
        assert!(!record.evidence_citations.is_empty());
        assert!(!record.unavailable_inputs.contains(&AnalysisInput::DebtLiquidity));
    }

    #[tokio::test]
    async fn test_cancelled_run_commits_nothing() {
        let lakehouse = Arc::new(LocalLakehouse::in_memory());
        let model = Arc::new(ScriptedModel::new([r#"{"rating": "A"}"#]));
        let analyst = analyst(
            Arc::new(StalledMarketData(Duration::from_secs(3600))),
            Arc::new(StaticNews(headline())),
            retrieval(None).await,
            model.clone(),
            lakehouse.clone(),
        );

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = analyst.run_with_cancel("JPM", &token).await.unwrap_err();
        assert!(matches!(err, CreditError::Cancelled(_)));
        assert!(model.prompts().is_empty());
        assert!(lakehouse.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_commit_surfaces_commit_failure() {
        let analyst = analyst(
            Arc::new(StaticMarketData::new().with(full_snapshot("JPM", 90.0, 0.09))),
            Arc::new(StaticNews(headline())),
            retrieval(None).await,
            Arc::new(ScriptedModel::new([r#"{"rating": "A"}"#])),
            Arc::new(RejectingLakehouse),
        );

        let err = tokio_test::assert_err!(analyst.run("JPM").await);
        assert!(matches!(err, CreditError::CommitFailure(_)));
    }
}
