//! Peer comparison
//!
//! Analyzes several entities concurrently, ranks the resulting records on
//! one metric and commits every ranked record in a single batch. A
//! comparative narrative is requested from the model afterwards and is
//! dropped if the model cannot provide one.

use super::{timed, CreditAnalyst};
use crate::error::CreditError;
use crate::lakehouse::CommitInfo;
use crate::models::AnalysisRecord;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    /// Lower is better.
    DebtToEquity,
    ReturnOnEquity,
    FreeCashFlow,
    /// Stronger label first.
    Rating,
}

impl RankingMetric {
    pub fn value(&self, record: &AnalysisRecord) -> Option<f64> {
        match self {
            RankingMetric::DebtToEquity => record.debt_to_equity,
            RankingMetric::ReturnOnEquity => record.return_on_equity,
            RankingMetric::FreeCashFlow => record.free_cash_flow,
            RankingMetric::Rating => Some(f64::from(record.rating.rank())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RankingMetric::DebtToEquity => "debt_to_equity",
            RankingMetric::ReturnOnEquity => "return_on_equity",
            RankingMetric::FreeCashFlow => "free_cash_flow",
            RankingMetric::Rating => "rating",
        }
    }

    fn ascending(&self) -> bool {
        matches!(self, RankingMetric::DebtToEquity | RankingMetric::Rating)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntity {
    pub rank: usize,
    pub entity_id: String,
    pub metric_value: Option<f64>,
    pub record: AnalysisRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct Omission {
    pub entity_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub metric: RankingMetric,
    pub ranking: Vec<RankedEntity>,
    pub omissions: Vec<Omission>,
    /// `None` when every entity was omitted.
    pub commit: Option<CommitInfo>,
    /// Model-written comparative report over the ranking.
    pub narrative: Option<String>,
}

pub struct PeerComparison {
    analyst: Arc<CreditAnalyst>,
}

impl PeerComparison {
    pub fn new(analyst: Arc<CreditAnalyst>) -> Self {
        Self { analyst }
    }

    pub async fn compare(&self, entities: &[String], metric: RankingMetric) -> Result<PeerReport> {
        let entities: Vec<String> = entities
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if entities.is_empty() {
            return Err(CreditError::InvalidInput("no entities to compare".into()));
        }

        info!(count = entities.len(), metric = ?metric, "Peer comparison: starting");

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for (index, entity_id) in entities.iter().cloned().enumerate() {
            let analyst = self.analyst.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = analyst.assess(&entity_id, &cancel).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<AnalysisRecord>>> = entities.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result.map(|a| a.record)),
                Err(e) => warn!(error = %e, "Peer analysis task failed"),
            }
        }

        let mut records = Vec::new();
        let mut omissions = Vec::new();
        for (entity_id, result) in entities.into_iter().zip(results) {
            match result {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => {
                    warn!(entity_id = %entity_id, error = %e, "Entity omitted from comparison");
                    omissions.push(Omission {
                        entity_id,
                        reason: e.to_string(),
                    });
                }
                None => omissions.push(Omission {
                    entity_id,
                    reason: "analysis task aborted".into(),
                }),
            }
        }

        let ranking = rank_records(records, metric);

        let commit = if ranking.is_empty() {
            None
        } else {
            let batch: Vec<AnalysisRecord> = ranking.iter().map(|r| r.record.clone()).collect();
            let commit = self.analyst.lakehouse().append_batch(&batch).await.map_err(|e| match e {
                CreditError::CommitFailure(_) => e,
                other => CreditError::CommitFailure(other.to_string()),
            })?;
            Some(commit)
        };

        let narrative = if ranking.is_empty() {
            None
        } else {
            self.narrate(&ranking, metric).await
        };

        info!(
            ranked = ranking.len(),
            omitted = omissions.len(),
            version = commit.as_ref().map(|c| c.version),
            narrated = narrative.is_some(),
            "Peer comparison: complete"
        );

        Ok(PeerReport {
            metric,
            ranking,
            omissions,
            commit,
            narrative,
        })
    }

    async fn narrate(&self, ranking: &[RankedEntity], metric: RankingMetric) -> Option<String> {
        let prompt = comparison_prompt(ranking, metric);
        let reply = timed(
            "language_model",
            self.analyst.config().timeouts.language_model,
            self.analyst.model().complete(&prompt),
        )
        .await;

        match reply {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Comparative report unavailable, returning ranking only");
                None
            }
        }
    }
}

fn comparison_prompt(ranking: &[RankedEntity], metric: RankingMetric) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Compare the credit profiles of these companies, ranked by {}.\n\n",
        metric.name()
    ));

    for entry in ranking {
        let record = &entry.record;
        prompt.push_str(&format!(
            "{}. {}: {} ({} risk), d/e {}, roe {}, fcf {}\n",
            entry.rank,
            entry.entity_id,
            record.rating,
            record.risk_level,
            optional(record.debt_to_equity),
            optional(record.return_on_equity),
            optional(record.free_cash_flow),
        ));
        if !record.summary.is_empty() {
            prompt.push_str(&format!("   Analyst view: {}\n", record.summary));
        }
        if !record.evidence_citations.is_empty() {
            let cited: Vec<&str> = record
                .evidence_citations
                .iter()
                .map(|c| c.source_document_id.as_str())
                .collect();
            prompt.push_str(&format!("   Evidence from: {}\n", cited.join(", ")));
        }
    }

    prompt.push_str(
        "\nProvide:\n\
         1. Overall credit strength ranking with justification\n\
         2. Key differentiators between the companies\n\
         3. Comparative risk assessment\n\
         4. Recommendation for credit exposure\n",
    );
    prompt
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

/// Stable ranking; records without the metric go last in input order.
pub fn rank_records(records: Vec<AnalysisRecord>, metric: RankingMetric) -> Vec<RankedEntity> {
    let mut keyed: Vec<(Option<f64>, AnalysisRecord)> = records
        .into_iter()
        .map(|record| (metric.value(&record), record))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => {
            if metric.ascending() {
                a.total_cmp(b)
            } else {
                b.total_cmp(a)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed
        .into_iter()
        .enumerate()
        .map(|(i, (metric_value, record))| RankedEntity {
            rank: i + 1,
            entity_id: record.entity_id.clone(),
            metric_value,
            record,
        })
        .collect()
}
