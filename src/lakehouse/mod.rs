//! Lakehouse writer
//!
//! Append-only, versioned table of analysis records. Every append publishes
//! exactly one commit; a read at version `v` sees the union of commits
//! `0..=v`. Rows are stored as JSON so records written before a field
//! existed keep deserializing.

pub mod local;
pub mod postgres;

pub use local::LocalLakehouse;
pub use postgres::PostgresLakehouse;

use crate::config::ServiceConfig;
use crate::models::{AnalysisRecord, CreditRating, RiskLevel};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    pub commit_id: Uuid,
    /// Zero-based, increments by one per commit.
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub record_count: usize,
}

/// Conjunctive row filter. Unset fields match everything; a ratio bound
/// never matches a record whose ratio is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordFilter {
    pub entity_id: Option<String>,
    pub ratings: Option<Vec<CreditRating>>,
    pub risk_levels: Option<Vec<RiskLevel>>,
    pub investment_grade: Option<bool>,
    pub min_debt_to_equity: Option<f64>,
    pub max_debt_to_equity: Option<f64>,
    pub min_return_on_equity: Option<f64>,
    pub max_return_on_equity: Option<f64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        if let Some(entity) = &self.entity_id {
            if !record.entity_id.eq_ignore_ascii_case(entity) {
                return false;
            }
        }
        if let Some(ratings) = &self.ratings {
            if !ratings.contains(&record.rating) {
                return false;
            }
        }
        if let Some(levels) = &self.risk_levels {
            if !levels.contains(&record.risk_level) {
                return false;
            }
        }
        if let Some(grade) = self.investment_grade {
            if record.investment_grade != grade {
                return false;
            }
        }
        if !within(record.debt_to_equity, self.min_debt_to_equity, self.max_debt_to_equity) {
            return false;
        }
        if !within(
            record.return_on_equity,
            self.min_return_on_equity,
            self.max_return_on_equity,
        ) {
            return false;
        }
        if self.since.is_some_and(|since| record.run_timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.run_timestamp > until) {
            return false;
        }
        true
    }
}

fn within(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        return false;
    };
    min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
}

/// Trait for versioned record persistence
#[async_trait::async_trait]
pub trait Lakehouse: Send + Sync {
    fn name(&self) -> &str;

    /// Commit one record.
    async fn append(&self, record: &AnalysisRecord) -> Result<CommitInfo> {
        self.append_batch(std::slice::from_ref(record)).await
    }

    /// Commit all records atomically. An empty batch is rejected.
    async fn append_batch(&self, records: &[AnalysisRecord]) -> Result<CommitInfo>;

    /// Records matching `filter`, in commit order. `as_of` reads the table
    /// as it stood after that version.
    async fn read(&self, filter: &RecordFilter, as_of: Option<u64>) -> Result<Vec<AnalysisRecord>>;

    /// All commits, oldest first.
    async fn history(&self) -> Result<Vec<CommitInfo>>;

    async fn latest_version(&self) -> Result<Option<u64>> {
        Ok(self.history().await?.last().map(|c| c.version))
    }

    /// Every run for one entity, newest first.
    async fn company_history(&self, entity_id: &str) -> Result<Vec<AnalysisRecord>> {
        let mut records = self.read(&RecordFilter::entity(entity_id), None).await?;
        records.sort_by(|a, b| b.run_timestamp.cmp(&a.run_timestamp));
        Ok(records)
    }

    /// The `n` most recent runs across all entities.
    async fn latest(&self, n: usize) -> Result<Vec<AnalysisRecord>> {
        let mut records = self.read(&RecordFilter::default(), None).await?;
        records.sort_by(|a, b| b.run_timestamp.cmp(&a.run_timestamp));
        records.truncate(n);
        Ok(records)
    }
}

/// Postgres when `DATABASE_URL` is set, else the local commit log.
pub async fn connect(config: &ServiceConfig) -> Result<Arc<dyn Lakehouse>> {
    match &config.database_url {
        Some(url) => {
            info!("Lakehouse backend: postgres");
            Ok(Arc::new(PostgresLakehouse::connect_lazy(url)?))
        }
        None => {
            info!(path = %config.lakehouse_path.display(), "Lakehouse backend: local commit log");
            Ok(Arc::new(LocalLakehouse::open(&config.lakehouse_path).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_record;

    #[test]
    fn test_filter_conjunction() {
        let record = sample_record("JPM", CreditRating::A, Some(90.0), Some(0.09));

        assert!(RecordFilter::default().matches(&record));
        assert!(RecordFilter::entity("jpm").matches(&record));

        let investment_grade_low_leverage = RecordFilter {
            investment_grade: Some(true),
            max_debt_to_equity: Some(100.0),
            ..Default::default()
        };
        assert!(investment_grade_low_leverage.matches(&record));

        let only_aaa = RecordFilter {
            ratings: Some(vec![CreditRating::Aaa]),
            ..Default::default()
        };
        assert!(!only_aaa.matches(&record));
    }

    #[test]
    fn test_ratio_bound_excludes_missing_ratio() {
        let record = sample_record("TSLA", CreditRating::Bb, None, Some(0.1));
        let filter = RecordFilter {
            min_debt_to_equity: Some(0.0),
            ..Default::default()
        };
        assert!(!filter.matches(&record));
    }
}
