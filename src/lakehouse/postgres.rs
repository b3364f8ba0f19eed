//! Postgres-backed lakehouse table
//!
//! Each commit is one transaction: the commit row and all record rows
//! become visible together. Records are kept as JSONB keyed by the commit
//! version, so point-in-time reads are a `version <= $1` predicate.

use super::{CommitInfo, Lakehouse, RecordFilter};
use crate::error::CreditError;
use crate::models::AnalysisRecord;
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

pub struct PostgresLakehouse {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresLakehouse {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS credit_analysis_commits (
                      version BIGINT PRIMARY KEY,
                      commit_id UUID NOT NULL UNIQUE,
                      committed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      record_count INTEGER NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS credit_analysis_records (
                      record_id UUID PRIMARY KEY,
                      version BIGINT NOT NULL REFERENCES credit_analysis_commits (version),
                      position INTEGER NOT NULL,
                      entity_id TEXT NOT NULL,
                      run_timestamp TIMESTAMPTZ NOT NULL,
                      record JSONB NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_credit_analysis_records_entity_time
                    ON credit_analysis_records (entity_id, run_timestamp);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                CreditError::StoreError(format!("Failed to initialize lakehouse schema: {}", e))
            })?;

        Ok(())
    }
}

fn commit_from_row(row: &sqlx::postgres::PgRow) -> Result<CommitInfo> {
    let version: i64 = row.try_get("version")?;
    let record_count: i32 = row.try_get("record_count")?;
    let committed_at: DateTime<Utc> = row.try_get("committed_at")?;
    Ok(CommitInfo {
        commit_id: row.try_get("commit_id")?,
        version: version.max(0) as u64,
        committed_at,
        record_count: record_count.max(0) as usize,
    })
}

#[async_trait::async_trait]
impl Lakehouse for PostgresLakehouse {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn append_batch(&self, records: &[AnalysisRecord]) -> Result<CommitInfo> {
        if records.is_empty() {
            return Err(CreditError::CommitFailure("empty batch".into()));
        }
        self.ensure_schema().await?;

        let commit_failure =
            |stage: &str, e: sqlx::Error| CreditError::CommitFailure(format!("{}: {}", stage, e));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| commit_failure("begin", e))?;

        // Serializes concurrent writers so versions stay dense.
        sqlx::query("LOCK TABLE credit_analysis_commits IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| commit_failure("lock", e))?;

        let next: i64 = sqlx::query("SELECT COALESCE(MAX(version) + 1, 0) AS next FROM credit_analysis_commits")
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("next"))
            .map_err(|e| commit_failure("version", e))?;

        let commit = CommitInfo {
            commit_id: Uuid::new_v4(),
            version: next as u64,
            committed_at: Utc::now(),
            record_count: records.len(),
        };

        sqlx::query(
            r#"
            INSERT INTO credit_analysis_commits (version, commit_id, committed_at, record_count)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(next)
        .bind(commit.commit_id)
        .bind(commit.committed_at)
        .bind(records.len() as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| commit_failure("commit row", e))?;

        for (position, record) in records.iter().enumerate() {
            let body = serde_json::to_value(record)
                .map_err(|e| CreditError::CommitFailure(format!("record not serializable: {}", e)))?;

            sqlx::query(
                r#"
                INSERT INTO credit_analysis_records
                  (record_id, version, position, entity_id, run_timestamp, record)
                VALUES
                  ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.record_id)
            .bind(next)
            .bind(position as i32)
            .bind(&record.entity_id)
            .bind(record.run_timestamp)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(|e| commit_failure("record row", e))?;
        }

        tx.commit().await.map_err(|e| commit_failure("commit", e))?;

        info!(
            commit_id = %commit.commit_id,
            version = commit.version,
            records = commit.record_count,
            "Lakehouse commit"
        );
        Ok(commit)
    }

    async fn read(&self, filter: &RecordFilter, as_of: Option<u64>) -> Result<Vec<AnalysisRecord>> {
        self.ensure_schema().await?;

        if let Some(version) = as_of {
            let latest = self.latest_version().await?;
            if latest.map_or(true, |latest| version > latest) {
                return Err(CreditError::InvalidInput(format!(
                    "version {} does not exist",
                    version
                )));
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT record
            FROM credit_analysis_records
            WHERE ($1::BIGINT IS NULL OR version <= $1)
              AND ($2::TEXT IS NULL OR LOWER(entity_id) = LOWER($2))
            ORDER BY version ASC, position ASC
            "#,
        )
        .bind(as_of.map(|v| v as i64))
        .bind(filter.entity_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let body: Value = row.try_get("record")?;
            let record: AnalysisRecord = serde_json::from_value(body)
                .map_err(|e| CreditError::StoreError(format!("unreadable record row: {}", e)))?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn history(&self) -> Result<Vec<CommitInfo>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT version, commit_id, committed_at, record_count FROM credit_analysis_commits ORDER BY version ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commit_from_row).collect()
    }

    async fn latest_version(&self) -> Result<Option<u64>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT MAX(version) AS latest FROM credit_analysis_commits")
            .fetch_one(&self.pool)
            .await?;
        let latest: Option<i64> = row.try_get("latest")?;
        Ok(latest.map(|v| v.max(0) as u64))
    }
}
