//! JSON-lines commit log
//!
//! One line per commit. A commit is visible to readers only after its line
//! is written and synced; a torn final line left by a crash is dropped
//! when the log is reopened.

use super::{CommitInfo, Lakehouse, RecordFilter};
use crate::error::CreditError;
use crate::models::AnalysisRecord;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitEntry {
    commit: CommitInfo,
    rows: Vec<Value>,
}

pub struct LocalLakehouse {
    commits: RwLock<Vec<CommitEntry>>,
    /// Serializes writers; readers only take `commits`.
    log: Mutex<Option<File>>,
    path: Option<PathBuf>,
}

impl LocalLakehouse {
    /// Volatile table, nothing is written to disk.
    pub fn in_memory() -> Self {
        Self {
            commits: RwLock::new(Vec::new()),
            log: Mutex::new(None),
            path: None,
        }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (commits, valid_len) = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            load_commits(&raw, &path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Cut any torn tail so the next commit starts on a fresh line.
        if file.metadata().await?.len() != valid_len {
            file.set_len(valid_len).await?;
        }

        info!(commits = commits.len(), path = %path.display(), "Lakehouse log opened");

        Ok(Self {
            commits: RwLock::new(commits),
            log: Mutex::new(Some(file)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn load_commits(raw: &str, path: &Path) -> Result<(Vec<CommitEntry>, u64)> {
    let mut commits = Vec::new();
    let mut valid_len = 0u64;
    let mut offset = 0usize;

    let lines: Vec<&str> = raw.split_inclusive('\n').collect();
    for (index, line) in lines.iter().enumerate() {
        offset += line.len();
        let is_last = index + 1 == lines.len();

        if line.trim().is_empty() {
            valid_len = offset as u64;
            continue;
        }

        let parsed = if line.ends_with('\n') {
            serde_json::from_str::<CommitEntry>(line.trim_end())
        } else {
            // No terminator: the write never completed.
            Err(serde::de::Error::custom("unterminated commit line"))
        };

        match parsed {
            Ok(entry) => {
                if entry.commit.version != commits.len() as u64 {
                    return Err(CreditError::StoreError(format!(
                        "{}: commit line {} has version {}, expected {}",
                        path.display(),
                        index + 1,
                        entry.commit.version,
                        commits.len()
                    )));
                }
                commits.push(entry);
                valid_len = offset as u64;
            }
            Err(err) if is_last => {
                warn!(path = %path.display(), error = %err, "Dropping torn trailing commit");
            }
            Err(err) => {
                return Err(CreditError::StoreError(format!(
                    "{}: corrupt commit line {}: {}",
                    path.display(),
                    index + 1,
                    err
                )));
            }
        }
    }

    Ok((commits, valid_len))
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Cut the log back to the last committed line after a failed write.
async fn rollback(file: &mut File, committed_len: u64) {
    let result = match file.set_len(committed_len).await {
        Ok(()) => file.sync_data().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => warn!(committed_len, "Rolled back partial commit line"),
        Err(e) => error!(committed_len, error = %e, "Rollback of partial commit line failed"),
    }
}

#[async_trait::async_trait]
impl Lakehouse for LocalLakehouse {
    fn name(&self) -> &str {
        "local"
    }

    async fn append_batch(&self, records: &[AnalysisRecord]) -> Result<CommitInfo> {
        if records.is_empty() {
            return Err(CreditError::CommitFailure("empty batch".into()));
        }

        let rows = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CreditError::CommitFailure(format!("record not serializable: {}", e)))?;

        let mut log = self.log.lock().await;
        let version = self.commits.read().await.len() as u64;

        let entry = CommitEntry {
            commit: CommitInfo {
                commit_id: Uuid::new_v4(),
                version,
                committed_at: Utc::now(),
                record_count: rows.len(),
            },
            rows,
        };

        if let Some(file) = log.as_mut() {
            let mut line = serde_json::to_vec(&entry)
                .map_err(|e| CreditError::CommitFailure(e.to_string()))?;
            line.push(b'\n');

            let committed_len = file
                .metadata()
                .await
                .map_err(|e| CreditError::CommitFailure(format!("log stat failed: {}", e)))?
                .len();
            if let Err(e) = write_line(file, &line).await {
                rollback(file, committed_len).await;
                return Err(CreditError::CommitFailure(format!("log write failed: {}", e)));
            }
        }

        let info = entry.commit.clone();
        self.commits.write().await.push(entry);

        info!(
            commit_id = %info.commit_id,
            version = info.version,
            records = info.record_count,
            "Lakehouse commit"
        );
        Ok(info)
    }

    async fn read(&self, filter: &RecordFilter, as_of: Option<u64>) -> Result<Vec<AnalysisRecord>> {
        let commits = self.commits.read().await;

        let visible = match as_of {
            Some(version) if version >= commits.len() as u64 => {
                return Err(CreditError::InvalidInput(format!(
                    "version {} does not exist (latest is {})",
                    version,
                    commits.len() as i64 - 1
                )));
            }
            Some(version) => &commits[..=version as usize],
            None => &commits[..],
        };

        let mut records = Vec::new();
        for entry in visible {
            for row in &entry.rows {
                let record: AnalysisRecord = serde_json::from_value(row.clone()).map_err(|e| {
                    CreditError::StoreError(format!(
                        "row in version {} unreadable: {}",
                        entry.commit.version, e
                    ))
                })?;
                if filter.matches(&record) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn history(&self) -> Result<Vec<CommitInfo>> {
        Ok(self
            .commits
            .read()
            .await
            .iter()
            .map(|entry| entry.commit.clone())
            .collect())
    }
}
