//! Fragment persistence
//!
//! Fragments are keyed by content hash, so upserting an id that is already
//! present is a no-op.

use crate::embedding::cosine_similarity;
use crate::error::CreditError;
use crate::models::{Fragment, ScoredFragment};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Metadata pre-filter applied before similarity scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataFilter {
    pub entity_id: Option<String>,
    pub source_document_id: Option<String>,
}

impl MetadataFilter {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            source_document_id: None,
        }
    }

    pub fn matches(&self, fragment: &Fragment) -> bool {
        self.entity_id
            .as_deref()
            .map_or(true, |id| fragment.entity_id.eq_ignore_ascii_case(id))
            && self
                .source_document_id
                .as_deref()
                .map_or(true, |id| fragment.source_document_id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
}

/// Trait for fragment persistence and similarity search
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, fragment: Fragment) -> Result<UpsertOutcome>;
    async fn contains(&self, fragment_id: &str) -> Result<bool>;

    /// Top-k by cosine similarity, ties broken by (entity, document, sequence).
    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredFragment>>;

    async fn fragment_ids(&self, filter: &MetadataFilter) -> Result<Vec<String>>;
    async fn len(&self) -> Result<usize>;

    /// Make prior upserts durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimension: Option<usize>,
    fragments: Vec<Fragment>,
}

#[derive(Default)]
struct StoreState {
    fragments: HashMap<String, Fragment>,
    dimension: Option<usize>,
    dirty: bool,
    /// Bumped on every insert so a flush only clears `dirty` it observed.
    generation: u64,
}

/// In-memory store with optional JSON snapshot persistence.
pub struct InMemoryVectorStore {
    state: Arc<RwLock<StoreState>>,
    /// Serializes snapshot writers without blocking queries.
    flush_lock: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            flush_lock: Mutex::new(()),
            snapshot_path: None,
        }
    }

    /// Open a store backed by `path`, loading the existing snapshot if any.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = StoreState::default();

        if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
                CreditError::StoreError(format!("corrupt snapshot {}: {}", path.display(), e))
            })?;
            state.dimension = snapshot.dimension;
            state.fragments = snapshot
                .fragments
                .into_iter()
                .map(|f| (f.fragment_id.clone(), f))
                .collect();
            debug!(count = state.fragments.len(), path = %path.display(), "Loaded fragment snapshot");
        }

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            flush_lock: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, fragment: Fragment) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;

        if state.fragments.contains_key(&fragment.fragment_id) {
            return Ok(UpsertOutcome::Unchanged);
        }

        match state.dimension {
            Some(dim) if dim != fragment.embedding.len() => {
                return Err(CreditError::StoreError(format!(
                    "embedding has {} dimensions, store holds {}",
                    fragment.embedding.len(),
                    dim
                )));
            }
            None => state.dimension = Some(fragment.embedding.len()),
            _ => {}
        }

        state.fragments.insert(fragment.fragment_id.clone(), fragment);
        state.dirty = true;
        state.generation += 1;
        Ok(UpsertOutcome::Inserted)
    }

    async fn contains(&self, fragment_id: &str) -> Result<bool> {
        Ok(self.state.read().await.fragments.contains_key(fragment_id))
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredFragment>> {
        let state = self.state.read().await;

        let mut scored: Vec<(f32, &Fragment)> = state
            .fragments
            .values()
            .filter(|f| filter.matches(f))
            .map(|f| (cosine_similarity(vector, &f.embedding), f))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.sequence_key().cmp(&b.sequence_key()))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, fragment)| ScoredFragment {
                fragment: fragment.clone(),
                score,
            })
            .collect())
    }

    async fn fragment_ids(&self, filter: &MetadataFilter) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Fragment> =
            state.fragments.values().filter(|f| filter.matches(f)).collect();
        matching.sort_by(|a, b| a.sequence_key().cmp(&b.sequence_key()));
        Ok(matching.into_iter().map(|f| f.fragment_id.clone()).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.fragments.len())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let _flushing = self.flush_lock.lock().await;

        let (snapshot, generation) = {
            let state = self.state.read().await;
            if !state.dirty {
                return Ok(());
            }
            let mut fragments: Vec<Fragment> = state.fragments.values().cloned().collect();
            fragments.sort_by(|a, b| a.sequence_key().cmp(&b.sequence_key()));
            let snapshot = Snapshot {
                version: 1,
                dimension: state.dimension,
                fragments,
            };
            (snapshot, state.generation)
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, path).await?;

        let mut state = self.state.write().await;
        if state.generation == generation {
            state.dirty = false;
        }
        debug!(count = snapshot.fragments.len(), path = %path.display(), "Fragment snapshot written");
        Ok(())
    }
}
