//! Document indexer
//!
//! Chunks a source document, embeds new fragments on a bounded pool of
//! tasks and upserts them into the vector store in sequence order under
//! their content hash.

pub mod chunker;
pub mod store;

pub use chunker::{chunk_document, Chunk};
pub use store::{InMemoryVectorStore, MetadataFilter, UpsertOutcome, VectorStore};

use crate::audit::fragment_id;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::CreditError;
use crate::models::{Fragment, SourceDocument};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_EMBED_WORKERS: usize = 4;

/// A fragment whose embedding could not be computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentFailure {
    pub fragment_id: String,
    pub sequence_index: u32,
    pub char_offset: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub entity_id: String,
    pub document_id: String,
    /// Newly stored fragment ids.
    pub inserted: Vec<String>,
    /// Ids already present before this ingest.
    pub unchanged: Vec<String>,
    pub failed: Vec<FragmentFailure>,
}

impl IngestReport {
    /// Every fragment id of the document now held by the store.
    pub fn fragment_ids(&self) -> BTreeSet<String> {
        self.inserted.iter().chain(&self.unchanged).cloned().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    config: ChunkingConfig,
    embed_timeout: Duration,
    workers: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: ChunkingConfig,
        embed_timeout: Duration,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            store,
            config,
            embed_timeout,
            workers: DEFAULT_EMBED_WORKERS,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    pub async fn ingest(&self, document: &SourceDocument) -> Result<IngestReport> {
        if document.entity_id.trim().is_empty() || document.document_id.trim().is_empty() {
            return Err(CreditError::InvalidInput(
                "document needs an entity_id and a document_id".into(),
            ));
        }

        let chunks = chunk_document(&document.text, &self.config);
        let mut report = IngestReport {
            entity_id: document.entity_id.clone(),
            document_id: document.document_id.clone(),
            ..Default::default()
        };

        let mut pending: Vec<(u32, String, Chunk)> = Vec::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let id = fragment_id(
                &document.entity_id,
                &document.document_id,
                chunk.char_offset,
                &chunk.text,
            );

            // Known content is never re-embedded.
            if self.store.contains(&id).await? {
                report.unchanged.push(id);
            } else {
                pending.push((index as u32, id, chunk));
            }
        }

        let texts: Vec<String> = pending.iter().map(|(_, _, chunk)| chunk.text.clone()).collect();
        let embeddings = self.embed_all(texts).await;

        for ((sequence_index, id, chunk), embedding) in pending.into_iter().zip(embeddings) {
            let embedding = match embedding {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(
                        entity_id = %document.entity_id,
                        document_id = %document.document_id,
                        sequence_index,
                        error = %err,
                        "Fragment embedding failed"
                    );
                    report.failed.push(FragmentFailure {
                        fragment_id: id,
                        sequence_index,
                        char_offset: chunk.char_offset,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let fragment = Fragment {
                fragment_id: id.clone(),
                entity_id: document.entity_id.clone(),
                source_document_id: document.document_id.clone(),
                sequence_index,
                text: chunk.text,
                embedding,
                char_offset: chunk.char_offset,
                overlap_length: chunk.overlap_length,
            };

            match self.store.upsert(fragment).await? {
                UpsertOutcome::Inserted => report.inserted.push(id),
                UpsertOutcome::Unchanged => report.unchanged.push(id),
            }
        }

        self.store.flush().await?;

        info!(
            entity_id = %document.entity_id,
            document_id = %document.document_id,
            inserted = report.inserted.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Document ingested"
        );

        Ok(report)
    }

    /// Embed `texts` with at most `workers` calls in flight. Results keep
    /// input order.
    async fn embed_all(&self, texts: Vec<String>) -> Vec<Result<Vec<f32>>> {
        let total = texts.len();
        let mut results: Vec<Option<Result<Vec<f32>>>> = (0..total).map(|_| None).collect();
        let mut queue = texts.into_iter().enumerate();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.workers {
                let Some((slot, text)) = queue.next() else {
                    break;
                };
                let embedder = self.embedder.clone();
                let limit = self.embed_timeout;
                tasks.spawn(async move { (slot, embed_with_timeout(embedder, &text, limit).await) });
            }

            match tasks.join_next().await {
                Some(Ok((slot, result))) => results[slot] = Some(result),
                Some(Err(e)) => warn!(error = %e, "Embedding task failed"),
                None => break,
            }
        }

        debug!(fragments = total, workers = self.workers, "Embedding pass complete");

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(CreditError::unavailable("embedding", "embedding task aborted"))
                })
            })
            .collect()
    }
}

async fn embed_with_timeout(
    embedder: Arc<dyn Embedder>,
    text: &str,
    limit: Duration,
) -> Result<Vec<f32>> {
    match tokio::time::timeout(limit, embedder.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(CreditError::unavailable(
            "embedding",
            format!("timed out after {:?}", limit),
        )),
    }
}
