//! Credit Risk Orchestrator
//!
//! An agentic credit analyst that:
//! - Indexes filings into overlapping, content-addressed fragments
//! - Gathers market data, news and filing evidence concurrently
//! - Synthesizes a verdict with a language model
//! - Rates deterministically with a rule ladder (the model label is kept as evidence)
//! - Commits every run to an append-only, versioned lakehouse table
//! - Answers natural-language questions over committed analyses
//!
//! RUN LOOP:
//! GATHER (market, news, 3× retrieval) → SYNTHESIZE → RATE → COMMIT

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod indexer;
pub mod lakehouse;
pub mod llm;
pub mod models;
pub mod qa;
pub mod rating;
pub mod retrieval;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CreditError, Result};

// Re-export common types
pub use agent::{AnalysisOutcome, CreditAnalyst, PeerComparison, RankingMetric};
pub use config::{AnalysisConfig, ServiceConfig};
pub use lakehouse::{CommitInfo, Lakehouse, RecordFilter};
pub use models::*;
pub use qa::{Answer, QueryAgent};
pub use rating::{RatingEngine, RatingThresholds};
