//! Error types for the credit risk orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, CreditError>;

#[derive(Error, Debug)]
pub enum CreditError {

    // =============================
    // Analysis Pipeline Errors
    // =============================

    /// A tool, embedding or model call failed or timed out.
    #[error("{input} unavailable: {reason}")]
    SourceUnavailable { input: String, reason: String },

    /// Retrieval returned no fragments.
    #[error("No evidence retrieved: {0}")]
    EmptyEvidence(String),

    #[error("Synthesis output could not be parsed: {0}")]
    SynthesisParseFailure(String),

    #[error("Commit rejected: {0}")]
    CommitFailure(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // =============================
    // Query Agent Errors
    // =============================

    #[error("Question could not be translated into a query: {0}")]
    TranslationFailure(String),

    #[error("Query execution failed: {0}")]
    ExecutionFailure(String),

    // =============================
    // Core Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fragment store error: {0}")]
    StoreError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CreditError {
    pub fn unavailable(input: impl Into<String>, reason: impl Into<String>) -> Self {
        CreditError::SourceUnavailable {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Errors the orchestrator absorbs by substituting an "unavailable" marker.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CreditError::SourceUnavailable { .. } | CreditError::EmptyEvidence(_)
        )
    }

    /// Message shown to the person asking a question or requesting an analysis.
    pub fn user_message(&self) -> String {
        match self {
            CreditError::TranslationFailure(_) => {
                "Sorry, I couldn't turn that question into a query over the stored analyses. \
                 Try naming a company, a rating or a metric."
                    .to_string()
            }
            CreditError::ExecutionFailure(reason) => {
                format!("The query was understood but returned no answer: {}", reason)
            }
            CreditError::SynthesisParseFailure(_) => {
                "The analysis model returned an unusable verdict; no record was stored.".to_string()
            }
            CreditError::CommitFailure(_) => {
                "The analysis completed but could not be stored; no record was written.".to_string()
            }
            CreditError::Cancelled(_) => "The analysis was cancelled before completion.".to_string(),
            other => other.to_string(),
        }
    }

    /// Short machine-readable category for API responses.
    pub fn category(&self) -> &'static str {
        match self {
            CreditError::SourceUnavailable { .. } => "source_unavailable",
            CreditError::EmptyEvidence(_) => "empty_evidence",
            CreditError::SynthesisParseFailure(_) => "synthesis_parse",
            CreditError::CommitFailure(_) => "commit",
            CreditError::Cancelled(_) => "cancelled",
            CreditError::TranslationFailure(_) => "translation",
            CreditError::ExecutionFailure(_) => "execution",
            CreditError::ConfigError(_) => "config",
            CreditError::InvalidInput(_) => "invalid_input",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_taxonomy() {
        assert!(CreditError::unavailable("news", "timed out").is_recoverable());
        assert!(CreditError::EmptyEvidence("risk_factors".into()).is_recoverable());
        assert!(!CreditError::SynthesisParseFailure("bad".into()).is_recoverable());
        assert!(!CreditError::CommitFailure("io".into()).is_recoverable());
    }

    #[test]
    fn test_translation_and_execution_messages_differ() {
        let translation = CreditError::TranslationFailure("no json".into());
        let execution = CreditError::ExecutionFailure("no matching records".into());

        assert_ne!(translation.user_message(), execution.user_message());
        assert_eq!(translation.category(), "translation");
        assert_eq!(execution.category(), "execution");
    }
}
