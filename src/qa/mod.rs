//! Natural-language query agent
//!
//! QUESTION → TRANSLATE (model) → EXECUTE (lakehouse) → PHRASE (model, optional)

pub mod query;

pub use query::{render, Aggregate, OrderBy, QueryResult, RecordField, StructuredQuery};

use crate::error::CreditError;
use crate::lakehouse::Lakehouse;
use crate::llm::{extract_json_block, LanguageModel};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(60);

const TRANSLATION_PROMPT: &str = r#"Translate the question into a JSON query over stored credit analyses.
Return ONLY the JSON object.

Schema:
{
  "filter": {
    "entity_id": "<ticker>",
    "ratings": ["AAA", "AA", "A", "BBB", "BB", "B", "CCC"],
    "risk_levels": ["minimal", "very_low", "low", "moderate", "substantial", "high", "very_high"],
    "investment_grade": true,
    "min_debt_to_equity": 0, "max_debt_to_equity": 0,
    "min_return_on_equity": 0, "max_return_on_equity": 0,
    "since": "<RFC 3339>", "until": "<RFC 3339>"
  },
  "aggregate": {"op": "list" | "count" | "max" | "min" | "avg", "field": "<field, omitted for list and count>"},
  "order_by": {"field": "<field>", "descending": true},
  "limit": 10,
  "latest_per_entity": true
}
Fields: debt_to_equity (percent), return_on_equity (fraction), free_cash_flow, rating_rank (0 = AAA), run_timestamp.
Omit any key you do not need.
"#;

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub query: StructuredQuery,
    pub result: QueryResult,
    pub answer: String,
    /// False when the deterministic rendering was used.
    pub phrased_by_model: bool,
}

pub struct QueryAgent {
    model: Arc<dyn LanguageModel>,
    lakehouse: Arc<dyn Lakehouse>,
    model_timeout: Duration,
}

impl QueryAgent {
    pub fn new(model: Arc<dyn LanguageModel>, lakehouse: Arc<dyn Lakehouse>) -> Self {
        Self {
            model,
            lakehouse,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    /// Bound each translation and phrasing call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CreditError::InvalidInput("question must not be empty".into()));
        }

        info!(question, "Query agent: translating");
        let query = self.translate(question).await?;
        debug!(query = ?query, "Translated question");

        let result = query.execute(self.lakehouse.as_ref()).await?;
        let rendered = render(&result);

        let (answer, phrased_by_model) = match self.phrase(question, &rendered).await {
            Some(text) => (text, true),
            None => (rendered, false),
        };

        info!(phrased_by_model, "Query agent: answered");

        Ok(Answer {
            question: question.to_string(),
            query,
            result,
            answer,
            phrased_by_model,
        })
    }

    async fn translate(&self, question: &str) -> Result<StructuredQuery> {
        let prompt = format!("{}\nQuestion: {}", TRANSLATION_PROMPT, question);
        let reply = self
            .complete(&prompt)
            .await
            .map_err(|e| CreditError::TranslationFailure(e.to_string()))?;

        let value = extract_json_block(&reply).ok_or_else(|| {
            warn!(question, "Model reply contained no query");
            CreditError::TranslationFailure("model reply contained no JSON query".into())
        })?;
        StructuredQuery::from_value(value)
    }

    async fn phrase(&self, question: &str, rendered: &str) -> Option<String> {
        let prompt = format!(
            "You are a financial analyst. Answer this question based on the query result.\n\n\
             Question: {}\n\nResult:\n{}\n\nProvide a clear, conversational answer.",
            question, rendered
        );
        match self.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Answer phrasing failed, using plain rendering");
                None
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.model_timeout, self.model.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(CreditError::unavailable(
                "language_model",
                format!("timed out after {} ms", self.model_timeout.as_millis()),
            )),
        }
    }
}
