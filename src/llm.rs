//! Language model capability
//!
//! Used for analysis synthesis, question translation and answer phrasing.
//! Callers treat every completion as unreliable.

use crate::error::CreditError;
use crate::Result;
use serde_json::Value;

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Stand-in used when no model credentials are configured. Every call
/// reports the model as unavailable.
pub struct DisabledModel {
    reason: String,
}

impl DisabledModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(CreditError::unavailable("language_model", self.reason.clone()))
    }
}

/// Pull a JSON object out of model output.
///
/// Tries a ```json fenced block first, then any fenced block, then the
/// outermost `{ ... }` span.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for fence in ["```json", "```JSON", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(after[..end].trim()) {
                    return Some(value);
                }
            }
        }
    }

    let brace_start = trimmed.find('{')?;
    let brace_end = trimmed.rfind('}')?;
    if brace_end <= brace_start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[brace_start..=brace_end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
