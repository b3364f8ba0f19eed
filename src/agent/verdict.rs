//! Structured verdict extraction from synthesis output.

use crate::error::CreditError;
use crate::llm::extract_json_block;
use crate::models::{CreditRating, RiskLevel};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisVerdict {
    pub rating: CreditRating,
    pub risk_level: Option<RiskLevel>,
    pub investment_grade: bool,
    pub debt_to_equity: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub summary: String,
}

/// Parse the model's reply. Anything without a recognisable rating label
/// is a [`CreditError::SynthesisParseFailure`].
pub fn parse_verdict(text: &str) -> Result<SynthesisVerdict> {
    let value = extract_json_block(text).ok_or_else(|| {
        CreditError::SynthesisParseFailure(format!(
            "no JSON object in model output ({} chars)",
            text.len()
        ))
    })?;

    let raw_rating = value
        .get("rating")
        .or_else(|| value.get("credit_rating"))
        .and_then(Value::as_str)
        .ok_or_else(|| CreditError::SynthesisParseFailure("missing rating".into()))?;
    let rating = parse_rating(raw_rating)?;

    let risk_level = value
        .get("risk_level")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<RiskLevel>().ok());

    let investment_grade = value
        .get("investment_grade")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| rating.is_investment_grade());

    Ok(SynthesisVerdict {
        rating,
        risk_level,
        investment_grade,
        debt_to_equity: number(value.get("debt_to_equity")),
        return_on_equity: number(value.get("return_on_equity")),
        strengths: strings(value.get("strengths")),
        concerns: strings(value.get("concerns")),
        summary: value
            .get("summary")
            .or_else(|| value.get("justification"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn parse_rating(raw: &str) -> Result<CreditRating> {
    let cleaned = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    cleaned
        .parse::<CreditRating>()
        .or_else(|_| cleaned.to_uppercase().parse::<CreditRating>())
        .map_err(|_| CreditError::SynthesisParseFailure(format!("unrecognised rating '{}'", raw)))
}

fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
