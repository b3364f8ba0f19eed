//! Core data models for credit analysis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CreditError;

//
// ================= Enums =================
//

/// Discrete credit rating, best first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CreditRating {
    #[serde(rename = "AAA")]
    Aaa,
    #[serde(rename = "AA")]
    Aa,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "BBB")]
    Bbb,
    #[serde(rename = "BB")]
    Bb,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "CCC")]
    Ccc,
}

impl CreditRating {
    pub const ALL: [CreditRating; 7] = [
        CreditRating::Aaa,
        CreditRating::Aa,
        CreditRating::A,
        CreditRating::Bbb,
        CreditRating::Bb,
        CreditRating::B,
        CreditRating::Ccc,
    ];

    /// 0 is the strongest rating.
    pub fn rank(&self) -> u8 {
        match self {
            CreditRating::Aaa => 0,
            CreditRating::Aa => 1,
            CreditRating::A => 2,
            CreditRating::Bbb => 3,
            CreditRating::Bb => 4,
            CreditRating::B => 5,
            CreditRating::Ccc => 6,
        }
    }

    pub fn is_investment_grade(&self) -> bool {
        self.rank() <= CreditRating::Bbb.rank()
    }

    pub fn label(&self) -> &'static str {
        match self {
            CreditRating::Aaa => "AAA",
            CreditRating::Aa => "AA",
            CreditRating::A => "A",
            CreditRating::Bbb => "BBB",
            CreditRating::Bb => "BB",
            CreditRating::B => "B",
            CreditRating::Ccc => "CCC",
        }
    }
}

impl fmt::Display for CreditRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for CreditRating {
    type Err = CreditError;

    /// Accepts S&P style labels and their Moody's equivalents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rating = match s.trim() {
            "AAA" | "Aaa" => CreditRating::Aaa,
            "AA" | "Aa" => CreditRating::Aa,
            "A" => CreditRating::A,
            "BBB" | "Baa" => CreditRating::Bbb,
            "BB" | "Ba" => CreditRating::Bb,
            "B" => CreditRating::B,
            "CCC" | "Caa" => CreditRating::Ccc,
            other => {
                return Err(CreditError::InvalidInput(format!(
                    "unknown credit rating '{}'",
                    other
                )))
            }
        };
        Ok(rating)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    VeryLow,
    Low,
    Moderate,
    Substantial,
    High,
    VeryHigh,
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Minimal => 0,
            RiskLevel::VeryLow => 1,
            RiskLevel::Low => 2,
            RiskLevel::Moderate => 3,
            RiskLevel::Substantial => 4,
            RiskLevel::High => 5,
            RiskLevel::VeryHigh => 6,
        }
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Minimal => "Minimal",
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Substantial => "Substantial",
            RiskLevel::High => "High",
            RiskLevel::VeryHigh => "Very High",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RiskLevel {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();

        match normalized.as_str() {
            "minimal" => Ok(RiskLevel::Minimal),
            "verylow" => Ok(RiskLevel::VeryLow),
            "low" => Ok(RiskLevel::Low),
            "moderate" | "medium" => Ok(RiskLevel::Moderate),
            "substantial" => Ok(RiskLevel::Substantial),
            "high" => Ok(RiskLevel::High),
            "veryhigh" | "critical" => Ok(RiskLevel::VeryHigh),
            _ => Err(CreditError::InvalidInput(format!("unknown risk level '{}'", s))),
        }
    }
}

/// Whether every analysis input was available when synthesis ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Full,
    Partial,
}

/// Which component produced the stored rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RatingSource {
    #[default]
    RuleLadder,
    Model,
    /// Neither ratios nor a model verdict; the ladder's fallback label.
    Fallback,
}

/// The five gathered inputs that precede synthesis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisInput {
    MarketData,
    News,
    RiskFactors,
    FinancialPerformance,
    DebtLiquidity,
}

impl AnalysisInput {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisInput::MarketData => "market_data",
            AnalysisInput::News => "news",
            AnalysisInput::RiskFactors => "risk_factors",
            AnalysisInput::FinancialPerformance => "financial_performance",
            AnalysisInput::DebtLiquidity => "debt_liquidity",
        }
    }
}

impl fmt::Display for AnalysisInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//
// ================= Documents & Fragments =================
//

/// A source document handed to the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub entity_id: String,
    pub document_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Content hash of (entity, document, offset, text).
    pub fragment_id: String,
    pub entity_id: String,
    pub source_document_id: String,
    pub sequence_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Offset in characters from the start of the document.
    pub char_offset: usize,
    /// Characters shared with the previous fragment of the same document.
    pub overlap_length: usize,
}

impl Fragment {
    pub fn reference(&self) -> FragmentRef {
        FragmentRef {
            fragment_id: self.fragment_id.clone(),
            entity_id: self.entity_id.clone(),
            source_document_id: self.source_document_id.clone(),
            sequence_index: self.sequence_index,
        }
    }

    /// Ordering used to break similarity ties.
    pub fn sequence_key(&self) -> (&str, &str, u32) {
        (&self.entity_id, &self.source_document_id, self.sequence_index)
    }
}

/// Citation of a fragment inside an analysis record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FragmentRef {
    pub fragment_id: String,
    pub entity_id: String,
    pub source_document_id: String,
    pub sequence_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    pub score: f32,
}

/// Top-k fragments, descending by score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredFragment>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn references(&self) -> impl Iterator<Item = FragmentRef> + '_ {
        self.hits.iter().map(|hit| hit.fragment.reference())
    }

    pub fn joined_text(&self, separator: &str) -> String {
        self.hits
            .iter()
            .map(|hit| hit.fragment.text.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

//
// ================= External signals =================
//

/// Ratios derived by the market-data provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComputedRatios {
    /// Percent, e.g. 154.5 means total debt is 1.545x equity.
    pub debt_to_equity: Option<f64>,
    /// Fraction, e.g. 0.2 means 20%.
    pub return_on_equity: Option<f64>,
}

/// Fundamentals for one entity. Missing fields are `None`, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub entity_id: String,
    pub as_of: DateTime<Utc>,
    pub debt: Option<f64>,
    pub equity: Option<f64>,
    pub cash: Option<f64>,
    pub free_cash_flow: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub stock_price: Option<f64>,
    pub computed_ratios: ComputedRatios,
}

impl FinancialSnapshot {
    pub fn empty(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            as_of: Utc::now(),
            debt: None,
            equity: None,
            cash: None,
            free_cash_flow: None,
            market_cap: None,
            stock_price: None,
            computed_ratios: ComputedRatios::default(),
        }
    }

    /// True when every field the analysis consumes is present.
    pub fn is_complete(&self) -> bool {
        self.debt.is_some()
            && self.equity.is_some()
            && self.cash.is_some()
            && self.free_cash_flow.is_some()
            && self.computed_ratios.debt_to_equity.is_some()
            && self.computed_ratios.return_on_equity.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.debt.is_none()
            && self.equity.is_none()
            && self.cash.is_none()
            && self.free_cash_flow.is_none()
            && self.computed_ratios.debt_to_equity.is_none()
            && self.computed_ratios.return_on_equity.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub summary: String,
}

//
// ================= Analysis Record =================
//

/// One committed credit assessment.
///
/// Fields added after the first release carry `#[serde(default)]` so that
/// rows committed earlier still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub entity_id: String,
    pub run_timestamp: DateTime<Utc>,
    pub rating: CreditRating,
    pub risk_level: RiskLevel,
    pub investment_grade: bool,
    pub debt_to_equity: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub evidence_citations: Vec<FragmentRef>,
    pub confidence: Confidence,

    /// Nil for rows written before ids were stored.
    #[serde(default)]
    pub record_id: Uuid,
    #[serde(default)]
    pub run_id: Uuid,
    #[serde(default)]
    pub rating_source: RatingSource,
    #[serde(default)]
    pub model_rating: Option<CreditRating>,
    #[serde(default)]
    pub unavailable_inputs: Vec<AnalysisInput>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub news_headlines: Vec<String>,
    #[serde(default)]
    pub context_hash: String,
}

impl AnalysisRecord {
    /// True when the model's label was overridden by the rule ladder.
    pub fn rating_disagreement(&self) -> bool {
        matches!(self.model_rating, Some(model) if model != self.rating)
    }
}
