//! Synthesis context
//!
//! Aggregated output of the five gathering steps. Every step is present
//! exactly once, either with data or with an explicit marker.

use crate::config::ContextLimits;
use crate::models::{
    AnalysisInput, Confidence, FinancialSnapshot, FragmentRef, NewsItem, RetrievalResult,
};
use serde::Serialize;
use crate::tools::calculator;
use std::collections::HashSet;

const UNAVAILABLE: &str = "UNAVAILABLE";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum StepOutcome<T> {
    Available(T),
    /// The call succeeded with nothing to show.
    Empty,
    Unavailable(String),
}

impl<T> StepOutcome<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            StepOutcome::Available(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, StepOutcome::Available(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            StepOutcome::Available(_) => "available",
            StepOutcome::Empty => "empty",
            StepOutcome::Unavailable(_) => "unavailable",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StepOutcome::Available(_) => "available".to_string(),
            StepOutcome::Empty => "empty".to_string(),
            StepOutcome::Unavailable(reason) => format!("unavailable ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisContext {
    pub entity_id: String,
    pub market_data: StepOutcome<FinancialSnapshot>,
    pub news: StepOutcome<Vec<NewsItem>>,
    pub risk_factors: StepOutcome<RetrievalResult>,
    pub financial_performance: StepOutcome<RetrievalResult>,
    pub debt_liquidity: StepOutcome<RetrievalResult>,
}

impl SynthesisContext {
    fn retrievals(&self) -> [(AnalysisInput, &StepOutcome<RetrievalResult>); 3] {
        [
            (AnalysisInput::RiskFactors, &self.risk_factors),
            (AnalysisInput::FinancialPerformance, &self.financial_performance),
            (AnalysisInput::DebtLiquidity, &self.debt_liquidity),
        ]
    }

    /// Inputs that were empty or unavailable, in step order.
    pub fn unavailable_inputs(&self) -> Vec<AnalysisInput> {
        let mut missing = Vec::new();
        if !self.market_data.is_available() {
            missing.push(AnalysisInput::MarketData);
        }
        if !self.news.is_available() {
            missing.push(AnalysisInput::News);
        }
        for (input, outcome) in self.retrievals() {
            if !outcome.is_available() {
                missing.push(input);
            }
        }
        missing
    }

    /// Full only when every input arrived and the snapshot has no gaps.
    pub fn confidence(&self) -> Confidence {
        let snapshot_complete = self
            .market_data
            .available()
            .is_some_and(FinancialSnapshot::is_complete);

        if snapshot_complete && self.unavailable_inputs().is_empty() {
            Confidence::Full
        } else {
            Confidence::Partial
        }
    }

    /// Retrieved fragments in step then rank order, without duplicates.
    pub fn citations(&self) -> Vec<FragmentRef> {
        let mut seen = HashSet::new();
        self.retrievals()
            .into_iter()
            .filter_map(|(_, outcome)| outcome.available())
            .flat_map(|result| result.references())
            .filter(|reference| seen.insert(reference.fragment_id.clone()))
            .collect()
    }

    pub fn news_headlines(&self) -> Vec<String> {
        self.news
            .available()
            .map(|items| items.iter().map(|n| n.headline.clone()).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<&FinancialSnapshot> {
        self.market_data.available()
    }

    pub fn build_prompt(&self, limits: &ContextLimits) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("Analyze the creditworthiness of {}.\n\n", self.entity_id));

        prompt.push_str("MARKET DATA:\n");
        match &self.market_data {
            StepOutcome::Available(snapshot) => {
                let ratios = &snapshot.computed_ratios;
                let debt_to_equity = snapshot_debt_to_equity(snapshot);

                prompt.push_str(&format!("- Stock Price: {}\n", money(snapshot.stock_price)));
                prompt.push_str(&format!("- Market Cap: {}\n", money(snapshot.market_cap)));
                prompt.push_str(&format!("- Total Debt: {}\n", money(snapshot.debt)));
                prompt.push_str(&format!("- Total Equity: {}\n", money(snapshot.equity)));
                prompt.push_str(&format!("- Total Cash: {}\n", money(snapshot.cash)));
                prompt.push_str(&format!("- Free Cash Flow: {}\n", money(snapshot.free_cash_flow)));
                prompt.push_str(&format!("- Debt-to-Equity (%): {}\n", figure(debt_to_equity)));
                if let Some(de) = debt_to_equity {
                    prompt.push_str(&format!("- Leverage Risk: {}\n", calculator::leverage_risk(de)));
                }
                prompt.push_str(&format!(
                    "- Return on Equity (fraction): {}\n",
                    figure(ratios.return_on_equity)
                ));
            }
            other => {
                prompt.push_str(&format!("{}\n", marker(other)));
            }
        }

        prompt.push_str("\nRECENT NEWS:\n");
        match &self.news {
            StepOutcome::Available(items) => {
                let mut news = String::new();
                for (i, item) in items.iter().enumerate() {
                    news.push_str(&format!("{}. {}\n", i + 1, item.headline));
                    if !item.summary.is_empty() {
                        news.push_str(&format!("   {}\n", truncate_chars(&item.summary, 200)));
                    }
                }
                prompt.push_str(&truncate_chars(&news, limits.news_chars));
                prompt.push('\n');
            }
            other => {
                prompt.push_str(&format!("{}\n", marker(other)));
            }
        }

        for (title, outcome) in [
            ("RISK FACTORS (from 10-K)", &self.risk_factors),
            ("FINANCIAL PERFORMANCE (from 10-K)", &self.financial_performance),
            ("DEBT & LIQUIDITY (from 10-K)", &self.debt_liquidity),
        ] {
            prompt.push_str(&format!("\n{}:\n", title));
            match outcome {
                StepOutcome::Available(result) => {
                    prompt.push_str(&truncate_chars(
                        &result.joined_text("\n\n"),
                        limits.section_chars,
                    ));
                    prompt.push('\n');
                }
                other => {
                    prompt.push_str(&format!("{}\n", marker(other)));
                }
            }
        }

        prompt.push_str(VERDICT_INSTRUCTIONS);
        prompt
    }
}

const VERDICT_INSTRUCTIONS: &str = r#"
Respond with one JSON object and nothing else:
{
  "rating": "AAA | AA | A | BBB | BB | B | CCC",
  "risk_level": "minimal | very_low | low | moderate | substantial | high | very_high",
  "investment_grade": true,
  "debt_to_equity": <number in percent or null>,
  "return_on_equity": <fraction or null>,
  "strengths": ["3-4 credit strengths"],
  "concerns": ["3-4 credit concerns"],
  "summary": "2-3 sentence justification"
}
"#;

/// Reported ratio, else one derived from raw debt and equity.
pub(crate) fn snapshot_debt_to_equity(snapshot: &FinancialSnapshot) -> Option<f64> {
    snapshot.computed_ratios.debt_to_equity.or_else(|| match (snapshot.debt, snapshot.equity) {
        (Some(debt), Some(equity)) => calculator::debt_to_equity(debt, equity),
        _ => None,
    })
}

fn marker<T>(outcome: &StepOutcome<T>) -> String {
    match outcome {
        StepOutcome::Unavailable(reason) => format!("{} ({})", UNAVAILABLE, reason),
        _ => format!("{} (no data returned)", UNAVAILABLE),
    }
}

fn money(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("${:.2}", v))
}

fn figure(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.4}", v))
}

/// First `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
