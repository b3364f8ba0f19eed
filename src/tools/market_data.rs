//! Market-data adapter over a Yahoo-style fundamentals endpoint.

use super::{JsonApiClient, MarketDataSource};
use crate::error::CreditError;
use crate::models::{ComputedRatios, FinancialSnapshot};
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct HttpMarketData {
    api: Option<JsonApiClient>,
}

impl HttpMarketData {
    /// Without a base URL every fetch reports the source as unavailable.
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = match base_url {
            Some(url) => Some(JsonApiClient::new(url, timeout, "market_data")?),
            None => None,
        };
        Ok(Self { api })
    }
}

#[async_trait::async_trait]
impl MarketDataSource for HttpMarketData {
    fn name(&self) -> &str {
        "fundamentals_api"
    }

    async fn fetch(&self, symbol: &str) -> Result<FinancialSnapshot> {
        let api = self.api.as_ref().ok_or_else(|| {
            CreditError::unavailable("market_data", "FINANCIAL_API_BASE_URL is not configured")
        })?;

        let body = api
            .get_json(&format!("/api/v1/fundamentals/{}", symbol))
            .await?;
        let snapshot = snapshot_from_fundamentals(symbol, &body);

        if snapshot.is_empty() {
            return Err(CreditError::unavailable(
                "market_data",
                format!("no fundamentals reported for {}", symbol),
            ));
        }

        debug!(symbol, complete = snapshot.is_complete(), "Fundamentals fetched");
        Ok(snapshot)
    }
}

/// Build a snapshot from a fundamentals document.
///
/// Accepts Yahoo field names (`totalDebt`, `debtToEquity`, ...) or their
/// snake_case forms, optionally nested under `info` or `data`. "N/A", null
/// and non-numeric values become `None`.
pub fn snapshot_from_fundamentals(symbol: &str, body: &Value) -> FinancialSnapshot {
    let doc = body
        .get("info")
        .or_else(|| body.get("data"))
        .filter(|v| v.is_object())
        .unwrap_or(body);

    let field = |names: &[&str]| names.iter().find_map(|name| number(doc.get(*name)?));

    FinancialSnapshot {
        entity_id: symbol.to_string(),
        as_of: Utc::now(),
        debt: field(&["totalDebt", "total_debt"]),
        equity: field(&["totalStockholderEquity", "stockholdersEquity", "total_equity"]),
        cash: field(&["totalCash", "total_cash"]),
        free_cash_flow: field(&["freeCashflow", "free_cash_flow"]),
        market_cap: field(&["marketCap", "market_cap"]),
        stock_price: field(&["currentPrice", "current_price"]),
        computed_ratios: ComputedRatios {
            debt_to_equity: field(&["debtToEquity", "debt_to_equity"]),
            return_on_equity: field(&["returnOnEquity", "return_on_equity"]),
        },
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}
