//! Structured queries over committed analysis records.
//!
//! The query agent asks the model for one of these instead of raw SQL, so
//! every translated question is validated before it touches the table.

use crate::error::CreditError;
use crate::lakehouse::{Lakehouse, RecordFilter};
use crate::models::AnalysisRecord;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    DebtToEquity,
    ReturnOnEquity,
    FreeCashFlow,
    /// 0 for AAA up to 6 for CCC.
    RatingRank,
    RunTimestamp,
}

impl RecordField {
    pub fn value(&self, record: &AnalysisRecord) -> Option<f64> {
        match self {
            RecordField::DebtToEquity => record.debt_to_equity,
            RecordField::ReturnOnEquity => record.return_on_equity,
            RecordField::FreeCashFlow => record.free_cash_flow,
            RecordField::RatingRank => Some(f64::from(record.rating.rank())),
            RecordField::RunTimestamp => Some(record.run_timestamp.timestamp_millis() as f64),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordField::DebtToEquity => "debt_to_equity",
            RecordField::ReturnOnEquity => "return_on_equity",
            RecordField::FreeCashFlow => "free_cash_flow",
            RecordField::RatingRank => "rating_rank",
            RecordField::RunTimestamp => "run_timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    List,
    Count,
    Max { field: RecordField },
    Min { field: RecordField },
    Avg { field: RecordField },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBy {
    pub field: RecordField,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StructuredQuery {
    pub filter: RecordFilter,
    pub aggregate: Aggregate,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    /// Keep only the newest run per entity before aggregating.
    pub latest_per_entity: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    Records { records: Vec<AnalysisRecord> },
    Count { count: usize },
    Value {
        aggregate: Aggregate,
        value: f64,
        /// Entity holding the extreme value, for max and min.
        entity_id: Option<String>,
        sample_size: usize,
    },
}

impl StructuredQuery {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let query: StructuredQuery = serde_json::from_value(value)
            .map_err(|e| CreditError::TranslationFailure(format!("invalid query: {}", e)))?;
        if query.limit == Some(0) {
            return Err(CreditError::TranslationFailure("limit must be positive".into()));
        }
        Ok(query)
    }

    /// Run against the latest table version. An empty result set is an
    /// execution failure.
    pub async fn execute(&self, lakehouse: &dyn Lakehouse) -> Result<QueryResult> {
        let records = lakehouse
            .read(&self.filter, None)
            .await
            .map_err(|e| CreditError::ExecutionFailure(format!("read failed: {}", e)))?;
        self.evaluate(records)
    }

    pub fn evaluate(&self, records: Vec<AnalysisRecord>) -> Result<QueryResult> {
        let mut records: Vec<AnalysisRecord> =
            records.into_iter().filter(|r| self.filter.matches(r)).collect();

        if self.latest_per_entity {
            records = latest_per_entity(records);
        }
        if records.is_empty() {
            return Err(CreditError::ExecutionFailure("no matching records".into()));
        }

        match self.aggregate {
            Aggregate::List => {
                if let Some(order) = self.order_by {
                    sort_by_field(&mut records, order);
                }
                if let Some(limit) = self.limit {
                    records.truncate(limit);
                }
                Ok(QueryResult::Records { records })
            }
            Aggregate::Count => Ok(QueryResult::Count {
                count: records.len(),
            }),
            Aggregate::Max { field } | Aggregate::Min { field } | Aggregate::Avg { field } => {
                let values: Vec<(f64, &AnalysisRecord)> = records
                    .iter()
                    .filter_map(|r| field.value(r).map(|v| (v, r)))
                    .collect();
                if values.is_empty() {
                    return Err(CreditError::ExecutionFailure(format!(
                        "no matching record has {}",
                        field.name()
                    )));
                }

                let (value, entity_id) = match self.aggregate {
                    Aggregate::Max { .. } => values
                        .iter()
                        .max_by(|a, b| a.0.total_cmp(&b.0))
                        .map(|(v, r)| (*v, Some(r.entity_id.clone()))),
                    Aggregate::Min { .. } => values
                        .iter()
                        .min_by(|a, b| a.0.total_cmp(&b.0))
                        .map(|(v, r)| (*v, Some(r.entity_id.clone()))),
                    _ => Some((
                        values.iter().map(|(v, _)| v).sum::<f64>() / values.len() as f64,
                        None,
                    )),
                }
                .unwrap_or((f64::NAN, None));

                Ok(QueryResult::Value {
                    aggregate: self.aggregate,
                    value,
                    entity_id,
                    sample_size: values.len(),
                })
            }
        }
    }
}

fn latest_per_entity(records: Vec<AnalysisRecord>) -> Vec<AnalysisRecord> {
    let mut newest: HashMap<String, AnalysisRecord> = HashMap::new();
    for record in records {
        let key = record.entity_id.to_ascii_uppercase();
        match newest.get(&key) {
            Some(existing) if existing.run_timestamp >= record.run_timestamp => {}
            _ => {
                newest.insert(key, record);
            }
        }
    }
    let mut records: Vec<AnalysisRecord> = newest.into_values().collect();
    records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    records
}

fn sort_by_field(records: &mut [AnalysisRecord], order: OrderBy) {
    records.sort_by(|a, b| match (order.field.value(a), order.field.value(b)) {
        (Some(x), Some(y)) if order.descending => y.total_cmp(&x),
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Plain-text rendering used when the model cannot phrase the answer.
pub fn render(result: &QueryResult) -> String {
    match result {
        QueryResult::Count { count } => format!("{} matching analyses.", count),
        QueryResult::Value {
            aggregate,
            value,
            entity_id,
            sample_size,
        } => {
            let (label, field) = match aggregate {
                Aggregate::Max { field } => ("Highest", field),
                Aggregate::Min { field } => ("Lowest", field),
                Aggregate::Avg { field } => ("Average", field),
                _ => return format!("{:.2}", value),
            };
            match entity_id {
                Some(entity) => format!(
                    "{} {}: {:.2} ({}, across {} analyses).",
                    label,
                    field.name(),
                    value,
                    entity,
                    sample_size
                ),
                None => format!(
                    "{} {}: {:.2} across {} analyses.",
                    label,
                    field.name(),
                    value,
                    sample_size
                ),
            }
        }
        QueryResult::Records { records } => {
            let mut text = String::new();
            for record in records {
                text.push_str(&format!(
                    "{}: {} ({} risk, {}) d/e {} roe {} on {}\n",
                    record.entity_id,
                    record.rating,
                    record.risk_level,
                    if record.investment_grade {
                        "investment grade"
                    } else {
                        "speculative"
                    },
                    optional(record.debt_to_equity),
                    optional(record.return_on_equity),
                    record.run_timestamp.format("%Y-%m-%d")
                ));
            }
            text.trim_end().to_string()
        }
    }
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreditRating;
    use crate::testing::sample_record;
    use chrono::Duration;
    use serde_json::json;

    fn records() -> Vec<AnalysisRecord> {
        vec![
            sample_record("AAPL", CreditRating::Aa, Some(45.0), Some(0.12)),
            sample_record("TSLA", CreditRating::Bb, Some(300.0), Some(-0.05)),
            sample_record("JPM", CreditRating::A, Some(90.0), None),
        ]
    }

    #[test]
    fn test_query_parses_from_model_json() {
        let query = StructuredQuery::from_value(json!({
            "filter": {"investment_grade": true},
            "aggregate": {"op": "max", "field": "debt_to_equity"}
        }))
        .unwrap();

        assert_eq!(query.filter.investment_grade, Some(true));
        assert_eq!(
            query.aggregate,
            Aggregate::Max {
                field: RecordField::DebtToEquity
            }
        );
    }

    #[test]
    fn test_unknown_field_is_translation_failure() {
        let err = StructuredQuery::from_value(json!({
            "aggregate": {"op": "max", "field": "ebitda"}
        }))
        .unwrap_err();
        assert!(matches!(err, CreditError::TranslationFailure(_)));
    }

    #[test]
    fn test_max_names_entity() {
        let query = StructuredQuery {
            aggregate: Aggregate::Max {
                field: RecordField::DebtToEquity,
            },
            ..Default::default()
        };
        match query.evaluate(records()).unwrap() {
            QueryResult::Value {
                value, entity_id, ..
            } => {
                assert_eq!(value, 300.0);
                assert_eq!(entity_id.as_deref(), Some("TSLA"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_average_skips_missing_values() {
        let query = StructuredQuery {
            aggregate: Aggregate::Avg {
                field: RecordField::ReturnOnEquity,
            },
            ..Default::default()
        };
        match query.evaluate(records()).unwrap() {
            QueryResult::Value {
                value, sample_size, ..
            } => {
                assert!((value - 0.035).abs() < 1e-9);
                assert_eq!(sample_size, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_no_rows_is_execution_failure() {
        let query = StructuredQuery {
            filter: RecordFilter::entity("MSFT"),
            aggregate: Aggregate::Count,
            ..Default::default()
        };
        let err = query.evaluate(records()).unwrap_err();
        assert!(matches!(err, CreditError::ExecutionFailure(_)));
    }

    #[test]
    fn test_latest_per_entity_then_order() {
        let mut old = sample_record("AAPL", CreditRating::Bbb, Some(140.0), Some(0.02));
        old.run_timestamp -= Duration::days(30);
        let mut all = records();
        all.push(old);

        let query = StructuredQuery {
            order_by: Some(OrderBy {
                field: RecordField::DebtToEquity,
                descending: false,
            }),
            limit: Some(2),
            latest_per_entity: true,
            ..Default::default()
        };
        match query.evaluate(all).unwrap() {
            QueryResult::Records { records } => {
                let ids: Vec<&str> = records.iter().map(|r| r.entity_id.as_str()).collect();
                assert_eq!(ids, vec!["AAPL", "JPM"]);
                assert_eq!(records[0].rating, CreditRating::Aa);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let result = QueryResult::Count { count: 3 };
        assert_eq!(render(&result), "3 matching analyses.");
        assert_eq!(render(&result), render(&result));
    }
}
