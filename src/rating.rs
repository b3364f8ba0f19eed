//! Rating engine
//!
//! Deterministic rule ladder over (debt-to-equity, return-on-equity).
//! Rules are evaluated top to bottom, first match wins, and the fallback
//! catches everything else.

use crate::error::CreditError;
use crate::models::{CreditRating, RiskLevel};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounds a rule requires. `None` leaves that axis unconstrained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatioBounds {
    /// Debt-to-equity must be strictly below this (percent).
    pub max_debt_to_equity: Option<f64>,
    /// Return-on-equity must be strictly above this (fraction).
    pub min_return_on_equity: Option<f64>,
}

impl RatioBounds {
    pub fn matches(&self, debt_to_equity: f64, return_on_equity: f64) -> bool {
        let de_ok = self
            .max_debt_to_equity
            .map_or(true, |max| debt_to_equity < max);
        let roe_ok = self
            .min_return_on_equity
            .map_or(true, |min| return_on_equity > min);
        de_ok && roe_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRule {
    pub label: CreditRating,
    pub risk_level: RiskLevel,
    pub bounds: RatioBounds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingFallback {
    pub label: CreditRating,
    pub risk_level: RiskLevel,
}

/// Ordered rating ladder with a mandatory catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingThresholds {
    rules: Vec<RatingRule>,
    fallback: RatingFallback,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        let rule = |label, risk_level, max_de: Option<f64>, min_roe: Option<f64>| RatingRule {
            label,
            risk_level,
            bounds: RatioBounds {
                max_debt_to_equity: max_de,
                min_return_on_equity: min_roe,
            },
        };

        Self {
            rules: vec![
                rule(CreditRating::Aaa, RiskLevel::Minimal, Some(30.0), Some(0.15)),
                rule(CreditRating::Aa, RiskLevel::VeryLow, Some(60.0), Some(0.10)),
                rule(CreditRating::A, RiskLevel::Low, Some(100.0), Some(0.05)),
                rule(CreditRating::Bbb, RiskLevel::Moderate, Some(150.0), Some(0.0)),
                rule(CreditRating::Bb, RiskLevel::Substantial, Some(400.0), None),
                rule(CreditRating::B, RiskLevel::High, Some(800.0), None),
            ],
            fallback: RatingFallback {
                label: CreditRating::Ccc,
                risk_level: RiskLevel::VeryHigh,
            },
        }
    }
}

impl RatingThresholds {
    pub fn new(rules: Vec<RatingRule>, fallback: RatingFallback) -> Result<Self> {
        let ladder = Self { rules, fallback };
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let ladder: RatingThresholds = serde_json::from_str(&raw)?;
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn rules(&self) -> &[RatingRule] {
        &self.rules
    }

    pub fn fallback(&self) -> RatingFallback {
        self.fallback
    }

    /// Rejects ladders where improving a ratio could worsen the label:
    /// labels must weaken down the ladder while bounds only loosen.
    pub fn validate(&self) -> Result<()> {
        for pair in self.rules.windows(2) {
            let (upper, lower) = (&pair[0], &pair[1]);

            if lower.label.rank() < upper.label.rank() {
                return Err(CreditError::ConfigError(format!(
                    "rule {} is stronger than preceding rule {}",
                    lower.label, upper.label
                )));
            }
            if !looser_upper_bound(upper.bounds.max_debt_to_equity, lower.bounds.max_debt_to_equity)
                || !looser_lower_bound(
                    upper.bounds.min_return_on_equity,
                    lower.bounds.min_return_on_equity,
                )
            {
                return Err(CreditError::ConfigError(format!(
                    "bounds for {} are tighter than those for {}",
                    lower.label, upper.label
                )));
            }
        }

        if let Some(last) = self.rules.last() {
            if self.fallback.label.rank() < last.label.rank() {
                return Err(CreditError::ConfigError(
                    "fallback rating must not be stronger than the last rule".into(),
                ));
            }
        }
        Ok(())
    }
}

fn looser_upper_bound(upper: Option<f64>, lower: Option<f64>) -> bool {
    match (upper, lower) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => b >= a,
    }
}

fn looser_lower_bound(upper: Option<f64>, lower: Option<f64>) -> bool {
    match (upper, lower) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => b <= a,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatingOutcome {
    pub label: CreditRating,
    pub risk_level: RiskLevel,
    pub investment_grade: bool,
    /// Index of the rule that fired, `None` for the fallback.
    pub rule_index: Option<usize>,
}

/// Pure rating function over the configured ladder.
#[derive(Debug, Clone, Default)]
pub struct RatingEngine {
    thresholds: RatingThresholds,
}

impl RatingEngine {
    pub fn new(thresholds: RatingThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RatingThresholds {
        &self.thresholds
    }

    /// Risk level the ladder pairs with `label`, used when a label arrives
    /// without ratios to rate.
    pub fn risk_level_for(&self, label: CreditRating) -> RiskLevel {
        self.thresholds
            .rules
            .iter()
            .find(|rule| rule.label == label)
            .map(|rule| rule.risk_level)
            .unwrap_or(self.thresholds.fallback.risk_level)
    }

    pub fn rate(&self, debt_to_equity: f64, return_on_equity: f64) -> RatingOutcome {
        let fired = self
            .thresholds
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.bounds.matches(debt_to_equity, return_on_equity));

        match fired {
            Some((index, rule)) => RatingOutcome {
                label: rule.label,
                risk_level: rule.risk_level,
                investment_grade: rule.label.is_investment_grade(),
                rule_index: Some(index),
            },
            None => RatingOutcome {
                label: self.thresholds.fallback.label,
                risk_level: self.thresholds.fallback.risk_level,
                investment_grade: self.thresholds.fallback.label.is_investment_grade(),
                rule_index: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_ladder_examples() {
        let engine = RatingEngine::default();

        let cases = [
            (15.0, 0.20, CreditRating::Aaa),
            (45.0, 0.12, CreditRating::Aa),
            (90.0, 0.09, CreditRating::A),
            (140.0, 0.02, CreditRating::Bbb),
            (300.0, -0.05, CreditRating::Bb),
        ];

        for (de, roe, expected) in cases {
            assert_eq!(engine.rate(de, roe).label, expected, "d/e={} roe={}", de, roe);
        }
    }

    #[test]
    fn test_investment_grade_follows_label() {
        let engine = RatingEngine::default();
        assert!(engine.rate(140.0, 0.02).investment_grade);
        assert!(!engine.rate(300.0, -0.05).investment_grade);
        assert_eq!(engine.rate(5000.0, -1.0).label, CreditRating::Ccc);
        assert_eq!(engine.rate(5000.0, -1.0).rule_index, None);
    }

    #[test]
    fn test_rate_is_deterministic() {
        let engine = RatingEngine::default();
        for _ in 0..3 {
            assert_eq!(engine.rate(90.0, 0.09), engine.rate(90.0, 0.09));
        }
    }

    #[test]
    fn test_monotone_along_each_axis() {
        let engine = RatingEngine::default();
        let de_grid: Vec<f64> = (-10..=90).map(|i| i as f64 * 10.0).collect();
        let roe_grid: Vec<f64> = (-20..=30).map(|i| i as f64 * 0.01).collect();

        for &roe in &roe_grid {
            for pair in de_grid.windows(2) {
                let (lower_de, higher_de) = (pair[0], pair[1]);
                assert!(
                    engine.rate(lower_de, roe).label.rank()
                        <= engine.rate(higher_de, roe).label.rank(),
                    "lowering d/e from {} to {} worsened rating at roe={}",
                    higher_de,
                    lower_de,
                    roe
                );
            }
        }

        for &de in &de_grid {
            for pair in roe_grid.windows(2) {
                let (lower_roe, higher_roe) = (pair[0], pair[1]);
                assert!(
                    engine.rate(de, higher_roe).label.rank()
                        <= engine.rate(de, lower_roe).label.rank(),
                    "raising roe from {} to {} worsened rating at d/e={}",
                    lower_roe,
                    higher_roe,
                    de
                );
            }
        }
    }

    #[test]
    fn test_risk_level_for_label() {
        let engine = RatingEngine::default();
        assert_eq!(engine.risk_level_for(CreditRating::Bbb), RiskLevel::Moderate);
        assert_eq!(engine.risk_level_for(CreditRating::Ccc), RiskLevel::VeryHigh);
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let engine = RatingEngine::default();
        // d/e exactly at the AAA bound falls through to AA.
        assert_eq!(engine.rate(30.0, 0.20).label, CreditRating::Aa);
        // roe exactly at the BBB floor falls through to BB.
        assert_eq!(engine.rate(140.0, 0.0).label, CreditRating::Bb);
    }

    #[test]
    fn test_non_monotone_ladder_is_rejected() {
        let tighter = RatingRule {
            label: CreditRating::A,
            risk_level: RiskLevel::Low,
            bounds: RatioBounds {
                max_debt_to_equity: Some(20.0),
                min_return_on_equity: None,
            },
        };
        let looser = RatingRule {
            label: CreditRating::Aa,
            risk_level: RiskLevel::VeryLow,
            bounds: RatioBounds {
                max_debt_to_equity: Some(50.0),
                min_return_on_equity: None,
            },
        };
        let fallback = RatingFallback {
            label: CreditRating::Ccc,
            risk_level: RiskLevel::VeryHigh,
        };

        assert!(RatingThresholds::new(vec![tighter, looser], fallback).is_err());
        assert!(RatingThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_ladder_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladder.json");
        let json = serde_json::to_string(&RatingThresholds::default()).unwrap();
        std::fs::write(&path, json).unwrap();

        let ladder = RatingThresholds::from_json_file(&path).unwrap();
        assert_eq!(ladder.rules().len(), 6);
        assert_eq!(ladder.fallback().label, CreditRating::Ccc);
    }
}
