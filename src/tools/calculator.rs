//! Financial calculator
//!
//! Pure ratio arithmetic. Functions return `None` when the denominator is
//! zero or an input is not finite; [`calculate`] turns that into
//! `InvalidInput` for callers outside the analysis pipeline.

use crate::error::CreditError;
use crate::models::RiskLevel;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Debt-to-equity in percent, the convention the market data and the
/// rating ladder use.
pub fn debt_to_equity(debt: f64, equity: f64) -> Option<f64> {
    ratio(debt, equity).map(|r| r * 100.0)
}

/// Risk band for a debt-to-equity value given in percent.
pub fn leverage_risk(debt_to_equity_pct: f64) -> RiskLevel {
    let multiple = debt_to_equity_pct / 100.0;
    if multiple < 0.5 {
        RiskLevel::Low
    } else if multiple < 1.0 {
        RiskLevel::Moderate
    } else if multiple < 2.0 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    }
}

/// Debt-to-assets as a fraction.
pub fn debt_to_assets(debt: f64, assets: f64) -> Option<f64> {
    ratio(debt, assets)
}

pub fn asset_leverage_risk(debt_to_assets: f64) -> RiskLevel {
    if debt_to_assets < 0.3 {
        RiskLevel::Low
    } else if debt_to_assets < 0.5 {
        RiskLevel::Moderate
    } else {
        RiskLevel::High
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InterestCoverage {
    /// No interest expense.
    Infinite,
    Times(f64),
}

impl InterestCoverage {
    pub fn risk_level(&self) -> RiskLevel {
        match *self {
            InterestCoverage::Infinite => RiskLevel::VeryLow,
            InterestCoverage::Times(x) if x > 8.0 => RiskLevel::VeryLow,
            InterestCoverage::Times(x) if x > 4.0 => RiskLevel::Low,
            InterestCoverage::Times(x) if x > 2.5 => RiskLevel::Moderate,
            InterestCoverage::Times(x) if x > 1.5 => RiskLevel::High,
            InterestCoverage::Times(_) => RiskLevel::VeryHigh,
        }
    }
}

pub fn interest_coverage(ebitda: f64, interest_expense: f64) -> Option<InterestCoverage> {
    if !ebitda.is_finite() || !interest_expense.is_finite() {
        return None;
    }
    if interest_expense == 0.0 {
        return Some(InterestCoverage::Infinite);
    }
    Some(InterestCoverage::Times(ebitda / interest_expense))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityStatus {
    Strong,
    Adequate,
    Marginal,
    Weak,
}

pub fn current_ratio(current_assets: f64, current_liabilities: f64) -> Option<(f64, LiquidityStatus)> {
    let r = ratio(current_assets, current_liabilities)?;
    let status = if r > 2.0 {
        LiquidityStatus::Strong
    } else if r > 1.5 {
        LiquidityStatus::Adequate
    } else if r > 1.0 {
        LiquidityStatus::Marginal
    } else {
        LiquidityStatus::Weak
    };
    Some((r, status))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ZScoreZone {
    Safe,
    Grey,
    Distress,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AltmanInputs {
    pub working_capital: f64,
    pub retained_earnings: f64,
    pub ebit: f64,
    pub market_cap: f64,
    pub sales: f64,
    pub total_assets: f64,
    pub total_liabilities: f64,
}

/// Altman Z-score for public manufacturers.
pub fn altman_z_score(inputs: &AltmanInputs) -> Option<(f64, ZScoreZone)> {
    let x1 = ratio(inputs.working_capital, inputs.total_assets)?;
    let x2 = ratio(inputs.retained_earnings, inputs.total_assets)?;
    let x3 = ratio(inputs.ebit, inputs.total_assets)?;
    let x4 = ratio(inputs.market_cap, inputs.total_liabilities)?;
    let x5 = ratio(inputs.sales, inputs.total_assets)?;

    let z = 1.2 * x1 + 1.4 * x2 + 3.3 * x3 + 0.6 * x4 + 1.0 * x5;
    let zone = if z > 2.99 {
        ZScoreZone::Safe
    } else if z > 1.81 {
        ZScoreZone::Grey
    } else {
        ZScoreZone::Distress
    };
    Some((z, zone))
}

/// One calculator request, tagged by `ratio`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "ratio", rename_all = "snake_case")]
pub enum Calculation {
    DebtToEquity { debt: f64, equity: f64 },
    DebtToAssets { debt: f64, assets: f64 },
    InterestCoverage { ebitda: f64, interest_expense: f64 },
    CurrentRatio { current_assets: f64, current_liabilities: f64 },
    AltmanZScore(AltmanInputs),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "ratio", rename_all = "snake_case")]
pub enum CalculationResult {
    DebtToEquity { percent: f64, risk_level: RiskLevel },
    DebtToAssets { value: f64, risk_level: RiskLevel },
    InterestCoverage { coverage: InterestCoverage, risk_level: RiskLevel },
    CurrentRatio { value: f64, liquidity: LiquidityStatus },
    AltmanZScore { value: f64, zone: ZScoreZone },
}

pub fn calculate(calculation: &Calculation) -> Result<CalculationResult> {
    let result = match *calculation {
        Calculation::DebtToEquity { debt, equity } => {
            debt_to_equity(debt, equity).map(|percent| CalculationResult::DebtToEquity {
                percent,
                risk_level: leverage_risk(percent),
            })
        }
        Calculation::DebtToAssets { debt, assets } => {
            debt_to_assets(debt, assets).map(|value| CalculationResult::DebtToAssets {
                value,
                risk_level: asset_leverage_risk(value),
            })
        }
        Calculation::InterestCoverage {
            ebitda,
            interest_expense,
        } => interest_coverage(ebitda, interest_expense).map(|coverage| {
            CalculationResult::InterestCoverage {
                coverage,
                risk_level: coverage.risk_level(),
            }
        }),
        Calculation::CurrentRatio {
            current_assets,
            current_liabilities,
        } => current_ratio(current_assets, current_liabilities)
            .map(|(value, liquidity)| CalculationResult::CurrentRatio { value, liquidity }),
        Calculation::AltmanZScore(inputs) => altman_z_score(&inputs)
            .map(|(value, zone)| CalculationResult::AltmanZScore { value, zone }),
    };

    result.ok_or_else(|| {
        CreditError::InvalidInput("ratio undefined: zero denominator or non-finite input".into())
    })
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !numerator.is_finite() || !denominator.is_finite() {
        return None;
    }
    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debt_to_equity_is_percent() {
        assert_eq!(debt_to_equity(100_000.0, 50_000.0), Some(200.0));
        assert_eq!(debt_to_equity(1.0, 0.0), None);
        assert_eq!(leverage_risk(200.0), RiskLevel::VeryHigh);
        assert_eq!(leverage_risk(40.0), RiskLevel::Low);
    }

    #[test]
    fn test_interest_coverage_bands() {
        assert_eq!(interest_coverage(120.0, 0.0), Some(InterestCoverage::Infinite));
        let coverage = interest_coverage(120_000.0, 3_000.0).unwrap();
        assert_eq!(coverage, InterestCoverage::Times(40.0));
        assert_eq!(coverage.risk_level(), RiskLevel::VeryLow);
        assert_eq!(
            interest_coverage(3.0, 1.0).unwrap().risk_level(),
            RiskLevel::Moderate
        );
    }

    #[test]
    fn test_current_ratio_status() {
        assert_eq!(current_ratio(3.0, 1.0), Some((3.0, LiquidityStatus::Strong)));
        assert_eq!(current_ratio(0.8, 1.0), Some((0.8, LiquidityStatus::Weak)));
        assert_eq!(current_ratio(1.0, 0.0), None);
    }

    #[test]
    fn test_calculate_parses_tagged_request() {
        let request: Calculation = serde_json::from_value(serde_json::json!({
            "ratio": "debt_to_assets",
            "debt": 60.0,
            "assets": 100.0
        }))
        .unwrap();

        assert_eq!(
            calculate(&request).unwrap(),
            CalculationResult::DebtToAssets {
                value: 0.6,
                risk_level: RiskLevel::High
            }
        );
        assert!(matches!(
            calculate(&Calculation::CurrentRatio {
                current_assets: 1.0,
                current_liabilities: 0.0
            }),
            Err(CreditError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_altman_zones() {
        let healthy = AltmanInputs {
            working_capital: 20.0,
            retained_earnings: 40.0,
            ebit: 15.0,
            market_cap: 200.0,
            sales: 120.0,
            total_assets: 100.0,
            total_liabilities: 50.0,
        };
        let (z, zone) = altman_z_score(&healthy).unwrap();
        assert!(z > 2.99);
        assert_eq!(zone, ZScoreZone::Safe);

        let distressed = AltmanInputs {
            working_capital: -10.0,
            retained_earnings: -20.0,
            ebit: -2.0,
            market_cap: 5.0,
            sales: 30.0,
            total_assets: 100.0,
            total_liabilities: 90.0,
        };
        assert_eq!(altman_z_score(&distressed).unwrap().1, ZScoreZone::Distress);
    }
}
