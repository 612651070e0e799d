use anyhow::ensure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RiskTolerance {
    Low,
    Moderate,
    High,
}

impl TryFrom<String> for RiskTolerance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "conservative" => Ok(Self::Low),
            "moderate" | "medium" => Ok(Self::Moderate),
            "high" | "aggressive" => Ok(Self::High),
            other => Err(format!(
                "unknown risk_tolerance {other:?} (expected low, moderate or high)"
            )),
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_amount: f64,
    /// Years until the goal is due.
    pub timeline: u32,
}

/// A holding the investor already owns. Only `type` and `amount` are interpreted;
/// everything else the caller sends is kept verbatim for the prompts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExistingInvestment {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl ExistingInvestment {
    pub fn is_equity_like(&self) -> bool {
        let Some(kind) = self.kind.as_deref() else {
            return false;
        };
        let kind = kind.to_ascii_lowercase();
        ["equity", "stock", "share", "crypto", "mutual fund", "small cap", "mid cap"]
            .iter()
            .any(|marker| kind.contains(marker))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub age: u32,
    pub income: f64,
    pub dependents: u32,
    /// Years.
    pub investment_horizon: u32,
    #[serde(default)]
    pub existing_investments: Vec<ExistingInvestment>,
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub goals: Vec<Goal>,
}

impl UserProfile {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.income.is_finite() && self.income >= 0.0,
            "income must be a non-negative number (got {})",
            self.income
        );
        ensure!(self.age <= 130, "age out of range: {}", self.age);
        ensure!(
            self.investment_horizon <= 100,
            "investment_horizon out of range: {}",
            self.investment_horizon
        );

        for (idx, goal) in self.goals.iter().enumerate() {
            ensure!(
                !goal.kind.trim().is_empty(),
                "goals[{idx}].type must be non-empty"
            );
            ensure!(
                goal.target_amount.is_finite() && goal.target_amount >= 0.0,
                "goals[{idx}].target_amount must be a non-negative number (got {})",
                goal.target_amount
            );
        }

        for (idx, inv) in self.existing_investments.iter().enumerate() {
            if let Some(amount) = inv.amount {
                ensure!(
                    amount.is_finite() && amount >= 0.0,
                    "existing_investments[{idx}].amount must be a non-negative number (got {amount})"
                );
            }
        }

        Ok(())
    }
}
