use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Rrsp,
    Taxable,
    Tfsa,
    CashCushion,
}

impl AccountKind {
    pub const ALL: [AccountKind; 4] = [
        AccountKind::Rrsp,
        AccountKind::Taxable,
        AccountKind::Tfsa,
        AccountKind::CashCushion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AccountKind::Rrsp => "rrsp",
            AccountKind::Taxable => "taxable",
            AccountKind::Tfsa => "tfsa",
            AccountKind::CashCushion => "cash_cushion",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AccountKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "rrsp" => Ok(AccountKind::Rrsp),
            "taxable" => Ok(AccountKind::Taxable),
            "tfsa" => Ok(AccountKind::Tfsa),
            "cash_cushion" => Ok(AccountKind::CashCushion),
            other => Err(EngineError::UnknownAccount(other.to_string())),
        }
    }
}

/// Whether the optional TFSA top-up is folded into this year's income target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TfsaContribution {
    Included,
    Excluded,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Detailed,
    SuccessRate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartingBalances {
    #[serde(default)]
    pub rrsp: f64,
    #[serde(default)]
    pub taxable: f64,
    #[serde(default)]
    pub tfsa: f64,
    #[serde(default)]
    pub cash_cushion: f64,
}

impl StartingBalances {
    pub fn get(&self, kind: AccountKind) -> f64 {
        match kind {
            AccountKind::Rrsp => self.rrsp,
            AccountKind::Taxable => self.taxable,
            AccountKind::Tfsa => self.tfsa,
            AccountKind::CashCushion => self.cash_cushion,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthRates {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Fixed rate for the cash cushion; it tracks the market when absent.
    #[serde(default)]
    pub savings: Option<f64>,
    #[serde(default = "default_downturn_threshold")]
    pub downturn_threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PensionIncome {
    #[serde(default)]
    pub start_age: u32,
    #[serde(default)]
    pub monthly_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithholdingTaxes {
    #[serde(default)]
    pub rrsp_withholding_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inputs {
    #[serde(default)]
    pub mode: Option<Mode>,
    pub retirement_age: u32,
    pub max_age: u32,
    pub province_code: String,
    pub desired_spending: f64,
    #[serde(default)]
    pub annual_tfsa_contribution: f64,
    pub accounts: StartingBalances,
    pub annual_growth_rate: GrowthRates,
    #[serde(default = "default_return_sequence_type")]
    pub return_sequence_type: String,
    #[serde(default)]
    pub cpp: PensionIncome,
    #[serde(default)]
    pub taxes: WithholdingTaxes,
    #[serde(default = "default_success_factor")]
    pub success_factor: f64,
    #[serde(default = "default_total_runs")]
    pub total_runs: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_downturn_threshold() -> f64 {
    -0.1
}

fn default_return_sequence_type() -> String {
    "constant".to_string()
}

fn default_success_factor() -> f64 {
    1.0
}

fn default_total_runs() -> u32 {
    5_000
}

impl Inputs {
    /// Reads and validates a YAML inputs file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let inputs: Inputs = serde_yaml::from_str(yaml)?;
        inputs.validate()?;
        Ok(inputs)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidInputs(msg.to_string()));

        if self.max_age < self.retirement_age {
            return invalid("max_age must be >= retirement_age");
        }
        if !self.desired_spending.is_finite() || self.desired_spending < 0.0 {
            return invalid("desired_spending must be >= 0");
        }
        if !self.annual_tfsa_contribution.is_finite() || self.annual_tfsa_contribution < 0.0 {
            return invalid("annual_tfsa_contribution must be >= 0");
        }
        for kind in AccountKind::ALL {
            let balance = self.accounts.get(kind);
            if !balance.is_finite() || balance < 0.0 {
                return Err(EngineError::InvalidInputs(format!(
                    "accounts.{kind} must be >= 0"
                )));
            }
        }

        let growth = &self.annual_growth_rate;
        for (name, rate) in [
            ("annual_growth_rate.average", growth.average),
            ("annual_growth_rate.min", growth.min),
            ("annual_growth_rate.max", growth.max),
            ("annual_growth_rate.savings", growth.savings.unwrap_or(0.0)),
            ("annual_growth_rate.downturn_threshold", growth.downturn_threshold),
        ] {
            if !rate.is_finite() || rate <= -1.0 {
                return Err(EngineError::InvalidInputs(format!("{name} must be > -1")));
            }
        }
        if growth.min > growth.average || growth.average > growth.max {
            return invalid("annual_growth_rate must satisfy min <= average <= max");
        }

        if !self.cpp.monthly_amount.is_finite() || self.cpp.monthly_amount < 0.0 {
            return invalid("cpp.monthly_amount must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.taxes.rrsp_withholding_rate) {
            return invalid("taxes.rrsp_withholding_rate must be between 0 and 1");
        }
        if !self.success_factor.is_finite() || self.success_factor <= 0.0 {
            return invalid("success_factor must be > 0");
        }
        if self.total_runs == 0 {
            return invalid("total_runs must be > 0");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalances {
    pub rrsp: f64,
    pub taxable: f64,
    pub tfsa: f64,
    pub cash_cushion: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub age: u32,
    pub balances: AccountBalances,
    pub note: String,
    pub cpp: bool,
    pub rate_of_return: f64,
    pub total_balance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub success: bool,
    pub explanation: String,
    pub withdrawal_rate: f64,
}
