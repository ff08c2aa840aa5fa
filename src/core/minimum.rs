use std::collections::BTreeMap;

use serde::Deserialize;

use super::error::{EngineError, Result};

const EMBEDDED_MINIMUM_WITHDRAWALS: &str = include_str!("../../config/minimum_withdrawal.yml");

/// Age-indexed minimum withdrawal fractions for the tax-deferred account.
#[derive(Debug, Clone, Deserialize)]
pub struct MinimumWithdrawalTable {
    withdrawal_rates: BTreeMap<u32, f64>,
}

impl MinimumWithdrawalTable {
    pub fn new(withdrawal_rates: BTreeMap<u32, f64>) -> Result<Self> {
        if withdrawal_rates.is_empty() {
            return Err(EngineError::InvalidInputs(
                "minimum withdrawal table has no withdrawal_rates".to_string(),
            ));
        }
        Ok(Self { withdrawal_rates })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: MinimumWithdrawalTable = serde_yaml::from_str(yaml)?;
        Self::new(parsed.withdrawal_rates)
    }

    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_MINIMUM_WITHDRAWALS)
    }

    pub fn start_age(&self) -> Option<u32> {
        self.withdrawal_rates.keys().next().copied()
    }

    pub fn is_due(&self, age: u32) -> bool {
        self.start_age().is_some_and(|start| age >= start)
    }

    /// Rate for `age`: the entry for the nearest listed age at or below it, so ages
    /// past the table reuse its last entry and a gap reuses the age before it.
    pub fn rate_for(&self, age: u32) -> f64 {
        self.withdrawal_rates
            .range(..=age)
            .next_back()
            .map(|(_, rate)| *rate)
            .unwrap_or(0.0)
    }

    pub fn withdrawal_amount(&self, age: u32, balance: f64) -> f64 {
        if !self.is_due(age) {
            return 0.0;
        }
        balance * self.rate_for(age)
    }
}
