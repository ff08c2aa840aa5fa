use tracing::warn;

use super::bisect::{Stop, bisect};
use super::error::Result;
use super::tax::TaxEngine;
use super::types::{AccountKind, Inputs, TfsaContribution};

const PENSION_TOLERANCE: f64 = 1.0;
const PENSION_MAX_ITERATIONS: u32 = 100;

/// Per-account withdrawal needs for a year, net of any pension income.
pub struct WithdrawalAmounts<'a> {
    inputs: &'a Inputs,
    tax: &'a TaxEngine,
    pension_net: f64,
}

impl<'a> WithdrawalAmounts<'a> {
    pub fn new(inputs: &'a Inputs, tax: &'a TaxEngine) -> Result<Self> {
        let pension_net = tax.take_home(pension_gross_of(inputs), &inputs.province_code)?;
        Ok(Self {
            inputs,
            tax,
            pension_net,
        })
    }

    pub fn inputs(&self) -> &Inputs {
        self.inputs
    }

    pub fn tax(&self) -> &TaxEngine {
        self.tax
    }

    pub fn pension_active(&self, age: u32) -> bool {
        self.inputs.cpp.monthly_amount > 0.0 && age >= self.inputs.cpp.start_age
    }

    pub fn pension_gross(&self) -> f64 {
        pension_gross_of(self.inputs)
    }

    pub fn pension_net(&self) -> f64 {
        self.pension_net
    }

    pub fn desired_income(&self, contribution: TfsaContribution) -> f64 {
        match contribution {
            TfsaContribution::Included => {
                self.inputs.desired_spending + self.inputs.annual_tfsa_contribution
            }
            TfsaContribution::Excluded => self.inputs.desired_spending,
        }
    }

    /// Gross RRSP withdrawal that, together with any pension, nets the desired income.
    pub fn rrsp(&self, age: u32, contribution: TfsaContribution) -> Result<f64> {
        let province = self.inputs.province_code.as_str();
        let desired = self.desired_income(contribution);
        let without_pension = self.tax.gross_for_net(desired, province)?.gross_income;
        if !self.pension_active(age) {
            return Ok(without_pension);
        }

        let pension_gross = self.pension_gross();
        let take_home = self.tax.take_home_curve(province)?;
        if take_home(pension_gross) >= desired {
            return Ok(0.0);
        }

        // Pension and withdrawal are taxed together, so the answer sits between
        // the pension-free gross and that gross less the whole pension.
        let search = bisect(
            (without_pension - pension_gross).max(0.0),
            without_pension,
            Stop::Residual(PENSION_TOLERANCE),
            PENSION_MAX_ITERATIONS,
            |withdrawal| take_home(pension_gross + withdrawal) - desired,
        );
        if !search.converged {
            warn!(
                age,
                desired,
                pension_gross,
                withdrawal = search.midpoint,
                "pension-adjusted rrsp search did not converge, using last midpoint"
            );
        }

        Ok(search.midpoint)
    }

    pub fn taxable(&self, age: u32, contribution: TfsaContribution) -> f64 {
        self.less_pension(age, self.desired_income(contribution))
    }

    pub fn tfsa(&self, age: u32) -> f64 {
        self.less_pension(age, self.inputs.desired_spending)
    }

    /// Downturn years skip the TFSA top-up, so only spending is funded.
    pub fn cash_cushion(&self, age: u32) -> f64 {
        self.less_pension(age, self.inputs.desired_spending)
    }

    pub fn for_account(
        &self,
        kind: AccountKind,
        age: u32,
        contribution: TfsaContribution,
    ) -> Result<f64> {
        Ok(match kind {
            AccountKind::Rrsp => self.rrsp(age, contribution)?,
            AccountKind::Taxable => self.taxable(age, contribution),
            AccountKind::Tfsa => self.tfsa(age),
            AccountKind::CashCushion => self.cash_cushion(age),
        })
    }

    /// Never negative: a pension worth more than the target needs no withdrawal.
    fn less_pension(&self, age: u32, amount: f64) -> f64 {
        if self.pension_active(age) {
            (amount - self.pension_net).max(0.0)
        } else {
            amount
        }
    }
}

fn pension_gross_of(inputs: &Inputs) -> f64 {
    inputs.cpp.monthly_amount * 12.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::tax::TaxTables;
    use crate::core::types::{GrowthRates, PensionIncome, StartingBalances, WithholdingTaxes};
    use std::sync::Arc;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    pub(crate) fn reference_inputs() -> Inputs {
        Inputs {
            mode: None,
            retirement_age: 65,
            max_age: 75,
            province_code: "ONT".to_string(),
            desired_spending: 30_000.0,
            annual_tfsa_contribution: 10.0,
            accounts: StartingBalances {
                rrsp: 80_000.0,
                taxable: 60_000.0,
                tfsa: 30_000.0,
                cash_cushion: 0.0,
            },
            annual_growth_rate: GrowthRates {
                average: 0.01,
                min: 0.01,
                max: 0.01,
                savings: None,
                downturn_threshold: -0.1,
            },
            return_sequence_type: "constant".to_string(),
            cpp: PensionIncome {
                start_age: 65,
                monthly_amount: 0.0,
            },
            taxes: WithholdingTaxes {
                rrsp_withholding_rate: 0.3,
            },
            success_factor: 1.0,
            total_runs: 10,
            seed: Some(7),
        }
    }

    pub(crate) fn test_engine() -> TaxEngine {
        TaxEngine::uncached(Arc::new(TaxTables::embedded().expect("embedded tables")))
    }

    #[test]
    fn without_pension_rrsp_is_reverse_tax_of_desired_income() {
        let inputs = reference_inputs();
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");

        assert!(!amounts.pension_active(65));
        let included = amounts.rrsp(65, TfsaContribution::Included).expect("rrsp");
        let excluded = amounts.rrsp(65, TfsaContribution::Excluded).expect("rrsp");
        assert_approx_tol(included, 33_806.25, 0.011);
        assert_approx_tol(excluded, 33_793.75, 0.011);
        assert_approx_tol(amounts.taxable(65, TfsaContribution::Included), 30_010.0, 1e-9);
        assert_approx_tol(amounts.tfsa(65), 30_000.0, 1e-9);
        assert_approx_tol(amounts.cash_cushion(65), 30_000.0, 1e-9);
    }

    #[test]
    fn pension_reduces_every_target() {
        let mut inputs = reference_inputs();
        inputs.cpp = PensionIncome {
            start_age: 70,
            monthly_amount: 1_200.0,
        };
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");

        assert!(!amounts.pension_active(69));
        assert!(amounts.pension_active(70));
        assert_approx_tol(amounts.pension_gross(), 14_400.0, 1e-9);
        assert_approx_tol(amounts.pension_net(), 14_298.9495, 1e-6);

        let rrsp = amounts.rrsp(70, TfsaContribution::Included).expect("rrsp");
        assert_approx_tol(rrsp, 19_407.13, 1.0);
        let joint_take_home = engine.take_home(14_400.0 + rrsp, "ONT").expect("ONT");
        assert_approx_tol(joint_take_home, 30_010.0, 1.0);

        assert_approx_tol(
            amounts.taxable(70, TfsaContribution::Included),
            15_711.0505,
            1e-6,
        );
        assert_approx_tol(amounts.tfsa(70), 15_701.0505, 1e-6);
        assert_approx_tol(amounts.cash_cushion(69), 30_000.0, 1e-9);
    }

    #[test]
    fn pension_covering_spending_needs_no_rrsp() {
        let mut inputs = reference_inputs();
        inputs.desired_spending = 5_000.0;
        inputs.cpp.monthly_amount = 1_000.0;
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");
        assert_eq!(amounts.rrsp(66, TfsaContribution::Included).expect("rrsp"), 0.0);
        assert_eq!(amounts.taxable(66, TfsaContribution::Included), 0.0);
        assert_eq!(amounts.tfsa(66), 0.0);
        assert_eq!(amounts.cash_cushion(66), 0.0);
    }

    #[test]
    fn unknown_province_fails_up_front() {
        let mut inputs = reference_inputs();
        inputs.province_code = "QC".to_string();
        let engine = test_engine();
        assert!(WithdrawalAmounts::new(&inputs, &engine).is_err());
    }
}
