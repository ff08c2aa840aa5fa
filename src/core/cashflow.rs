use serde::Serialize;

use super::error::Result;
use super::tax::TaxEngine;
use super::types::Inputs;

/// What the first retirement year looks like when the RRSP funds it and the
/// institution withholds tax up front.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstYearCashFlow {
    pub desired_income: f64,
    pub rrsp_withdrawal: f64,
    pub rrsp_withholding_tax: f64,
    pub actual_tax_bill: f64,
    pub expected_refund: f64,
    pub rrsp_available_after_withholding: f64,
    pub required_cash_buffer: f64,
}

pub fn first_year_cash_flow(inputs: &Inputs, tax: &TaxEngine) -> Result<FirstYearCashFlow> {
    let desired_income = inputs.desired_spending + inputs.annual_tfsa_contribution;
    let reverse = tax.gross_for_net(desired_income, &inputs.province_code)?;
    let rrsp_withdrawal = reverse.gross_income;
    let rrsp_withholding_tax = rrsp_withdrawal * inputs.taxes.rrsp_withholding_rate;
    let actual_tax_bill = reverse.breakdown.total_tax;
    let rrsp_available_after_withholding = rrsp_withdrawal - rrsp_withholding_tax;

    Ok(FirstYearCashFlow {
        desired_income,
        rrsp_withdrawal,
        rrsp_withholding_tax,
        actual_tax_bill,
        expected_refund: rrsp_withholding_tax - actual_tax_bill,
        rrsp_available_after_withholding,
        required_cash_buffer: desired_income - rrsp_available_after_withholding,
    })
}

/// Spending as a fraction of the invested starting balances (the cash cushion is not counted).
pub fn withdrawal_rate(inputs: &Inputs) -> f64 {
    let invested = inputs.accounts.rrsp + inputs.accounts.taxable + inputs.accounts.tfsa;
    if invested == 0.0 {
        return 0.0;
    }
    inputs.desired_spending / invested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amounts::tests::{reference_inputs, test_engine};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn first_year_breakdown_reconciles_withholding_and_refund() {
        let inputs = reference_inputs();
        let flow = first_year_cash_flow(&inputs, &test_engine()).expect("cash flow");

        assert_approx_tol(flow.desired_income, 30_010.0, 1e-9);
        assert_approx_tol(flow.rrsp_withdrawal, 33_806.25, 0.011);
        assert_approx_tol(flow.rrsp_withholding_tax, 10_141.875, 0.01);
        assert_approx_tol(flow.actual_tax_bill, 3_796.25, 0.02);
        assert_approx_tol(flow.expected_refund, 6_345.62, 0.03);
        assert_approx_tol(flow.rrsp_available_after_withholding, 23_664.375, 0.01);
        assert_approx_tol(flow.required_cash_buffer, 6_345.625, 0.01);
        assert_approx_tol(
            flow.expected_refund + flow.actual_tax_bill,
            flow.rrsp_withholding_tax,
            1e-9,
        );
    }

    #[test]
    fn withdrawal_rate_ignores_cash_cushion() {
        let mut inputs = reference_inputs();
        inputs.accounts.cash_cushion = 1_000_000.0;
        assert_approx_tol(withdrawal_rate(&inputs), 30_000.0 / 170_000.0, 1e-12);
    }

    #[test]
    fn withdrawal_rate_is_zero_without_invested_assets() {
        let mut inputs = reference_inputs();
        inputs.accounts.rrsp = 0.0;
        inputs.accounts.taxable = 0.0;
        inputs.accounts.tfsa = 0.0;
        assert_eq!(withdrawal_rate(&inputs), 0.0);
    }
}
