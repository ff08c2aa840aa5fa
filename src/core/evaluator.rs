use super::amounts::WithdrawalAmounts;
use super::cashflow::withdrawal_rate;
use super::error::{EngineError, Result};
use super::types::{AccountKind, Inputs, TfsaContribution, Verdict, YearlyResult};

/// Judges a finished run. Running short is reported as a failed verdict, not an error.
pub fn evaluate(
    yearly_results: &[YearlyResult],
    inputs: &Inputs,
    amounts: &WithdrawalAmounts<'_>,
) -> Result<Verdict> {
    let withdrawal_rate = withdrawal_rate(inputs);
    let failed = |explanation: String| Verdict {
        success: false,
        explanation,
        withdrawal_rate,
    };

    let Some(last) = yearly_results.last() else {
        return Ok(failed(format!(
            "Simulation failed. Funds ran out in the first year at age {}.",
            inputs.retirement_age
        )));
    };

    if last.age < inputs.max_age {
        return Ok(failed(format!(
            "Simulation failed. Max age {} not reached. Final age is {}.",
            inputs.max_age, last.age
        )));
    }

    let phase = drawdown_phase(&last.note)?;
    let threshold =
        inputs.success_factor * amounts.for_account(phase, last.age, TfsaContribution::Included)?;

    if last.total_balance >= threshold {
        Ok(Verdict {
            success: true,
            explanation: format!(
                "Simulation successful with total balance of {}.",
                format_currency(last.total_balance)
            ),
            withdrawal_rate,
        })
    } else {
        Ok(failed(format!(
            "Simulation failed. Max age reached, but total balance of {} is below success threshold of {}.",
            format_currency(last.total_balance),
            format_currency(threshold)
        )))
    }
}

/// The account the run was drawing on at the end, earliest in withdrawal order first.
fn drawdown_phase(note: &str) -> Result<AccountKind> {
    note.split(", ")
        .map(str::parse::<AccountKind>)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .min()
        .ok_or_else(|| EngineError::UnknownAccount(note.to_string()))
}

pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, digit) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amounts::tests::{reference_inputs, test_engine};
    use crate::core::types::AccountBalances;

    fn year(age: u32, note: &str, total_balance: f64) -> YearlyResult {
        YearlyResult {
            age,
            balances: AccountBalances {
                rrsp: 0.0,
                taxable: total_balance,
                tfsa: 0.0,
                cash_cushion: 0.0,
            },
            note: note.to_string(),
            cpp: false,
            rate_of_return: 0.01,
            total_balance,
        }
    }

    #[test]
    fn currency_is_grouped_with_cents() {
        assert_eq!(format_currency(30_000.0), "$30,000.00");
        assert_eq!(format_currency(1_234_567.891), "$1,234,567.89");
        assert_eq!(format_currency(999.5), "$999.50");
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(-1_500.25), "-$1,500.25");
    }

    #[test]
    fn balance_above_threshold_succeeds() {
        let inputs = reference_inputs();
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");
        let results = vec![year(74, "tfsa", 60_000.0), year(75, "tfsa", 30_000.0)];

        let verdict = evaluate(&results, &inputs, &amounts).expect("verdict");
        assert!(verdict.success);
        assert_eq!(
            verdict.explanation,
            "Simulation successful with total balance of $30,000.00."
        );
        assert!((verdict.withdrawal_rate - 30_000.0 / 170_000.0).abs() < 1e-12);
    }

    #[test]
    fn early_depletion_names_max_and_final_age() {
        let inputs = reference_inputs();
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");
        let results = vec![year(69, "taxable, tfsa", 16_140.84)];

        let verdict = evaluate(&results, &inputs, &amounts).expect("verdict");
        assert!(!verdict.success);
        assert_eq!(
            verdict.explanation,
            "Simulation failed. Max age 75 not reached. Final age is 69."
        );
    }

    #[test]
    fn balance_below_threshold_fails_with_both_figures() {
        let inputs = reference_inputs();
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");
        let results = vec![year(75, "rrsp", 30_000.0)];

        let verdict = evaluate(&results, &inputs, &amounts).expect("verdict");
        assert!(!verdict.success);
        assert_eq!(
            verdict.explanation,
            "Simulation failed. Max age reached, but total balance of $30,000.00 is below success threshold of $33,806.25."
        );
    }

    #[test]
    fn success_factor_scales_the_threshold() {
        let mut inputs = reference_inputs();
        inputs.success_factor = 2.0;
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");
        let results = vec![year(75, "taxable", 50_000.0)];

        let verdict = evaluate(&results, &inputs, &amounts).expect("verdict");
        assert!(!verdict.success);
        assert!(verdict.explanation.ends_with("threshold of $60,020.00."));
    }

    #[test]
    fn empty_run_fails_in_first_year() {
        let inputs = reference_inputs();
        let engine = test_engine();
        let amounts = WithdrawalAmounts::new(&inputs, &engine).expect("amounts");

        let verdict = evaluate(&[], &inputs, &amounts).expect("verdict");
        assert!(!verdict.success);
        assert!(verdict.explanation.contains("first year at age 65"));
    }

    #[test]
    fn note_precedence_follows_withdrawal_order() {
        assert_eq!(drawdown_phase("rrsp, taxable").expect("phase"), AccountKind::Rrsp);
        assert_eq!(drawdown_phase("taxable, tfsa").expect("phase"), AccountKind::Taxable);
        assert_eq!(drawdown_phase("cash_cushion").expect("phase"), AccountKind::CashCushion);
        assert!(matches!(
            drawdown_phase("rrsp, pension"),
            Err(EngineError::UnknownAccount(name)) if name == "pension"
        ));
        assert!(drawdown_phase("").is_err());
    }
}
