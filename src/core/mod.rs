mod account;
mod amounts;
mod bisect;
mod cashflow;
mod error;
mod evaluator;
mod minimum;
mod monte_carlo;
mod planner;
mod returns;
mod simulator;
mod tax;
mod types;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

pub use account::{Account, Accounts};
pub use amounts::WithdrawalAmounts;
pub use bisect::{Bisection, Stop, bisect};
pub use cashflow::{FirstYearCashFlow, first_year_cash_flow, withdrawal_rate};
pub use error::{EngineError, Result};
pub use evaluator::{evaluate, format_currency};
pub use minimum::MinimumWithdrawalTable;
pub use monte_carlo::{
    Percentiles, SuccessRateResults, SuccessRateSummary, TrialOutcome, run_success_rate,
};
pub use planner::{PlanEntry, WithdrawalPlan, WithdrawalPlanner};
pub use returns::{ReturnSequence, ReturnStrategy};
pub use simulator::{SimulationRun, SimulationState, Simulator};
pub use tax::{
    MemoryCache, NullCache, ReverseTax, ReverseTaxCache, TaxBracket, TaxBreakdown, TaxEngine,
    TaxTable, TaxTables,
};
pub use types::{
    AccountBalances, AccountKind, GrowthRates, Inputs, Mode, PensionIncome, StartingBalances,
    TfsaContribution, Verdict, WithholdingTaxes, YearlyResult,
};

/// Reference data shared read-only by every run.
#[derive(Clone)]
pub struct Rules {
    pub tax: TaxEngine,
    pub minimums: Arc<MinimumWithdrawalTable>,
}

impl Rules {
    pub fn new(tax: TaxEngine, minimums: MinimumWithdrawalTable) -> Self {
        Self {
            tax,
            minimums: Arc::new(minimums),
        }
    }

    /// Bundled tables with a process-wide reverse-tax cache.
    pub fn embedded() -> Result<Self> {
        let tax = TaxEngine::new(Arc::new(TaxTables::embedded()?), Arc::new(MemoryCache::new()));
        Ok(Self::new(tax, MinimumWithdrawalTable::embedded()?))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedRun {
    pub strategy: String,
    pub seed: u64,
    pub state: SimulationState,
    pub verdict: Verdict,
    pub first_year_cash_flow: FirstYearCashFlow,
    pub yearly_results: Vec<YearlyResult>,
    pub return_sequence: ReturnSequence,
}

/// A single fully reported run.
pub fn run_detailed(inputs: &Inputs, rules: &Rules) -> Result<DetailedRun> {
    let seed = inputs.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let (run, verdict) = simulate_once(inputs, rules, &mut rng)?;

    Ok(DetailedRun {
        strategy: selected_strategy(inputs)?.name().to_string(),
        seed,
        state: run.state,
        verdict,
        first_year_cash_flow: first_year_cash_flow(inputs, &rules.tax)?,
        yearly_results: run.yearly_results,
        return_sequence: run.return_sequence,
    })
}

fn selected_strategy(inputs: &Inputs) -> Result<ReturnStrategy> {
    let growth = &inputs.annual_growth_rate;
    ReturnStrategy::select(
        &inputs.return_sequence_type,
        growth.average,
        growth.min,
        growth.max,
    )
}

pub(crate) fn simulate_once<R: Rng + ?Sized>(
    inputs: &Inputs,
    rules: &Rules,
    rng: &mut R,
) -> Result<(SimulationRun, Verdict)> {
    let growth = &inputs.annual_growth_rate;
    let returns = selected_strategy(inputs)?.returns_for(
        inputs.retirement_age,
        inputs.max_age,
        growth.average,
        growth.min,
        growth.max,
        rng,
    )?;

    let run = Simulator::new(inputs, &rules.tax, &rules.minimums, returns)?.run()?;
    let amounts = WithdrawalAmounts::new(inputs, &rules.tax)?;
    let verdict = evaluate(&run.yearly_results, inputs, &amounts)?;
    Ok((run, verdict))
}
