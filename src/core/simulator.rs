use serde::Serialize;
use tracing::debug;

use super::account::Accounts;
use super::amounts::WithdrawalAmounts;
use super::error::Result;
use super::minimum::MinimumWithdrawalTable;
use super::planner::{WithdrawalPlan, WithdrawalPlanner};
use super::returns::ReturnSequence;
use super::tax::TaxEngine;
use super::types::{AccountKind, Inputs, TfsaContribution, YearlyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    Running,
    /// The planner could not fund a year.
    Depleted,
    /// Every age through `max_age` was funded.
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRun {
    pub yearly_results: Vec<YearlyResult>,
    pub state: SimulationState,
    pub return_sequence: ReturnSequence,
}

impl SimulationRun {
    pub fn last_age(&self) -> Option<u32> {
        self.yearly_results.last().map(|year| year.age)
    }

    pub fn final_balance(&self) -> f64 {
        self.yearly_results
            .last()
            .map(|year| year.total_balance)
            .unwrap_or(0.0)
    }
}

pub struct Simulator<'a> {
    inputs: &'a Inputs,
    planner: WithdrawalPlanner<'a>,
    returns: ReturnSequence,
}

impl<'a> Simulator<'a> {
    pub fn new(
        inputs: &'a Inputs,
        tax: &'a TaxEngine,
        minimums: &'a MinimumWithdrawalTable,
        returns: ReturnSequence,
    ) -> Result<Self> {
        let amounts = WithdrawalAmounts::new(inputs, tax)?;
        Ok(Self {
            inputs,
            planner: WithdrawalPlanner::new(amounts, minimums),
            returns,
        })
    }

    pub fn run(self) -> Result<SimulationRun> {
        let inputs = self.inputs;
        let mut accounts = Accounts::new(&inputs.accounts, inputs.annual_growth_rate.savings);
        let mut yearly_results = Vec::new();
        let mut state = SimulationState::Running;

        for age in inputs.retirement_age..=inputs.max_age {
            let market_return = self.returns.rate_for(age);
            let plan = self.planner.plan(age, market_return, &accounts)?;
            if plan.is_empty() {
                debug!(age, "accounts depleted");
                state = SimulationState::Depleted;
                break;
            }

            self.transact(&mut accounts, &plan);
            accounts.apply_growth(market_return);

            let note = plan.note();
            debug!(age, market_return, note = %note, total = accounts.total_balance(), "simulated year");
            yearly_results.push(YearlyResult {
                age,
                balances: accounts.snapshot(),
                note,
                cpp: self.planner.amounts().pension_active(age),
                rate_of_return: market_return,
                total_balance: accounts.total_balance(),
            });
        }

        if state == SimulationState::Running {
            state = SimulationState::Completed;
        }

        Ok(SimulationRun {
            yearly_results,
            state,
            return_sequence: self.returns,
        })
    }

    fn transact(&self, accounts: &mut Accounts, plan: &WithdrawalPlan) {
        for entry in plan.entries() {
            accounts.get_mut(entry.account).withdraw(entry.amount);
            if entry.forced_net_excess > 0.0 {
                accounts
                    .get_mut(AccountKind::Taxable)
                    .deposit(entry.forced_net_excess);
            }
        }

        let contribution = self.inputs.annual_tfsa_contribution;
        if contribution > 0.0 && plan.contribution() == TfsaContribution::Included {
            accounts.get_mut(AccountKind::Tfsa).deposit(contribution);
        }
    }
}
