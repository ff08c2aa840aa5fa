use serde::Serialize;
use tracing::debug;

use super::account::Accounts;
use super::amounts::WithdrawalAmounts;
use super::error::Result;
use super::minimum::MinimumWithdrawalTable;
use super::types::{AccountKind, TfsaContribution};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub account: AccountKind,
    pub amount: f64,
    /// After-tax cash from a forced minimum withdrawal, owed back to the taxable account.
    pub forced_net_excess: f64,
}

impl PlanEntry {
    fn new(account: AccountKind, amount: f64) -> Self {
        Self {
            account,
            amount,
            forced_net_excess: 0.0,
        }
    }
}

/// Ordered withdrawals for one year. Empty means the accounts are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalPlan {
    entries: Vec<PlanEntry>,
    /// Whether the withdrawals also fund the TFSA top-up.
    contribution: TfsaContribution,
}

impl WithdrawalPlan {
    fn new(entries: Vec<PlanEntry>, contribution: TfsaContribution) -> Self {
        Self {
            entries,
            contribution,
        }
    }

    fn depleted() -> Self {
        Self::new(Vec::new(), TfsaContribution::Excluded)
    }

    pub fn contribution(&self) -> TfsaContribution {
        self.contribution
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn note(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.account.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct WithdrawalPlanner<'a> {
    amounts: WithdrawalAmounts<'a>,
    minimums: &'a MinimumWithdrawalTable,
}

impl<'a> WithdrawalPlanner<'a> {
    pub fn new(amounts: WithdrawalAmounts<'a>, minimums: &'a MinimumWithdrawalTable) -> Self {
        Self { amounts, minimums }
    }

    pub fn amounts(&self) -> &WithdrawalAmounts<'a> {
        &self.amounts
    }

    /// Plans the year's withdrawals without touching any balance.
    pub fn plan(&self, age: u32, market_return: f64, accounts: &Accounts) -> Result<WithdrawalPlan> {
        let inputs = self.amounts.inputs();
        let rrsp_balance = accounts.balance(AccountKind::Rrsp);
        let minimum_due = self.minimums.is_due(age)
            && self.minimums.withdrawal_amount(age, rrsp_balance) > 0.0;

        if market_return < inputs.annual_growth_rate.downturn_threshold
            && !minimum_due
            && accounts.balance(AccountKind::CashCushion) >= inputs.desired_spending
        {
            debug!(age, market_return, "downturn year, drawing from cash cushion");
            return Ok(WithdrawalPlan::new(
                vec![PlanEntry::new(
                    AccountKind::CashCushion,
                    self.amounts.cash_cushion(age),
                )],
                TfsaContribution::Excluded,
            ));
        }

        let mut contribution = TfsaContribution::Included;
        let (mut entries, mut shortfall) = self.attempt(age, accounts, contribution)?;
        let touched_tfsa = entries.iter().any(|entry| entry.account == AccountKind::Tfsa);
        if shortfall > 0.0 || touched_tfsa {
            debug!(age, shortfall, "replanning without the tfsa contribution");
            contribution = TfsaContribution::Excluded;
            (entries, shortfall) = self.attempt(age, accounts, contribution)?;
        }

        if shortfall > 0.0 {
            return Ok(WithdrawalPlan::depleted());
        }
        Ok(WithdrawalPlan::new(entries, contribution))
    }

    fn attempt(
        &self,
        age: u32,
        accounts: &Accounts,
        contribution: TfsaContribution,
    ) -> Result<(Vec<PlanEntry>, f64)> {
        let province = self.amounts.inputs().province_code.as_str();
        let tax = self.amounts.tax();
        let rrsp_balance = accounts.balance(AccountKind::Rrsp);
        let mut entries = Vec::new();

        let target = self.amounts.rrsp(age, contribution)?;
        let mandatory = self.minimums.withdrawal_amount(age, rrsp_balance);
        let mut rrsp_entry = PlanEntry::new(AccountKind::Rrsp, target);
        if mandatory > target {
            let pension_gross = if self.amounts.pension_active(age) {
                self.amounts.pension_gross()
            } else {
                0.0
            };
            let forced = tax.take_home(pension_gross + mandatory, province)?;
            let wanted = tax.take_home(pension_gross + target, province)?;
            rrsp_entry.amount = mandatory;
            rrsp_entry.forced_net_excess = (forced - wanted).max(0.0);
        }

        if rrsp_balance >= rrsp_entry.amount {
            entries.push(rrsp_entry);
            return Ok((entries, 0.0));
        }

        let mut shortfall = self.amounts.taxable(age, contribution);
        if rrsp_balance > 0.0 {
            entries.push(PlanEntry::new(AccountKind::Rrsp, rrsp_balance));
            shortfall -= tax.take_home(rrsp_balance, province)?;
        }

        for kind in [AccountKind::Taxable, AccountKind::Tfsa] {
            let balance = accounts.balance(kind);
            if shortfall <= 0.0 || balance <= 0.0 {
                continue;
            }
            let amount = balance.min(shortfall);
            entries.push(PlanEntry::new(kind, amount));
            shortfall -= amount;
        }

        Ok((entries, shortfall))
    }
}
