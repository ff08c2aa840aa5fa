use super::types::{AccountBalances, AccountKind, StartingBalances};

#[derive(Debug, Clone)]
pub struct Account {
    balance: f64,
    fixed_growth_rate: Option<f64>,
}

impl Account {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            fixed_growth_rate: None,
        }
    }

    /// An account that ignores the market and grows at `rate` when one is given.
    pub fn with_fixed_rate(balance: f64, rate: Option<f64>) -> Self {
        Self {
            balance,
            fixed_growth_rate: rate,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Takes `amount` out and returns it, or returns 0 and leaves the balance alone
    /// when the account cannot cover it.
    pub fn withdraw(&mut self, amount: f64) -> f64 {
        if self.balance < amount {
            return 0.0;
        }
        self.balance -= amount;
        amount
    }

    pub fn deposit(&mut self, amount: f64) {
        self.balance += amount;
    }

    pub fn apply_growth(&mut self, market_return: f64) {
        let rate = self.fixed_growth_rate.unwrap_or(market_return);
        self.balance *= 1.0 + rate;
    }
}

/// The four accounts owned by a single simulation run.
#[derive(Debug, Clone)]
pub struct Accounts {
    rrsp: Account,
    taxable: Account,
    tfsa: Account,
    cash_cushion: Account,
}

impl Accounts {
    pub fn new(starting: &StartingBalances, savings_rate: Option<f64>) -> Self {
        Self {
            rrsp: Account::new(starting.rrsp),
            taxable: Account::new(starting.taxable),
            tfsa: Account::new(starting.tfsa),
            cash_cushion: Account::with_fixed_rate(starting.cash_cushion, savings_rate),
        }
    }

    pub fn get(&self, kind: AccountKind) -> &Account {
        match kind {
            AccountKind::Rrsp => &self.rrsp,
            AccountKind::Taxable => &self.taxable,
            AccountKind::Tfsa => &self.tfsa,
            AccountKind::CashCushion => &self.cash_cushion,
        }
    }

    pub fn get_mut(&mut self, kind: AccountKind) -> &mut Account {
        match kind {
            AccountKind::Rrsp => &mut self.rrsp,
            AccountKind::Taxable => &mut self.taxable,
            AccountKind::Tfsa => &mut self.tfsa,
            AccountKind::CashCushion => &mut self.cash_cushion,
        }
    }

    pub fn balance(&self, kind: AccountKind) -> f64 {
        self.get(kind).balance()
    }

    pub fn total_balance(&self) -> f64 {
        AccountKind::ALL.iter().map(|kind| self.balance(*kind)).sum()
    }

    pub fn apply_growth(&mut self, market_return: f64) {
        for kind in AccountKind::ALL {
            self.get_mut(kind).apply_growth(market_return);
        }
    }

    pub fn snapshot(&self) -> AccountBalances {
        AccountBalances {
            rrsp: self.rrsp.balance(),
            taxable: self.taxable.balance(),
            tfsa: self.tfsa.balance(),
            cash_cushion: self.cash_cushion.balance(),
        }
    }
}
