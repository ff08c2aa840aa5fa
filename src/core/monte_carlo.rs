use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::Rules;
use super::error::Result;
use super::simulate_once;
use super::types::Inputs;

const PERCENTILE_POINTS: [u32; 7] = [5, 10, 25, 50, 75, 90, 95];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialOutcome {
    pub success: bool,
    pub withdrawal_rate: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRateSummary {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    pub average_final_balance: f64,
    pub withdrawal_rate: f64,
    pub percentiles: Percentiles,
}

#[derive(Debug, Clone)]
pub struct SuccessRateResults {
    outcomes: Vec<TrialOutcome>,
}

impl SuccessRateResults {
    pub fn new(outcomes: Vec<TrialOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[TrialOutcome] {
        &self.outcomes
    }

    pub fn total_runs(&self) -> usize {
        self.outcomes.len()
    }

    pub fn successful_runs(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.success).count()
    }

    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.successful_runs() as f64 / self.total_runs() as f64
    }

    pub fn average_final_balance(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().map(|o| o.final_balance).sum::<f64>() / self.total_runs() as f64
    }

    /// Every trial shares the same starting balances, so the first rate stands for all.
    pub fn withdrawal_rate(&self) -> f64 {
        self.outcomes
            .first()
            .map(|outcome| outcome.withdrawal_rate)
            .unwrap_or(0.0)
    }

    pub fn percentiles(&self) -> Percentiles {
        let mut sorted: Vec<f64> = self.outcomes.iter().map(|o| o.final_balance).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let [p5, p10, p25, p50, p75, p90, p95] = PERCENTILE_POINTS.map(|p| percentile(&sorted, p));
        Percentiles {
            p5,
            p10,
            p25,
            p50,
            p75,
            p90,
            p95,
        }
    }

    pub fn summary(&self) -> SuccessRateSummary {
        SuccessRateSummary {
            total_runs: self.total_runs(),
            successful_runs: self.successful_runs(),
            success_rate: self.success_rate(),
            average_final_balance: self.average_final_balance(),
            withdrawal_rate: self.withdrawal_rate(),
            percentiles: self.percentiles(),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: u32) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p as usize * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Runs `trials` independent simulations on the rayon pool.
pub fn run_success_rate(inputs: &Inputs, rules: &Rules, trials: u32) -> Result<SuccessRateResults> {
    let base_seed = inputs.seed.unwrap_or_else(rand::random);
    info!(trials, base_seed, "starting success rate simulation");

    let outcomes = (0..trials)
        .into_par_iter()
        .map(|trial| {
            let mut rng = StdRng::seed_from_u64(derive_seed(base_seed, trial));
            let (run, verdict) = simulate_once(inputs, rules, &mut rng)?;
            Ok(TrialOutcome {
                success: verdict.success,
                withdrawal_rate: verdict.withdrawal_rate,
                final_balance: run.final_balance(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let results = SuccessRateResults::new(outcomes);
    info!(
        trials,
        success_rate = results.success_rate(),
        average_final_balance = results.average_final_balance(),
        "finished success rate simulation"
    );
    Ok(results)
}

pub(crate) fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ ((trial as u64) << 32) ^ trial as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
