use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::Serialize;

use super::error::{EngineError, Result};

/// Student-t degrees of freedom for GBM shocks: fatter tails than a normal,
/// without making crashes implausibly common.
pub const STUDENT_T_DEGREES_OF_FREEDOM: u32 = 5;

const MAX_MEAN_ADJUST_ATTEMPTS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStrategy {
    Constant,
    MeanAdjusted,
    GeometricBrownianMotion,
}

impl ReturnStrategy {
    pub fn name(self) -> &'static str {
        match self {
            ReturnStrategy::Constant => "constant",
            ReturnStrategy::MeanAdjusted => "mean",
            ReturnStrategy::GeometricBrownianMotion => "geometric_brownian_motion",
        }
    }

    /// Resolves the configured strategy, collapsing to `Constant` when the
    /// bounds leave no room for variation.
    pub fn select(name: &str, average: f64, min: f64, max: f64) -> Result<Self> {
        let strategy: ReturnStrategy = name.parse()?;
        if average == min && average == max {
            return Ok(ReturnStrategy::Constant);
        }
        Ok(strategy)
    }

    pub fn returns_for<R: Rng + ?Sized>(
        self,
        start_age: u32,
        end_age: u32,
        average: f64,
        min: f64,
        max: f64,
        rng: &mut R,
    ) -> Result<ReturnSequence> {
        if self != ReturnStrategy::Constant && !(min <= average && average <= max) {
            return Err(EngineError::InfeasibleReturnSequence {
                attempts: 0,
                average,
                min,
                max,
            });
        }

        let ages = start_age..=end_age;
        let rates: BTreeMap<u32, f64> = match self {
            ReturnStrategy::Constant => ages.map(|age| (age, average)).collect(),
            ReturnStrategy::MeanAdjusted => {
                let values = mean_adjusted_values(ages.clone().count(), average, min, max, rng)?;
                ages.zip(values).collect()
            }
            ReturnStrategy::GeometricBrownianMotion => {
                let drift = (1.0 + average).ln();
                let sigma = (max - average).max(average - min) / 3.0;
                ages.map(|age| {
                    let z = student_t(rng, STUDENT_T_DEGREES_OF_FREEDOM);
                    let rate = (drift - 0.5 * sigma * sigma + sigma * z).exp() - 1.0;
                    (age, round_to_basis_point(rate))
                })
                .collect()
            }
        };

        Ok(ReturnSequence { average, rates })
    }
}

impl fmt::Display for ReturnStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReturnStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constant" => Ok(ReturnStrategy::Constant),
            "mean" => Ok(ReturnStrategy::MeanAdjusted),
            "geometric_brownian_motion" => Ok(ReturnStrategy::GeometricBrownianMotion),
            other => Err(EngineError::UnknownReturnSequence(other.to_string())),
        }
    }
}

/// One market return per simulated age.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnSequence {
    average: f64,
    rates: BTreeMap<u32, f64>,
}

impl ReturnSequence {
    pub fn new(average: f64, rates: BTreeMap<u32, f64>) -> Self {
        Self { average, rates }
    }

    /// Ages outside the generated range fall back to the average.
    pub fn rate_for(&self, age: u32) -> f64 {
        self.rates.get(&age).copied().unwrap_or(self.average)
    }

    pub fn rates(&self) -> &BTreeMap<u32, f64> {
        &self.rates
    }
}

fn mean_adjusted_values<R: Rng + ?Sized>(
    count: usize,
    average: f64,
    min: f64,
    max: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    for _ in 0..MAX_MEAN_ADJUST_ATTEMPTS {
        let mut values: Vec<f64> = (1..count).map(|_| rng.gen_range(min..=max)).collect();
        let last = average * count as f64 - values.iter().sum::<f64>();
        if (min..=max).contains(&last) {
            values.push(last);
            return Ok(values);
        }
    }

    Err(EngineError::InfeasibleReturnSequence {
        attempts: MAX_MEAN_ADJUST_ATTEMPTS,
        average,
        min,
        max,
    })
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = rng.gen_range(0.0..1.0_f64).max(1e-12);
    let u2 = rng.gen_range(0.0..1.0_f64);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn student_t<R: Rng + ?Sized>(rng: &mut R, degrees_of_freedom: u32) -> f64 {
    let z = standard_normal(rng);
    let chi_squared: f64 = (0..degrees_of_freedom)
        .map(|_| {
            let n = standard_normal(rng);
            n * n
        })
        .sum();
    z / (chi_squared / degrees_of_freedom as f64).sqrt()
}

fn round_to_basis_point(rate: f64) -> f64 {
    (rate * 10_000.0).round() / 10_000.0
}
