use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::bisect::{Stop, bisect};
use super::error::{EngineError, Result};

const EMBEDDED_TAX_TABLES: &str = include_str!("../../config/tax.yml");

const REVERSE_TOLERANCE: f64 = 0.01;
const REVERSE_MAX_ITERATIONS: u32 = 100;
const UPPER_BOUND_GROWTH: f64 = 1.5;
const MAX_UPPER_BOUND_EXPANSIONS: u32 = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct TaxBracket {
    /// Upper edge of the bracket. The final bracket is open-ended whatever this says.
    #[serde(default)]
    pub threshold: Option<f64>,
    pub rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxTable {
    pub exemption: f64,
    pub brackets: Vec<TaxBracket>,
}

impl TaxTable {
    pub fn tax_on(&self, gross_income: f64) -> f64 {
        let taxable = (gross_income - self.exemption).max(0.0);
        let mut tax = 0.0;
        let mut previous = 0.0;

        for (i, bracket) in self.brackets.iter().enumerate() {
            let upper = match bracket.threshold {
                Some(threshold) if i + 1 < self.brackets.len() => threshold,
                _ => f64::INFINITY,
            };
            tax += (taxable.min(upper) - previous) * bracket.rate;
            if taxable <= upper {
                break;
            }
            previous = upper;
        }

        tax
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxTables {
    pub federal: TaxTable,
    pub provinces: BTreeMap<String, TaxTable>,
}

impl TaxTables {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_TAX_TABLES)
    }

    pub fn province(&self, code: &str) -> Result<&TaxTable> {
        self.provinces
            .get(code)
            .ok_or_else(|| EngineError::UnknownRegion(code.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal_tax: f64,
    pub provincial_tax: f64,
    pub total_tax: f64,
    pub take_home: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseTax {
    pub gross_income: f64,
    pub breakdown: TaxBreakdown,
}

/// Memo for reverse-tax lookups, keyed on the exact target and province.
pub trait ReverseTaxCache: Send + Sync {
    fn get(&self, target_take_home: f64, province: &str) -> Option<ReverseTax>;
    fn insert(&self, target_take_home: f64, province: &str, result: ReverseTax);
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(u64, String), ReverseTax>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReverseTaxCache for MemoryCache {
    fn get(&self, target_take_home: f64, province: &str) -> Option<ReverseTax> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&(target_take_home.to_bits(), province.to_string()))
            .copied()
    }

    fn insert(&self, target_take_home: f64, province: &str, result: ReverseTax) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((target_take_home.to_bits(), province.to_string()), result);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl ReverseTaxCache for NullCache {
    fn get(&self, _target_take_home: f64, _province: &str) -> Option<ReverseTax> {
        None
    }

    fn insert(&self, _target_take_home: f64, _province: &str, _result: ReverseTax) {}
}

#[derive(Clone)]
pub struct TaxEngine {
    tables: Arc<TaxTables>,
    cache: Arc<dyn ReverseTaxCache>,
}

impl TaxEngine {
    pub fn new(tables: Arc<TaxTables>, cache: Arc<dyn ReverseTaxCache>) -> Self {
        Self { tables, cache }
    }

    pub fn uncached(tables: Arc<TaxTables>) -> Self {
        Self::new(tables, Arc::new(NullCache))
    }

    pub fn calculate(&self, gross_income: f64, province: &str) -> Result<TaxBreakdown> {
        let provincial = self.tables.province(province)?;
        let federal_tax = self.tables.federal.tax_on(gross_income);
        let provincial_tax = provincial.tax_on(gross_income);
        let total_tax = federal_tax + provincial_tax;

        Ok(TaxBreakdown {
            federal_tax,
            provincial_tax,
            total_tax,
            take_home: gross_income - total_tax,
        })
    }

    pub fn take_home(&self, gross_income: f64, province: &str) -> Result<f64> {
        Ok(self.calculate(gross_income, province)?.take_home)
    }

    /// Take-home as a plain function of gross income, with the province resolved once.
    pub fn take_home_curve(&self, province: &str) -> Result<impl Fn(f64) -> f64 + '_> {
        let federal = &self.tables.federal;
        let provincial = self.tables.province(province)?;
        Ok(move |gross: f64| gross - federal.tax_on(gross) - provincial.tax_on(gross))
    }

    /// Smallest gross income (to the cent) whose take-home reaches `target_take_home`.
    pub fn gross_for_net(&self, target_take_home: f64, province: &str) -> Result<ReverseTax> {
        if let Some(hit) = self.cache.get(target_take_home, province) {
            return Ok(hit);
        }

        let result = self.search_gross(target_take_home, province)?;
        self.cache.insert(target_take_home, province, result);
        Ok(result)
    }

    fn search_gross(&self, target_take_home: f64, province: &str) -> Result<ReverseTax> {
        let take_home = self.take_home_curve(province)?;
        if target_take_home <= 0.0 {
            return Ok(ReverseTax {
                gross_income: 0.0,
                breakdown: self.calculate(0.0, province)?,
            });
        }

        let lower = target_take_home;
        let mut upper = target_take_home * UPPER_BOUND_GROWTH;
        let mut expansions = 0;
        while take_home(upper) < target_take_home && expansions < MAX_UPPER_BOUND_EXPANSIONS {
            upper *= UPPER_BOUND_GROWTH;
            expansions += 1;
        }

        let search = bisect(
            lower,
            upper,
            Stop::Width(REVERSE_TOLERANCE),
            REVERSE_MAX_ITERATIONS,
            |gross| take_home(gross) - target_take_home,
        );
        if !search.converged {
            warn!(
                target_take_home,
                province,
                iterations = search.iterations,
                "reverse tax search hit its iteration ceiling"
            );
        }

        let gross_income = round_to_cents(search.upper);
        Ok(ReverseTax {
            gross_income,
            breakdown: self.calculate(gross_income, province)?,
        })
    }
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn engine() -> TaxEngine {
        TaxEngine::uncached(Arc::new(TaxTables::embedded().expect("embedded tables")))
    }

    #[test]
    fn income_below_exemptions_is_untaxed() {
        let breakdown = engine().calculate(10_000.0, "ONT").expect("ONT");
        assert_approx(breakdown.total_tax, 0.0);
        assert_approx(breakdown.take_home, 10_000.0);
    }

    #[test]
    fn forty_thousand_in_ontario_matches_hand_calculation() {
        let breakdown = engine().calculate(40_000.0, "ONT").expect("ONT");
        // (40000 - 15705) * 0.15 and (40000 - 12399) * 0.0505
        assert_approx(breakdown.federal_tax, 3_644.25);
        assert_approx(breakdown.provincial_tax, 1_393.8505);
        assert_approx(breakdown.total_tax, 5_038.1005);
        assert_approx(breakdown.take_home, 34_961.8995);
    }

    #[test]
    fn income_spanning_several_brackets_walks_each_rate() {
        let take_home = engine().take_home(160_000.0, "ONT").expect("ONT");
        assert_approx_tol(take_home, 119_406.4838, 1e-4);
    }

    #[test]
    fn final_bracket_is_open_ended() {
        let table = TaxTable {
            exemption: 0.0,
            brackets: vec![
                TaxBracket {
                    threshold: Some(100.0),
                    rate: 0.1,
                },
                TaxBracket {
                    threshold: Some(200.0),
                    rate: 0.5,
                },
            ],
        };
        assert_approx(table.tax_on(1_000.0), 10.0 + 900.0 * 0.5);
    }

    #[test]
    fn unknown_province_is_rejected() {
        let err = engine().calculate(50_000.0, "XYZ").expect_err("unknown");
        assert!(matches!(err, EngineError::UnknownRegion(code) if code == "XYZ"));
        assert!(engine().gross_for_net(50_000.0, "XYZ").is_err());
    }

    #[test]
    fn reverse_tax_finds_gross_for_reference_targets() {
        let engine = engine();
        let cases = [
            (30_010.0, "ONT", 33_806.25),
            (30_000.0, "ONT", 33_793.75),
            (40_000.0, "ONT", 46_301.57),
            (160_000.0, "ONT", 227_474.90),
            (40_000.0, "AB", 47_274.34),
        ];
        for (target, province, expected) in cases {
            let reverse = engine.gross_for_net(target, province).expect("known province");
            assert_approx_tol(reverse.gross_income, expected, 0.011);
            assert_approx_tol(reverse.breakdown.take_home, target, 0.02);
        }
    }

    #[test]
    fn reverse_tax_of_zero_is_zero() {
        let reverse = engine().gross_for_net(0.0, "BC").expect("BC");
        assert_approx(reverse.gross_income, 0.0);
        assert_approx(reverse.breakdown.total_tax, 0.0);
    }

    #[test]
    fn reverse_tax_grows_upper_bound_for_punitive_rates() {
        let mut provinces = BTreeMap::new();
        provinces.insert(
            "HIGH".to_string(),
            TaxTable {
                exemption: 0.0,
                brackets: vec![TaxBracket {
                    threshold: None,
                    rate: 0.6,
                }],
            },
        );
        let tables = TaxTables {
            federal: TaxTable {
                exemption: 0.0,
                brackets: vec![TaxBracket {
                    threshold: None,
                    rate: 0.0,
                }],
            },
            provinces,
        };
        let engine = TaxEngine::uncached(Arc::new(tables));
        let reverse = engine.gross_for_net(10_000.0, "HIGH").expect("HIGH");
        assert_approx_tol(reverse.gross_income, 25_000.0, 0.011);
    }

    #[test]
    fn memory_cache_serves_repeat_lookups() {
        let cache = Arc::new(MemoryCache::new());
        let engine = TaxEngine::new(
            Arc::new(TaxTables::embedded().expect("embedded tables")),
            cache.clone(),
        );
        assert!(cache.is_empty());

        let first = engine.gross_for_net(30_010.0, "ONT").expect("ONT");
        assert_eq!(cache.len(), 1);
        let second = engine.gross_for_net(30_010.0, "ONT").expect("ONT");
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        engine.gross_for_net(30_010.0, "AB").expect("AB");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn null_cache_never_stores() {
        let cache = NullCache;
        let sample = ReverseTax {
            gross_income: 1.0,
            breakdown: TaxBreakdown {
                federal_tax: 0.0,
                provincial_tax: 0.0,
                total_tax: 0.0,
                take_home: 1.0,
            },
        };
        cache.insert(1.0, "ONT", sample);
        assert!(cache.get(1.0, "ONT").is_none());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_tax_is_monotone_and_take_home_is_gross_minus_tax(
            gross in 0.0f64..600_000.0,
            bump in 0.0f64..50_000.0,
            province_index in 0usize..3,
        ) {
            let province = ["ONT", "AB", "BC"][province_index];
            let engine = engine();
            let low = engine.calculate(gross, province).expect("known province");
            let high = engine.calculate(gross + bump, province).expect("known province");
            prop_assert!(high.total_tax + 1e-9 >= low.total_tax);
            prop_assert!((low.take_home - (gross - low.total_tax)).abs() <= 1e-9);
            prop_assert!(low.total_tax >= 0.0);
        }

        #[test]
        fn prop_reverse_tax_is_left_inverse_of_forward(
            target in 1_000.0f64..400_000.0,
            province_index in 0usize..3,
        ) {
            let province = ["ONT", "AB", "BC"][province_index];
            let engine = engine();
            let reverse = engine.gross_for_net(target, province).expect("known province");
            let take_home = engine.take_home(reverse.gross_income, province).expect("known province");
            prop_assert!((take_home - target).abs() <= 0.02, "target {target}, got {take_home}");
        }
    }
}
