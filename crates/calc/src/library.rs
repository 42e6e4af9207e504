//! Name → implementation dispatch for financial and statistical functions.
//!
//! Every entry carries a closed-form fallback. Entries may also carry a
//! primary implementation (behind the `extended` feature). The primary runs
//! first; the fallback runs when the primary is absent, errors, or produces a
//! non-finite number.

use rustc_hash::FxHashMap;
use serde::Serialize;

use abacus_core::CalcError;

use crate::financial::{self, FinancialParams};
use crate::statistical::{self, Divisor};

type FinancialFn = fn(&FinancialParams) -> Result<f64, CalcError>;
type StatisticalFn = fn(&[f64], Divisor) -> Result<f64, CalcError>;

/// Which implementation produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Computed {
    pub value: f64,
    pub tier: Tier,
}

#[derive(Clone, Copy)]
struct Tiered<F> {
    primary: Option<F>,
    fallback: F,
}

pub struct FunctionLibrary {
    financial: FxHashMap<&'static str, Tiered<FinancialFn>>,
    statistical: FxHashMap<&'static str, Tiered<StatisticalFn>>,
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        Self::new()
    }
}

const FINANCIAL_TABLE: &[(&str, FinancialFn, FinancialFn)] = &[
    ("PMT", financial::primary_pmt, financial::fallback_pmt),
    ("FV", financial::primary_fv, financial::fallback_fv),
    ("PV", financial::primary_pv, financial::fallback_pv),
    ("NPV", financial::primary_npv, financial::fallback_npv),
    ("IRR", financial::primary_irr, financial::fallback_irr),
    ("NPER", financial::primary_nper, financial::fallback_nper),
    ("CAGR", financial::primary_cagr, financial::fallback_cagr),
];

fn stat_sum(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::sum(v)
}
fn stat_average(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::average(v)
}
fn stat_median(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::median(v)
}
fn stat_mode(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::mode(v)
}
fn stat_min(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::min(v)
}
fn stat_max(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::max(v)
}
fn stat_count(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
    statistical::count(v)
}

#[cfg(feature = "extended")]
mod statrs_tier {
    use super::*;
    use crate::statistical::primary;

    pub fn average(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
        primary::average(v)
    }
    pub fn median(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
        primary::median(v)
    }
    pub fn min(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
        primary::min(v)
    }
    pub fn max(v: &[f64], _: Divisor) -> Result<f64, CalcError> {
        primary::max(v)
    }
}

#[cfg(feature = "extended")]
macro_rules! library_tier {
    ($f:path) => {
        Some($f as StatisticalFn)
    };
}

#[cfg(not(feature = "extended"))]
macro_rules! library_tier {
    ($f:path) => {
        None
    };
}

/// (name, primary, fallback). SUM, MODE and COUNT have no library
/// counterpart and always run the kernel.
const STATISTICAL_TABLE: &[(&str, Option<StatisticalFn>, StatisticalFn)] = &[
    ("SUM", None, stat_sum),
    ("AVERAGE", library_tier!(statrs_tier::average), stat_average),
    ("MEDIAN", library_tier!(statrs_tier::median), stat_median),
    ("MODE", None, stat_mode),
    ("MIN", library_tier!(statrs_tier::min), stat_min),
    ("MAX", library_tier!(statrs_tier::max), stat_max),
    ("COUNT", None, stat_count),
    ("STDEV", library_tier!(statistical::primary::stdev), statistical::stdev_two_pass),
    ("VAR", library_tier!(statistical::primary::variance), statistical::variance_two_pass),
];

impl FunctionLibrary {
    /// Library with both tiers populated when the `extended` feature is on.
    pub fn new() -> Self {
        Self::build(cfg!(feature = "extended"))
    }

    /// Fallback-only library, as if the primary implementations were
    /// unavailable.
    pub fn without_primary() -> Self {
        Self::build(false)
    }

    fn build(with_primary: bool) -> Self {
        let financial = FINANCIAL_TABLE
            .iter()
            .map(|&(name, primary, fallback)| {
                (name, Tiered { primary: with_primary.then_some(primary), fallback })
            })
            .collect();
        let statistical = STATISTICAL_TABLE
            .iter()
            .map(|&(name, primary, fallback)| {
                (name, Tiered { primary: primary.filter(|_| with_primary), fallback })
            })
            .collect();
        Self { financial, statistical }
    }

    pub fn has_primary(&self) -> bool {
        self.financial.values().any(|t| t.primary.is_some())
            || self.statistical.values().any(|t| t.primary.is_some())
    }

    /// Which tier `name` would try first.
    pub fn statistical_tier(&self, name: &str) -> Option<Tier> {
        let entry = self.statistical.get(name.trim().to_ascii_uppercase().as_str())?;
        Some(if entry.primary.is_some() { Tier::Primary } else { Tier::Fallback })
    }

    pub fn financial_names(&self) -> Vec<&'static str> {
        sorted_keys(&self.financial)
    }

    pub fn statistical_names(&self) -> Vec<&'static str> {
        sorted_keys(&self.statistical)
    }

    pub fn calculate_financial(
        &self,
        name: &str,
        params: &FinancialParams,
    ) -> Result<Computed, CalcError> {
        let key = name.trim().to_ascii_uppercase();
        let entry = self
            .financial
            .get(key.as_str())
            .ok_or_else(|| CalcError::evaluation(format!("unknown financial function: {}", name)))?;
        run_tiered(&key, entry, |f| f(params))
    }

    /// Statistical dispatch. `STDEV.P`/`VAR.P` select the population divisor
    /// and `STDEV.S`/`VAR.S` the sample divisor; for plain `STDEV`/`VAR` the
    /// caller's `divisor` applies.
    pub fn calculate_statistical(
        &self,
        name: &str,
        values: &[f64],
        divisor: Divisor,
    ) -> Result<Computed, CalcError> {
        let upper = name.trim().to_ascii_uppercase();
        let (key, divisor) = match upper.as_str() {
            "STDEV.S" | "STDEVS" => ("STDEV", Divisor::Sample),
            "STDEV.P" | "STDEVP" => ("STDEV", Divisor::Population),
            "VAR.S" | "VARS" => ("VAR", Divisor::Sample),
            "VAR.P" | "VARP" => ("VAR", Divisor::Population),
            "MEAN" => ("AVERAGE", divisor),
            other => (other, divisor),
        };
        let entry = self.statistical.get(key).ok_or_else(|| {
            CalcError::evaluation(format!("unknown statistical function: {}", name))
        })?;
        run_tiered(key, entry, |f| f(values, divisor))
    }
}

fn sorted_keys<V>(map: &FxHashMap<&'static str, V>) -> Vec<&'static str> {
    let mut names: Vec<_> = map.keys().copied().collect();
    names.sort_unstable();
    names
}

fn run_tiered<F: Copy>(
    name: &str,
    entry: &Tiered<F>,
    call: impl Fn(F) -> Result<f64, CalcError>,
) -> Result<Computed, CalcError> {
    if let Some(primary) = entry.primary {
        match call(primary) {
            Ok(value) if value.is_finite() => {
                return Ok(Computed { value, tier: Tier::Primary })
            }
            Ok(value) => log::debug!("{}: primary returned {}, using fallback", name, value),
            // Missing inputs will be missing for the fallback too.
            Err(e @ CalcError::ParameterMissing(_)) => return Err(e),
            Err(e) => log::debug!("{}: primary failed ({}), using fallback", name, e),
        }
    }

    let value = call(entry.fallback)?;
    if !value.is_finite() {
        return Err(CalcError::domain(format!("{} produced a non-finite result", name)));
    }
    Ok(Computed { value, tier: Tier::Fallback })
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_core::ErrorKind;

    fn mortgage() -> FinancialParams {
        FinancialParams {
            rate: Some(0.05 / 12.0),
            nper: Some(360.0),
            pv: Some(200_000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_dispatch_is_case_insensitive() {
        let lib = FunctionLibrary::new();
        let a = lib.calculate_financial("pmt", &mortgage()).unwrap();
        let b = lib.calculate_financial("PMT", &mortgage()).unwrap();
        assert_eq!(a.value, b.value);
        assert!((a.value - 1073.64).abs() < 0.01);
    }

    #[cfg(feature = "extended")]
    #[test]
    fn test_primary_tier_used_when_available() {
        let lib = FunctionLibrary::new();
        assert!(lib.has_primary());
        let c = lib.calculate_financial("PMT", &mortgage()).unwrap();
        assert_eq!(c.tier, Tier::Primary);
    }

    #[test]
    fn test_fallback_only_library() {
        let lib = FunctionLibrary::without_primary();
        assert!(!lib.has_primary());
        let c = lib.calculate_financial("PMT", &mortgage()).unwrap();
        assert_eq!(c.tier, Tier::Fallback);
        assert!((c.value - 1073.64).abs() < 0.01);

        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = lib.calculate_statistical("stdev.p", &data, Divisor::Sample).unwrap();
        assert!((s.value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_irr_through_library() {
        let lib = FunctionLibrary::new();
        let params = FinancialParams {
            cash_flows: Some(vec![-100_000.0, 30_000.0, 40_000.0, 50_000.0, 60_000.0]),
            ..Default::default()
        };
        let c = lib.calculate_financial("IRR", &params).unwrap();
        assert!((c.value - 0.2489).abs() < 0.001);
    }

    #[test]
    fn test_divisor_aliases() {
        let lib = FunctionLibrary::new();
        let data = [1.0, 2.0, 3.0, 4.0];
        let pop = lib.calculate_statistical("VAR.P", &data, Divisor::Sample).unwrap();
        let sample = lib.calculate_statistical("VAR.S", &data, Divisor::Population).unwrap();
        assert!((pop.value - 1.25).abs() < 1e-12);
        assert!((sample.value - 5.0 / 3.0).abs() < 1e-12);

        let explicit = lib.calculate_statistical("VAR", &data, Divisor::Population).unwrap();
        assert_eq!(explicit.value, pop.value);

        let mean = lib.calculate_statistical("mean", &data, Divisor::Sample).unwrap();
        assert_eq!(mean.value, 2.5);
    }

    #[test]
    fn test_unknown_names_and_missing_inputs() {
        let lib = FunctionLibrary::new();
        let err = lib.calculate_financial("XIRR", &mortgage()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationError);
        let err = lib.calculate_statistical("KURT", &[1.0], Divisor::Sample).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationError);

        let err = lib.calculate_financial("PMT", &FinancialParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterMissing);
    }

    fn nan_primary(_: &[f64], _: Divisor) -> Result<f64, CalcError> {
        Ok(f64::NAN)
    }

    #[test]
    fn test_non_finite_primary_falls_through() {
        let mut lib = FunctionLibrary::without_primary();
        lib.statistical.insert("AVERAGE", Tiered { primary: Some(nan_primary), fallback: stat_average });
        let c = lib.calculate_statistical("AVERAGE", &[1.0, 2.0, 3.0], Divisor::Sample).unwrap();
        assert_eq!(c.tier, Tier::Fallback);
        assert_eq!(c.value, 2.0);
    }

    #[cfg(feature = "extended")]
    #[test]
    fn test_statistical_tiers_agree() {
        let with = FunctionLibrary::new();
        let without = FunctionLibrary::without_primary();
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        for name in ["AVERAGE", "MEDIAN", "MIN", "MAX", "STDEV.S", "STDEV.P", "VAR.S", "VAR.P"] {
            let a = with.calculate_statistical(name, &data, Divisor::Sample).unwrap();
            let b = without.calculate_statistical(name, &data, Divisor::Sample).unwrap();
            assert_eq!(a.tier, Tier::Primary, "{}", name);
            assert_eq!(b.tier, Tier::Fallback, "{}", name);
            assert!((a.value - b.value).abs() < 1e-12, "{}: {} vs {}", name, a.value, b.value);
        }

        assert_eq!(with.statistical_tier("sum"), Some(Tier::Fallback));
        assert_eq!(with.statistical_tier("median"), Some(Tier::Primary));

        // statrs answers NaN for a one-value sample variance; the kernel
        // turns that into a domain error
        let err = with.calculate_statistical("VAR.S", &[1.0], Divisor::Sample).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainError);
    }

    #[test]
    fn test_tables_cover_both_families() {
        let lib = FunctionLibrary::new();
        assert_eq!(lib.financial_names(), vec!["CAGR", "FV", "IRR", "NPER", "NPV", "PMT", "PV"]);
        assert!(lib.statistical_names().contains(&"MEDIAN"));
    }
}
