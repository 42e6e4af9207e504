//! Time-value-of-money functions.
//!
//! Two layers live here:
//!
//! - spreadsheet-convention kernels (`pmt`, `fv`, `pv`, `npv`, `irr`, `nper`)
//!   using the cash-flow sign convention, where money paid out is negative.
//!   The spreadsheet engine calls these directly.
//! - calculator entry points (`primary_*`, `fallback_*`) that read
//!   [`FinancialParams`] and report magnitudes the way a person asks for them:
//!   the monthly payment on a 200,000 loan is a positive 1,073.64.

use serde::{Deserialize, Serialize};

use abacus_core::CalcError;

/// How the `rate` in [`FinancialParams`] relates to the period length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodBasis {
    /// `rate` is already the rate per period.
    #[default]
    PerPeriod,
    /// `rate` is annual and periods are months: the periodic rate is `rate / 12`.
    Monthly,
}

impl PeriodBasis {
    pub fn periodic_rate(self, rate: f64) -> f64 {
        match self {
            PeriodBasis::PerPeriod => rate,
            PeriodBasis::Monthly => rate / 12.0,
        }
    }
}

/// When payments fall within each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTiming {
    #[default]
    End,
    Begin,
}

impl PaymentTiming {
    fn flag(self) -> f64 {
        match self {
            PaymentTiming::End => 0.0,
            PaymentTiming::Begin => 1.0,
        }
    }
}

/// Inputs to the calculator-facing financial functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialParams {
    pub rate: Option<f64>,
    pub nper: Option<f64>,
    pub pv: Option<f64>,
    pub fv: Option<f64>,
    pub pmt: Option<f64>,
    pub cash_flows: Option<Vec<f64>>,
    /// Starting rate for IRR. Defaults to 0.1.
    pub guess: Option<f64>,
    /// Duration in years for growth rates.
    pub years: Option<f64>,
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    pub timing: PaymentTiming,
    pub basis: PeriodBasis,
}

impl FinancialParams {
    fn periodic_rate(&self) -> Result<f64, CalcError> {
        let rate = require(self.rate, "rate")?;
        Ok(self.basis.periodic_rate(rate))
    }

    fn cash_flows(&self) -> Result<&[f64], CalcError> {
        match self.cash_flows.as_deref() {
            Some(flows) if !flows.is_empty() => Ok(flows),
            _ => Err(CalcError::missing("cashFlows")),
        }
    }
}

fn require(value: Option<f64>, name: &str) -> Result<f64, CalcError> {
    value.ok_or_else(|| CalcError::missing(name))
}

fn positive_periods(nper: f64) -> Result<f64, CalcError> {
    if nper <= 0.0 {
        Err(CalcError::domain("number of periods must be positive"))
    } else {
        Ok(nper)
    }
}

// =============================================================================
// Spreadsheet-convention kernels
// =============================================================================

/// Payment per period. Negative for a positive `pv` (money leaves each period).
pub fn pmt(rate: f64, nper: f64, pv: f64, fv: f64, timing: PaymentTiming) -> Result<f64, CalcError> {
    if nper == 0.0 {
        return Err(CalcError::domain("PMT requires a non-zero number of periods"));
    }
    if rate == 0.0 {
        return Ok(-(pv + fv) / nper);
    }
    let pow = (1.0 + rate).powf(nper);
    let p = (rate * (pv * pow + fv)) / (pow - 1.0);
    Ok(-p / (1.0 + rate * timing.flag()))
}

pub fn fv(rate: f64, nper: f64, pmt: f64, pv: f64, timing: PaymentTiming) -> f64 {
    if rate == 0.0 {
        return -pv - pmt * nper;
    }
    let pow = (1.0 + rate).powf(nper);
    let fv_pmt = pmt * (1.0 + rate * timing.flag()) * (pow - 1.0) / rate;
    -(pv * pow + fv_pmt)
}

pub fn pv(rate: f64, nper: f64, pmt: f64, fv: f64, timing: PaymentTiming) -> f64 {
    if rate == 0.0 {
        return -fv - pmt * nper;
    }
    let pow = (1.0 + rate).powf(nper);
    let pv_pmt = pmt * (1.0 + rate * timing.flag()) * (pow - 1.0) / rate;
    -(fv + pv_pmt) / pow
}

/// Net present value with the first value discounted one full period.
pub fn npv(rate: f64, values: &[f64]) -> Result<f64, CalcError> {
    if rate == -1.0 {
        return Err(CalcError::domain("NPV rate of -100% divides by zero"));
    }
    Ok(values
        .iter()
        .enumerate()
        .map(|(i, v)| v / (1.0 + rate).powi(i as i32 + 1))
        .sum())
}

pub fn nper(rate: f64, pmt: f64, pv: f64, fv: f64, timing: PaymentTiming) -> Result<f64, CalcError> {
    if rate == 0.0 {
        if pmt == 0.0 {
            return Err(CalcError::domain("NPER with zero rate requires a payment"));
        }
        return Ok(-(pv + fv) / pmt);
    }
    let adjusted = pmt * (1.0 + rate * timing.flag());
    let ratio = (adjusted - fv * rate) / (adjusted + pv * rate);
    if ratio <= 0.0 {
        return Err(CalcError::domain("payment never repays the balance"));
    }
    Ok(ratio.ln() / (1.0 + rate).ln())
}

fn check_irr_inputs(values: &[f64]) -> Result<(), CalcError> {
    if values.len() < 2 {
        return Err(CalcError::domain("IRR needs at least two cash flows"));
    }
    let has_positive = values.iter().any(|&v| v > 0.0);
    let has_negative = values.iter().any(|&v| v < 0.0);
    if !has_positive || !has_negative {
        return Err(CalcError::domain("IRR needs at least one positive and one negative cash flow"));
    }
    Ok(())
}

fn npv_at(values: &[f64], rate: f64) -> f64 {
    values
        .iter()
        .enumerate()
        .map(|(i, &cf)| cf / (1.0 + rate).powf(i as f64))
        .sum()
}

/// Newton–Raphson IRR: at most 100 iterations, converged when successive
/// rates differ by less than 1e-10.
pub fn irr_newton(values: &[f64], guess: f64) -> Result<f64, CalcError> {
    check_irr_inputs(values)?;
    let mut rate = guess;

    for _ in 0..100 {
        let base = 1.0 + rate;
        let mut npv = 0.0;
        let mut dnpv = 0.0;
        for (i, &cf) in values.iter().enumerate() {
            let t = i as f64;
            npv += cf / base.powf(t);
            if t > 0.0 {
                dnpv -= t * cf / base.powf(t + 1.0);
            }
        }

        if dnpv == 0.0 || !dnpv.is_finite() {
            return Err(CalcError::domain("IRR derivative vanished; no convergence"));
        }

        let next = rate - npv / dnpv;
        if !next.is_finite() || next <= -1.0 {
            return Err(CalcError::domain("IRR diverged"));
        }
        if (next - rate).abs() < 1e-10 {
            return Ok(next);
        }
        rate = next;
    }

    Err(CalcError::domain("IRR did not converge within 100 iterations"))
}

/// Newton–Raphson first, then bisection over a bracketed search when Newton
/// wanders off.
pub fn irr(values: &[f64], guess: f64) -> Result<f64, CalcError> {
    match irr_newton(values, guess) {
        Ok(rate) => return Ok(rate),
        Err(e) if check_irr_inputs(values).is_err() => return Err(e),
        Err(e) => log::debug!("irr: newton failed ({}), trying bisection", e),
    }

    const SEARCH_RATES: &[f64] = &[
        -0.99, -0.95, -0.9, -0.8, -0.5, -0.3, -0.1, 0.0, 0.1, 0.2, 0.3, 0.5, 0.8, 1.0, 2.0, 5.0,
        10.0,
    ];

    let mut bracket = None;
    let mut prev: Option<(f64, f64)> = None;
    for &r in SEARCH_RATES {
        let npv = npv_at(values, r);
        if !npv.is_finite() {
            prev = None;
            continue;
        }
        if let Some((prev_rate, prev_npv)) = prev {
            if prev_npv != 0.0 && npv.signum() != prev_npv.signum() {
                bracket = Some((prev_rate, r, prev_npv));
                break;
            }
        }
        prev = Some((r, npv));
    }

    let Some((mut lo, mut hi, npv_lo)) = bracket else {
        return Err(CalcError::domain("IRR has no solution in the searched range"));
    };

    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        let npv_mid = npv_at(values, mid);
        if !npv_mid.is_finite() {
            return Err(CalcError::domain("IRR diverged"));
        }
        if npv_mid.abs() < 1e-10 || (hi - lo) < 1e-12 {
            return Ok(mid);
        }
        if npv_mid.signum() == npv_lo.signum() {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok((lo + hi) / 2.0)
}

// =============================================================================
// Calculator entry points: primary tier
// =============================================================================

pub fn primary_pmt(p: &FinancialParams) -> Result<f64, CalcError> {
    let rate = p.periodic_rate()?;
    let nper = positive_periods(require(p.nper, "nper")?)?;
    let pv = require(p.pv, "pv")?;
    Ok(-pmt(rate, nper, pv, p.fv.unwrap_or(0.0), p.timing)?)
}

pub fn primary_fv(p: &FinancialParams) -> Result<f64, CalcError> {
    let rate = p.periodic_rate()?;
    let nper = positive_periods(require(p.nper, "nper")?)?;
    if p.pv.is_none() && p.pmt.is_none() {
        return Err(CalcError::missing("pv"));
    }
    Ok(fv(rate, nper, -p.pmt.unwrap_or(0.0), -p.pv.unwrap_or(0.0), p.timing))
}

pub fn primary_pv(p: &FinancialParams) -> Result<f64, CalcError> {
    let rate = p.periodic_rate()?;
    let nper = positive_periods(require(p.nper, "nper")?)?;
    if p.pmt.is_none() && p.fv.is_none() {
        return Err(CalcError::missing("pmt"));
    }
    Ok(pv(rate, nper, -p.pmt.unwrap_or(0.0), -p.fv.unwrap_or(0.0), p.timing))
}

/// NPV with the first cash flow at time zero (the initial investment).
pub fn primary_npv(p: &FinancialParams) -> Result<f64, CalcError> {
    let rate = p.periodic_rate()?;
    let flows = p.cash_flows()?;
    Ok(flows[0] + npv(rate, &flows[1..])?)
}

pub fn primary_irr(p: &FinancialParams) -> Result<f64, CalcError> {
    irr(p.cash_flows()?, p.guess.unwrap_or(0.1))
}

pub fn primary_nper(p: &FinancialParams) -> Result<f64, CalcError> {
    let rate = p.periodic_rate()?;
    let pv = require(p.pv, "pv")?;
    match (p.pmt, p.fv) {
        (Some(payment), fv) => nper(rate, -payment, pv, fv.unwrap_or(0.0), p.timing),
        (None, Some(target)) => growth_periods(rate, pv, target),
        (None, None) => Err(CalcError::missing("pmt")),
    }
}

pub fn primary_cagr(p: &FinancialParams) -> Result<f64, CalcError> {
    let (start, end, years) = growth_inputs(p)?;
    Ok((end / start).powf(1.0 / years) - 1.0)
}

// =============================================================================
// Calculator entry points: closed-form fallback tier
// =============================================================================

pub fn fallback_pmt(p: &FinancialParams) -> Result<f64, CalcError> {
    let r = p.periodic_rate()?;
    let n = positive_periods(require(p.nper, "nper")?)?;
    let pv = require(p.pv, "pv")?;
    let fv = p.fv.unwrap_or(0.0);
    if r == 0.0 {
        return Ok((pv + fv) / n);
    }
    let growth = (1.0 + r).powf(n);
    let payment = r * pv / (1.0 - 1.0 / growth) + r * fv / (growth - 1.0);
    Ok(match p.timing {
        PaymentTiming::End => payment,
        PaymentTiming::Begin => payment / (1.0 + r),
    })
}

pub fn fallback_fv(p: &FinancialParams) -> Result<f64, CalcError> {
    let r = p.periodic_rate()?;
    let n = positive_periods(require(p.nper, "nper")?)?;
    if p.pv.is_none() && p.pmt.is_none() {
        return Err(CalcError::missing("pv"));
    }
    let pv = p.pv.unwrap_or(0.0);
    let payment = p.pmt.unwrap_or(0.0);
    if r == 0.0 {
        return Ok(pv + payment * n);
    }
    let growth = (1.0 + r).powf(n);
    let annuity = payment * (growth - 1.0) / r;
    let annuity = match p.timing {
        PaymentTiming::End => annuity,
        PaymentTiming::Begin => annuity * (1.0 + r),
    };
    Ok(pv * growth + annuity)
}

pub fn fallback_pv(p: &FinancialParams) -> Result<f64, CalcError> {
    let r = p.periodic_rate()?;
    let n = positive_periods(require(p.nper, "nper")?)?;
    if p.pmt.is_none() && p.fv.is_none() {
        return Err(CalcError::missing("pmt"));
    }
    let payment = p.pmt.unwrap_or(0.0);
    let fv = p.fv.unwrap_or(0.0);
    if r == 0.0 {
        return Ok(payment * n + fv);
    }
    let discount = (1.0 + r).powf(-n);
    let annuity = payment * (1.0 - discount) / r;
    let annuity = match p.timing {
        PaymentTiming::End => annuity,
        PaymentTiming::Begin => annuity * (1.0 + r),
    };
    Ok(annuity + fv * discount)
}

pub fn fallback_npv(p: &FinancialParams) -> Result<f64, CalcError> {
    let r = p.periodic_rate()?;
    if r <= -1.0 {
        return Err(CalcError::domain("NPV rate must be greater than -100%"));
    }
    let flows = p.cash_flows()?;
    Ok(npv_at(flows, r))
}

pub fn fallback_irr(p: &FinancialParams) -> Result<f64, CalcError> {
    irr_newton(p.cash_flows()?, p.guess.unwrap_or(0.1))
}

pub fn fallback_nper(p: &FinancialParams) -> Result<f64, CalcError> {
    let r = p.periodic_rate()?;
    let pv = require(p.pv, "pv")?;
    let Some(payment) = p.pmt else {
        let target = require(p.fv, "pmt")?;
        return growth_periods(r, pv, target);
    };
    if payment <= 0.0 {
        return Err(CalcError::domain("payment must be positive"));
    }
    if r == 0.0 {
        return Ok(pv / payment);
    }
    if r * pv >= payment {
        return Err(CalcError::domain("payment does not cover the interest"));
    }
    Ok(-(1.0 - r * pv / payment).ln() / (1.0 + r).ln())
}

pub fn fallback_cagr(p: &FinancialParams) -> Result<f64, CalcError> {
    let (start, end, years) = growth_inputs(p)?;
    Ok(((end / start).ln() / years).exp() - 1.0)
}

fn growth_periods(rate: f64, pv: f64, target: f64) -> Result<f64, CalcError> {
    if rate <= 0.0 || pv <= 0.0 || target <= 0.0 {
        return Err(CalcError::domain("growth needs a positive rate, start and target"));
    }
    Ok((target / pv).ln() / (1.0 + rate).ln())
}

fn growth_inputs(p: &FinancialParams) -> Result<(f64, f64, f64), CalcError> {
    let start = require(p.start_value.or(p.pv), "startValue")?;
    let end = require(p.end_value.or(p.fv), "endValue")?;
    let years = require(p.years.or(p.nper), "years")?;
    if start <= 0.0 || end <= 0.0 {
        return Err(CalcError::domain("growth rate needs positive start and end values"));
    }
    if years <= 0.0 {
        return Err(CalcError::domain("growth rate needs a positive duration"));
    }
    Ok((start, end, years))
}
