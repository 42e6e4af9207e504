//! Descriptive statistics over a flat list of numbers.
//!
//! The hand-written kernels here are the fallback tier. With the `extended`
//! feature, [`primary`] backs the aggregates statrs covers; those return NaN
//! where the kernels return an error, and the library treats a non-finite
//! primary result as a miss.

use serde::{Deserialize, Serialize};

use abacus_core::CalcError;

/// Denominator for variance and standard deviation. Always chosen by the
/// caller; never guessed from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divisor {
    /// n - 1
    #[default]
    Sample,
    /// n
    Population,
}

fn non_empty(values: &[f64]) -> Result<&[f64], CalcError> {
    if values.is_empty() {
        Err(CalcError::missing("values"))
    } else {
        Ok(values)
    }
}

pub fn sum(values: &[f64]) -> Result<f64, CalcError> {
    Ok(non_empty(values)?.iter().sum())
}

pub fn count(values: &[f64]) -> Result<f64, CalcError> {
    Ok(values.len() as f64)
}

pub fn average(values: &[f64]) -> Result<f64, CalcError> {
    let values = non_empty(values)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min(values: &[f64]) -> Result<f64, CalcError> {
    Ok(non_empty(values)?.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn max(values: &[f64]) -> Result<f64, CalcError> {
    Ok(non_empty(values)?.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn median(values: &[f64]) -> Result<f64, CalcError> {
    let mut sorted = non_empty(values)?.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

/// Most frequent value; ties go to the value seen first. A list where every
/// value is distinct has no mode.
pub fn mode(values: &[f64]) -> Result<f64, CalcError> {
    let values = non_empty(values)?;
    let mut best: Option<(f64, usize)> = None;
    for (i, &candidate) in values.iter().enumerate() {
        if values[..i].contains(&candidate) {
            continue;
        }
        let n = values[i..].iter().filter(|&&v| v == candidate).count();
        if n > 1 && best.map_or(true, |(_, best_n)| n > best_n) {
            best = Some((candidate, n));
        }
    }
    best.map(|(v, _)| v)
        .ok_or_else(|| CalcError::domain("no value repeats, so there is no mode"))
}

fn denominator(n: usize, divisor: Divisor) -> Result<f64, CalcError> {
    match divisor {
        Divisor::Sample if n < 2 => Err(CalcError::domain(
            "sample variance needs at least two values",
        )),
        Divisor::Sample => Ok((n - 1) as f64),
        Divisor::Population => Ok(n as f64),
    }
}

pub fn variance_two_pass(values: &[f64], divisor: Divisor) -> Result<f64, CalcError> {
    let mean = average(values)?;
    let ss: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    Ok(ss / denominator(values.len(), divisor)?)
}

pub fn stdev_two_pass(values: &[f64], divisor: Divisor) -> Result<f64, CalcError> {
    variance_two_pass(values, divisor).map(f64::sqrt)
}

#[cfg(feature = "extended")]
pub mod primary {
    use statrs::statistics::{Data, OrderStatistics, Statistics};

    use super::{non_empty, Divisor};
    use abacus_core::CalcError;

    pub fn average(values: &[f64]) -> Result<f64, CalcError> {
        Ok(Statistics::mean(non_empty(values)?))
    }

    pub fn min(values: &[f64]) -> Result<f64, CalcError> {
        Ok(Statistics::min(non_empty(values)?))
    }

    pub fn max(values: &[f64]) -> Result<f64, CalcError> {
        Ok(Statistics::max(non_empty(values)?))
    }

    pub fn median(values: &[f64]) -> Result<f64, CalcError> {
        let mut data = Data::new(non_empty(values)?.to_vec());
        Ok(OrderStatistics::median(&mut data))
    }

    /// Sample variance of a single value is NaN here, so the fallback
    /// reports the domain error.
    pub fn variance(values: &[f64], divisor: Divisor) -> Result<f64, CalcError> {
        let values = non_empty(values)?;
        Ok(match divisor {
            Divisor::Sample => Statistics::variance(values),
            Divisor::Population => Statistics::population_variance(values),
        })
    }

    pub fn stdev(values: &[f64], divisor: Divisor) -> Result<f64, CalcError> {
        let values = non_empty(values)?;
        Ok(match divisor {
            Divisor::Sample => Statistics::std_dev(values),
            Divisor::Population => Statistics::population_std_dev(values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_core::ErrorKind;

    const DATA: [f64; 8] = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

    #[test]
    fn test_basic_aggregates() {
        assert_eq!(sum(&DATA).unwrap(), 40.0);
        assert_eq!(average(&DATA).unwrap(), 5.0);
        assert_eq!(count(&DATA).unwrap(), 8.0);
        assert_eq!(min(&DATA).unwrap(), 2.0);
        assert_eq!(max(&DATA).unwrap(), 9.0);
        assert_eq!(median(&DATA).unwrap(), 4.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(mode(&DATA).unwrap(), 4.0);
    }

    #[test]
    fn test_population_vs_sample() {
        assert!((stdev_two_pass(&DATA, Divisor::Population).unwrap() - 2.0).abs() < 1e-12);
        let sample = (32.0f64 / 7.0).sqrt();
        assert!((stdev_two_pass(&DATA, Divisor::Sample).unwrap() - sample).abs() < 1e-12);
        assert!((variance_two_pass(&DATA, Divisor::Sample).unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[cfg(feature = "extended")]
    #[test]
    fn test_primary_matches_kernels() {
        assert!((primary::average(&DATA).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(primary::min(&DATA).unwrap(), 2.0);
        assert_eq!(primary::max(&DATA).unwrap(), 9.0);
        assert_eq!(primary::median(&DATA).unwrap(), 4.5);
        assert_eq!(primary::median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        for divisor in [Divisor::Sample, Divisor::Population] {
            let a = primary::variance(&DATA, divisor).unwrap();
            let b = variance_two_pass(&DATA, divisor).unwrap();
            assert!((a - b).abs() < 1e-12, "{:?}: {} vs {}", divisor, a, b);
            let a = primary::stdev(&DATA, divisor).unwrap();
            let b = stdev_two_pass(&DATA, divisor).unwrap();
            assert!((a - b).abs() < 1e-12);
        }
        assert!(primary::variance(&[1.0], Divisor::Sample).unwrap().is_nan());
        assert_eq!(primary::average(&[]).unwrap_err().kind(), ErrorKind::ParameterMissing);
    }

    #[test]
    fn test_empty_and_degenerate() {
        assert_eq!(sum(&[]).unwrap_err().kind(), ErrorKind::ParameterMissing);
        assert_eq!(count(&[]).unwrap(), 0.0);
        assert_eq!(
            variance_two_pass(&[1.0], Divisor::Sample).unwrap_err().kind(),
            ErrorKind::DomainError
        );
        assert_eq!(variance_two_pass(&[1.0], Divisor::Population).unwrap(), 0.0);
        assert_eq!(mode(&[1.0, 2.0, 3.0]).unwrap_err().kind(), ErrorKind::DomainError);
    }
}
