//! Ratio and percentage word problems.

use abacus_core::CalcError;

/// Given `a:b` and one known side, return the other side.
///
/// With `first_known`, the known value corresponds to `a` and the result to
/// `b`; otherwise the other way round.
pub fn solve_ratio(a: f64, b: f64, known: f64, first_known: bool) -> Result<f64, CalcError> {
    let (from, to) = if first_known { (a, b) } else { (b, a) };
    if from == 0.0 {
        return Err(CalcError::domain("ratio term is zero"));
    }
    Ok(known * to / from)
}

/// How a percentage combines with the base amount.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Adjustment {
    /// amount × (1 - p)
    Reduce,
    /// amount × (1 + p)
    Increase,
    /// amount × p
    Portion,
}

const ADJUSTMENTS: &[(&str, Adjustment)] = &[
    ("discount", Adjustment::Reduce),
    ("tax", Adjustment::Increase),
    ("markup", Adjustment::Increase),
    ("tip", Adjustment::Portion),
    ("commission", Adjustment::Portion),
    ("margin", Adjustment::Portion),
];

pub fn problem_kinds() -> impl Iterator<Item = &'static str> {
    ADJUSTMENTS.iter().map(|(k, _)| *k)
}

/// Apply a whole-number percentage (`15` means 15%) to `amount`:
/// a discount returns the sale price, tax and markup the new total, and tip,
/// commission and margin the portion itself.
pub fn apply_percentage(kind: &str, percent: f64, amount: f64) -> Result<f64, CalcError> {
    let adjustment = ADJUSTMENTS
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(kind))
        .map(|(_, a)| *a)
        .ok_or_else(|| CalcError::evaluation(format!("unknown percentage problem: {}", kind)))?;
    let p = percent / 100.0;
    Ok(match adjustment {
        Adjustment::Reduce => amount * (1.0 - p),
        Adjustment::Increase => amount * (1.0 + p),
        Adjustment::Portion => amount * p,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_core::ErrorKind;

    #[test]
    fn test_solve_ratio() {
        // 3:5 boys to girls, 12 boys → 20 girls
        assert_eq!(solve_ratio(3.0, 5.0, 12.0, true).unwrap(), 20.0);
        // 3:5, 20 girls → 12 boys
        assert_eq!(solve_ratio(3.0, 5.0, 20.0, false).unwrap(), 12.0);
        assert!(solve_ratio(0.0, 5.0, 1.0, true).is_err());
    }

    #[test]
    fn test_apply_percentage() {
        assert_eq!(apply_percentage("discount", 20.0, 50.0).unwrap(), 40.0);
        assert!((apply_percentage("tax", 8.0, 100.0).unwrap() - 108.0).abs() < 1e-9);
        assert_eq!(apply_percentage("tip", 15.0, 80.0).unwrap(), 12.0);
        assert_eq!(apply_percentage("Markup", 50.0, 10.0).unwrap(), 15.0);
        assert_eq!(
            apply_percentage("rebate", 5.0, 10.0).unwrap_err().kind(),
            ErrorKind::EvaluationError
        );
        assert_eq!(problem_kinds().count(), 6);
    }
}
