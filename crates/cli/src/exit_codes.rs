//! CLI Exit Code Registry
//!
//! Single source of truth for the exit codes scripts rely on.
//!
//! | Code | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 0    | Success                                               |
//! | 1    | Calculation failed (engine error, rejected code, ...) |
//! | 2    | Usage error (bad arguments)                           |
//! | 3    | Query is not a calculation                            |
//! | 4    | I/O or configuration error                            |

use abacus_core::CalculationResult;

pub const EXIT_SUCCESS: u8 = 0;

/// Every engine failed, a formula produced an error value, or sandbox code
/// was refused or failed.
pub const EXIT_CALC_FAILED: u8 = 1;

/// Bad arguments. clap uses the same code for parse errors.
pub const EXIT_USAGE: u8 = 2;

/// The query was classified as not a calculation. Not an error, but
/// distinguishable from success.
pub const EXIT_NOT_CALCULATION: u8 = 3;

/// A file could not be read or written, or the settings file is invalid.
pub const EXIT_IO: u8 = 4;

/// Exit code for a routed result.
pub fn result_exit_code(result: &CalculationResult) -> u8 {
    if result.success {
        EXIT_SUCCESS
    } else if result.is_not_calculation() {
        EXIT_NOT_CALCULATION
    } else {
        EXIT_CALC_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_core::{CalcError, Method};

    #[test]
    fn test_result_codes() {
        assert_eq!(result_exit_code(&CalculationResult::success(1.0, Method::Evaluator)), EXIT_SUCCESS);
        assert_eq!(result_exit_code(&CalculationResult::not_a_calculation()), EXIT_NOT_CALCULATION);
        let failed = CalculationResult::failure(&CalcError::domain("division by zero"), Method::Evaluator);
        assert_eq!(result_exit_code(&failed), EXIT_CALC_FAILED);
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [EXIT_SUCCESS, EXIT_CALC_FAILED, EXIT_USAGE, EXIT_NOT_CALCULATION, EXIT_IO];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
