//! Expression evaluation and the function library.
//!
//! - [`expression`]: a restricted arithmetic grammar with a fixed identifier
//!   whitelist. Anything else is rejected before evaluation.
//! - [`library`]: financial and statistical functions dispatched through a
//!   name → `{primary, fallback}` table.
//! - [`conversion`], [`problems`], [`matrix`]: unit conversion, ratio and
//!   percentage word problems, small dense matrix algebra.

pub mod conversion;
pub mod expression;
pub mod financial;
pub mod library;
pub mod matrix;
pub mod problems;
pub mod statistical;

pub use expression::{evaluate, evaluate_expression};
pub use financial::{FinancialParams, PaymentTiming, PeriodBasis};
pub use library::{Computed, FunctionLibrary, Tier};
pub use statistical::Divisor;
