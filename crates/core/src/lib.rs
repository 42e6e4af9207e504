//! Shared types for the abacus calculation engine.
//!
//! Every engine, whatever produced the answer, reports through
//! [`CalculationResult`]. Failures carry an [`ErrorKind`] from a single
//! taxonomy so the router can decide whether another engine may try.

pub mod error;
pub mod format;
pub mod intent;
pub mod result;

pub use error::{CalcError, ErrorKind};
pub use format::{format_currency, format_number, format_percent};
pub use intent::IntentType;
pub use result::{CalculationResult, DetectionSummary, Method, ResultValue};
