//! Query normalization and intent detection.
//!
//! [`normalize`] cleans up the surface form of a query (currency symbols,
//! thousands separators, magnitude suffixes). [`detect`] classifies the
//! query into an [`IntentType`] with a confidence and whatever parameters
//! could be pulled out of it. Both are pure and never fail.

mod detect;
mod extract;
mod normalize;
mod patterns;

pub use abacus_core::IntentType;
pub use detect::{detect, DetectionResult};
pub use extract::Parameters;
pub use normalize::normalize;
