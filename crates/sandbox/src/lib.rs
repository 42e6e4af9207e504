//! Validation and bounded execution of generated code.
//!
//! Code is checked statically first ([`validate_code`]); rejected code never
//! runs. Accepted code runs in a fresh interpreter subprocess under a
//! wall-clock timeout, with at most `max_concurrent` executions in flight.
//! Requests beyond that fail immediately instead of queueing.

pub mod config;
pub mod error;
pub mod executor;
pub mod session;
pub mod stats;
pub mod validate;

pub use config::SandboxConfig;
pub use error::SandboxError;
pub use executor::{ExecuteOptions, ExecutionOutcome, Executor};
pub use session::{Clock, SandboxSession, SessionManager, SystemClock};
pub use stats::ExecutionStats;
pub use validate::{validate_code, Validation};
