//! Query routing.
//!
//! The [`Router`] runs intent detection, hands the query to the engine for
//! its type, and on failure walks a fixed fallback order until one engine
//! answers. Every outcome, including "not a calculation", comes back as a
//! [`CalculationResult`].

pub mod codegen;
pub mod context;
pub mod engines;
pub mod router;

pub use codegen::{CodeGenerator, GeneratedCode, StaticCodeGenerator};
pub use context::{CalculateOptions, CalculationContext};
pub use engines::{
    CalculationEngine, EngineRequest, EvaluatorEngine, FunctionLibraryEngine, SandboxEngine,
    SpreadsheetEngineAdapter,
};
pub use router::{
    primary_engine, Router, RouterBuilder, RouterConfig, DEFAULT_FALLBACK_ORDER, DEFAULT_MIN_CONFIDENCE,
};
