//! Abacus configuration
//!
//! Settings are read from TOML. Every section and field has a default, so a
//! missing or partial file is always usable.

pub mod settings;

pub use settings::{
    ConfigError, DetectorSettings, EngineSettings, RouterSettings, SandboxSettings, Settings,
    CONFIG_ENV_VAR,
};
