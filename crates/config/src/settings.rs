use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use abacus_core::Method;
use abacus_engine::StackingPolicy;
use abacus_router::{RouterConfig, DEFAULT_FALLBACK_ORDER, DEFAULT_MIN_CONFIDENCE};
use abacus_sandbox::SandboxConfig;

/// Overrides the settings file location when set.
pub const CONFIG_ENV_VAR: &str = "ABACUS_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("invalid TOML in {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub router: RouterSettings,
    pub sandbox: SandboxSettings,
    pub engine: EngineSettings,
    pub detector: DetectorSettings,
}

// Router

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub enable_fallback: bool,
    pub fallback_order: Vec<Method>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            fallback_order: DEFAULT_FALLBACK_ORDER.to_vec(),
        }
    }
}

// Sandbox

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Program and leading arguments; the script path is appended.
    pub interpreter: Vec<String>,
    pub max_code_length: usize,
    pub timeout_ms: u64,
    pub max_concurrent: usize,
    pub max_output_bytes: usize,
    pub session_idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub extra_denylist: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let base = SandboxConfig::default();
        Self {
            interpreter: base.interpreter,
            max_code_length: base.max_code_length,
            timeout_ms: base.timeout.as_millis() as u64,
            max_concurrent: base.max_concurrent,
            max_output_bytes: base.max_output_bytes,
            session_idle_ttl_secs: base.session_idle_ttl.as_secs(),
            sweep_interval_secs: base.sweep_interval.as_secs(),
            extra_denylist: base.extra_denylist,
        }
    }
}

// Engine

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Workbooks untouched for this long are unloaded. 0 keeps them forever.
    pub idle_workbook_ttl_secs: u64,
    pub whatif_stacking: StackingPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idle_workbook_ttl_secs: 1800,
            whatif_stacking: StackingPolicy::Replace,
        }
    }
}

// Detector

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub min_confidence: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self { min_confidence: DEFAULT_MIN_CONFIDENCE }
    }
}

impl Settings {
    /// Default location: `<config dir>/abacus/settings.toml`.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("abacus")
            .join("settings.toml")
    }

    /// The file to read, if any: `explicit`, then `$ABACUS_CONFIG`, then the
    /// default location when it exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let default = Self::config_path();
        default.exists().then_some(default)
    }

    /// Settings from the located file, or defaults when there is none.
    /// A file that was asked for explicitly but cannot be read is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match Self::locate(explicit) {
            Some(path) => {
                let settings = Self::load_from(&path)?;
                Ok((settings, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Best-effort load: problems are logged and defaults returned.
    pub fn load() -> Self {
        match Self::resolve(None) {
            Ok((settings, _)) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let settings: Settings = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        settings.validate()?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Write { path: parent.to_path_buf(), source })?;
        }
        let text = self.to_toml()?;
        fs::write(path, text).map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err(invalid("detector.min_confidence", format!("{} is outside 0..=1", d.min_confidence)));
        }
        if self.router.fallback_order.contains(&Method::None) {
            return Err(invalid("router.fallback_order", "\"none\" is not an engine".to_string()));
        }
        let s = &self.sandbox;
        if s.interpreter.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(invalid("sandbox.interpreter", "no program given".to_string()));
        }
        if s.timeout_ms == 0 {
            return Err(invalid("sandbox.timeout_ms", "must be positive".to_string()));
        }
        if s.max_concurrent == 0 {
            return Err(invalid("sandbox.max_concurrent", "must be at least 1".to_string()));
        }
        if s.max_code_length == 0 {
            return Err(invalid("sandbox.max_code_length", "must be positive".to_string()));
        }
        Ok(())
    }

    // Conversions into the runtime types

    pub fn sandbox_config(&self) -> SandboxConfig {
        let s = &self.sandbox;
        SandboxConfig {
            interpreter: s.interpreter.clone(),
            max_code_length: s.max_code_length,
            timeout: Duration::from_millis(s.timeout_ms),
            max_concurrent: s.max_concurrent,
            max_output_bytes: s.max_output_bytes,
            session_idle_ttl: Duration::from_secs(s.session_idle_ttl_secs),
            sweep_interval: Duration::from_secs(s.sweep_interval_secs),
            extra_denylist: s.extra_denylist.clone(),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            enable_fallback: self.router.enable_fallback,
            fallback_order: self.router.fallback_order.clone(),
            min_confidence: self.detector.min_confidence,
        }
    }

    pub fn stacking_policy(&self) -> StackingPolicy {
        self.engine.whatif_stacking
    }

    /// `None` when idle workbooks are never unloaded.
    pub fn idle_workbook_ttl(&self) -> Option<Duration> {
        match self.engine.idle_workbook_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}
