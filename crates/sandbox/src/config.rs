use std::time::Duration;

/// Limits and interpreter settings for the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Program and leading arguments. The script path is appended.
    pub interpreter: Vec<String>,
    pub max_code_length: usize,
    pub timeout: Duration,
    /// Executions allowed in flight at once. Requests beyond this fail fast.
    pub max_concurrent: usize,
    /// Per-stream cap on captured stdout/stderr.
    pub max_output_bytes: usize,
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Additional substrings refused anywhere in the source.
    pub extra_denylist: Vec<String>,
}

pub const DEFAULT_MAX_CODE_LENGTH: usize = 10_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// `python3` in isolated mode (`-I`: no user site, no env vars, no cwd on
/// `sys.path`) without the `site` module (`-S`).
pub fn default_interpreter() -> Vec<String> {
    vec!["python3".into(), "-I".into(), "-S".into()]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            max_code_length: DEFAULT_MAX_CODE_LENGTH,
            timeout: DEFAULT_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            extra_denylist: Vec::new(),
        }
    }
}
