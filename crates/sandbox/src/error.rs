use thiserror::Error;

use abacus_core::{CalcError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    /// Static validation refused the code. It was never executed.
    #[error("code rejected: {0}")]
    Rejected(String),

    #[error("sandbox at capacity ({limit} executions in flight)")]
    AtCapacity { limit: usize },

    #[error("execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64, partial_stdout: String },

    /// The interpreter ran and exited unsuccessfully.
    #[error("execution failed (exit code {}): {stderr}", exit_label(.exit_code))]
    Failed { exit_code: Option<i32>, stderr: String },

    #[error("failed to start interpreter '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("sandbox I/O error: {0}")]
    Io(String),

    #[error("unknown sandbox session: {0}")]
    SessionNotFound(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::Rejected(_) => ErrorKind::SandboxRejected,
            SandboxError::AtCapacity { .. } => ErrorKind::SandboxAtCapacity,
            SandboxError::Timeout { .. } => ErrorKind::SandboxTimeout,
            SandboxError::Failed { .. }
            | SandboxError::Spawn { .. }
            | SandboxError::Io(_)
            | SandboxError::SessionNotFound(_) => ErrorKind::EvaluationError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::Io(err.to_string())
    }
}

impl From<SandboxError> for CalcError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Rejected(reason) => CalcError::SandboxRejected(reason),
            SandboxError::AtCapacity { limit } => CalcError::SandboxAtCapacity { limit },
            SandboxError::Timeout { timeout_ms, partial_stdout } => {
                CalcError::SandboxTimeout { timeout_ms, partial_stdout }
            }
            other => CalcError::evaluation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_survive_conversion() {
        let cases = [
            SandboxError::Rejected("import os".into()),
            SandboxError::AtCapacity { limit: 4 },
            SandboxError::Timeout { timeout_ms: 10, partial_stdout: "1\n".into() },
            SandboxError::Failed { exit_code: Some(1), stderr: "Traceback".into() },
        ];
        for err in cases {
            let kind = err.kind();
            assert_eq!(CalcError::from(err).kind(), kind);
        }
    }

    #[test]
    fn test_failed_message() {
        let err = SandboxError::Failed { exit_code: None, stderr: "killed".into() };
        assert_eq!(err.to_string(), "execution failed (exit code none): killed");
    }
}
