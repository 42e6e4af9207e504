use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required input field was absent.
    ParameterMissing,
    /// Malformed expression, unknown function, rejected identifier.
    EvaluationError,
    /// Mathematically invalid: division by zero, non-convergence, singular matrix.
    DomainError,
    /// Static validation refused the code; it never ran.
    SandboxRejected,
    SandboxTimeout,
    SandboxAtCapacity,
    SheetOrCellNotFound,
    WorkbookNotLoaded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParameterMissing => "parameter_missing",
            ErrorKind::EvaluationError => "evaluation_error",
            ErrorKind::DomainError => "domain_error",
            ErrorKind::SandboxRejected => "sandbox_rejected",
            ErrorKind::SandboxTimeout => "sandbox_timeout",
            ErrorKind::SandboxAtCapacity => "sandbox_at_capacity",
            ErrorKind::SheetOrCellNotFound => "sheet_or_cell_not_found",
            ErrorKind::WorkbookNotLoaded => "workbook_not_loaded",
        }
    }

    /// Whether a router may hand the query to the next engine after this failure.
    ///
    /// Rejected code is never retried. A full sandbox is retryable, so the
    /// next engine still gets a turn.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, ErrorKind::SandboxRejected)
    }

    /// Whether the same request may succeed if the caller retries later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::SandboxAtCapacity | ErrorKind::SandboxTimeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by calculation components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("missing parameter: {0}")]
    ParameterMissing(String),

    #[error("{0}")]
    Evaluation(String),

    #[error("{0}")]
    Domain(String),

    #[error("code rejected: {0}")]
    SandboxRejected(String),

    #[error("execution timed out after {timeout_ms} ms")]
    SandboxTimeout { timeout_ms: u64, partial_stdout: String },

    #[error("sandbox at capacity ({limit} executions in flight), retry later")]
    SandboxAtCapacity { limit: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no workbook loaded for document '{0}'")]
    WorkbookNotLoaded(String),
}

impl CalcError {
    pub fn missing(field: impl Into<String>) -> Self {
        CalcError::ParameterMissing(field.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        CalcError::Evaluation(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        CalcError::Domain(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CalcError::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::ParameterMissing(_) => ErrorKind::ParameterMissing,
            CalcError::Evaluation(_) => ErrorKind::EvaluationError,
            CalcError::Domain(_) => ErrorKind::DomainError,
            CalcError::SandboxRejected(_) => ErrorKind::SandboxRejected,
            CalcError::SandboxTimeout { .. } => ErrorKind::SandboxTimeout,
            CalcError::SandboxAtCapacity { .. } => ErrorKind::SandboxAtCapacity,
            CalcError::NotFound(_) => ErrorKind::SheetOrCellNotFound,
            CalcError::WorkbookNotLoaded(_) => ErrorKind::WorkbookNotLoaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CalcError::missing("rate").kind(), ErrorKind::ParameterMissing);
        assert_eq!(CalcError::domain("x").kind(), ErrorKind::DomainError);
        assert_eq!(
            CalcError::SandboxAtCapacity { limit: 2 }.kind(),
            ErrorKind::SandboxAtCapacity
        );
    }

    #[test]
    fn test_fallback_policy() {
        assert!(ErrorKind::DomainError.allows_fallback());
        assert!(ErrorKind::ParameterMissing.allows_fallback());
        assert!(!ErrorKind::SandboxRejected.allows_fallback());
        assert!(ErrorKind::SandboxAtCapacity.allows_fallback());
        assert!(ErrorKind::SandboxAtCapacity.is_retryable());
        assert!(!ErrorKind::SandboxRejected.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(CalcError::missing("nper").to_string(), "missing parameter: nper");
        let timeout = CalcError::SandboxTimeout { timeout_ms: 500, partial_stdout: "1\n".into() };
        assert_eq!(timeout.to_string(), "execution timed out after 500 ms");
    }
}
