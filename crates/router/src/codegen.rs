use serde::{Deserialize, Serialize};

use abacus_core::CalcError;

/// Code produced for a natural-language query. Its stdout is the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl GeneratedCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into(), explanation: None }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

/// External producer of sandbox code. The router treats the output as
/// opaque text.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, query: &str) -> Result<GeneratedCode, CalcError>;
}

/// Always hands back the same code. Handy for hosts that take code from a
/// file and for tests.
#[derive(Debug, Clone)]
pub struct StaticCodeGenerator(pub GeneratedCode);

impl CodeGenerator for StaticCodeGenerator {
    fn generate(&self, _query: &str) -> Result<GeneratedCode, CalcError> {
        Ok(self.0.clone())
    }
}
