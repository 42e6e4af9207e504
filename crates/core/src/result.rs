//! The uniform result shape returned by every engine.

use serde::{Deserialize, Serialize};

use crate::error::{CalcError, ErrorKind};
use crate::format::format_number;
use crate::intent::IntentType;

/// A computed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Number(f64),
    Text(String),
    Matrix(Vec<Vec<f64>>),
}

impl ResultValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ResultValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// True unless the value contains NaN or an infinity.
    pub fn is_finite(&self) -> bool {
        match self {
            ResultValue::Number(n) => n.is_finite(),
            ResultValue::Text(_) => true,
            ResultValue::Matrix(rows) => rows.iter().flatten().all(|v| v.is_finite()),
        }
    }

    pub fn display(&self) -> String {
        match self {
            ResultValue::Number(n) => format_number(*n),
            ResultValue::Text(s) => s.clone(),
            ResultValue::Matrix(rows) => rows
                .iter()
                .map(|row| {
                    let cells: Vec<String> = row.iter().map(|v| format_number(*v)).collect();
                    format!("[{}]", cells.join(", "))
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<f64> for ResultValue {
    fn from(n: f64) -> Self {
        ResultValue::Number(n)
    }
}

impl From<String> for ResultValue {
    fn from(s: String) -> Self {
        ResultValue::Text(s)
    }
}

/// Which engine produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Evaluator,
    FunctionLibrary,
    Spreadsheet,
    Sandbox,
    /// No engine ran: the query was not a calculation.
    None,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Evaluator => "evaluator",
            Method::FunctionLibrary => "function_library",
            Method::Spreadsheet => "spreadsheet",
            Method::Sandbox => "sandbox",
            Method::None => "none",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector verdict attached to a routed result for threshold tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    #[serde(rename = "type")]
    pub intent: IntentType,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultValue>,
    pub formatted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: f64,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionSummary>,
}

impl CalculationResult {
    pub fn success(value: impl Into<ResultValue>, method: Method) -> Self {
        let value = value.into();
        Self {
            success: true,
            formatted: value.display(),
            result: Some(value),
            error: None,
            error_kind: None,
            execution_time_ms: 0.0,
            method,
            steps: Vec::new(),
            detection: None,
        }
    }

    pub fn failure(err: &CalcError, method: Method) -> Self {
        Self {
            success: false,
            result: None,
            formatted: String::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            execution_time_ms: 0.0,
            method,
            steps: Vec::new(),
            detection: None,
        }
    }

    /// The "not a calculation" outcome: unsuccessful, but carries no error.
    pub fn not_a_calculation() -> Self {
        Self {
            success: false,
            result: None,
            formatted: String::new(),
            error: None,
            error_kind: None,
            execution_time_ms: 0.0,
            method: Method::None,
            steps: Vec::new(),
            detection: Some(DetectionSummary { intent: IntentType::None, confidence: 1.0 }),
        }
    }

    pub fn is_not_calculation(&self) -> bool {
        !self.success && self.error.is_none() && self.method == Method::None
    }

    pub fn with_formatted(mut self, formatted: impl Into<String>) -> Self {
        self.formatted = formatted.into();
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = String>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn with_detection(mut self, intent: IntentType, confidence: f64) -> Self {
        self.detection = Some(DetectionSummary { intent, confidence });
        self
    }

    pub fn number(&self) -> Option<f64> {
        self.result.as_ref().and_then(ResultValue::as_number)
    }
}
