//! Detection → engine selection → ordered fallback.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use abacus_core::{CalcError, CalculationResult, DetectionSummary, IntentType, Method, ResultValue};
use abacus_engine::WorkbookRegistry;
use abacus_intent::{detect, DetectionResult};
use abacus_sandbox::Executor;

use crate::context::CalculateOptions;
use crate::engines::{
    CalculationEngine, EngineRequest, EvaluatorEngine, FunctionLibraryEngine, SandboxEngine,
    SpreadsheetEngineAdapter,
};

pub const DEFAULT_FALLBACK_ORDER: [Method; 4] = [
    Method::Evaluator,
    Method::FunctionLibrary,
    Method::Spreadsheet,
    Method::Sandbox,
];

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub enable_fallback: bool,
    /// Order in which the remaining engines are tried after the primary fails.
    pub fallback_order: Vec<Method>,
    /// Detections below this confidence are answered as "not a calculation".
    pub min_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            fallback_order: DEFAULT_FALLBACK_ORDER.to_vec(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// The engine a detected intent goes to first. `None` for non-calculations.
pub fn primary_engine(intent: IntentType) -> Option<Method> {
    match intent {
        IntentType::SimpleMath => Some(Method::Evaluator),
        IntentType::Financial | IntentType::Statistical => Some(Method::FunctionLibrary),
        IntentType::SpreadsheetFormula => Some(Method::Spreadsheet),
        IntentType::Complex => Some(Method::Sandbox),
        IntentType::None => None,
    }
}

pub struct Router {
    engines: Vec<Box<dyn CalculationEngine>>,
    config: RouterConfig,
}

#[derive(Default)]
pub struct RouterBuilder {
    engines: Vec<Box<dyn CalculationEngine>>,
    config: RouterConfig,
}

impl RouterBuilder {
    /// Register an engine, replacing any earlier engine of the same kind.
    pub fn engine(mut self, engine: impl CalculationEngine + 'static) -> Self {
        let kind = engine.kind();
        self.engines.retain(|e| e.kind() != kind);
        self.engines.push(Box::new(engine));
        self
    }

    /// All four built-in engines. The sandbox engine has no code generator;
    /// register a configured [`SandboxEngine`] afterwards to add one.
    pub fn standard_engines(self, registry: Arc<Mutex<WorkbookRegistry>>, executor: Arc<Executor>) -> Self {
        self.engine(EvaluatorEngine)
            .engine(FunctionLibraryEngine::new())
            .engine(SpreadsheetEngineAdapter::new(registry))
            .engine(SandboxEngine::new(executor))
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.config.enable_fallback = enabled;
        self
    }

    pub fn fallback_order(mut self, order: Vec<Method>) -> Self {
        self.config.fallback_order = order;
        self
    }

    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.config.min_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> Router {
        Router { engines: self.engines, config: self.config }
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn engine_kinds(&self) -> Vec<Method> {
        self.engines.iter().map(|e| e.kind()).collect()
    }

    /// Classify and compute. Never panics and never returns an error:
    /// failures and non-calculations are both results.
    pub fn calculate(&self, query: &str, options: &CalculateOptions) -> CalculationResult {
        let start = Instant::now();
        let detection = detect(query);
        let mut result = self.route(query, &detection, options);

        result.execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        result.detection = Some(DetectionSummary {
            intent: detection.intent,
            confidence: detection.confidence,
        });
        log::info!(
            "calculate: type={} confidence={:.2} method={} success={} ({:.2} ms)",
            detection.intent,
            detection.confidence,
            result.method,
            result.success,
            result.execution_time_ms
        );
        result
    }

    /// Primary engine first, then the rest of the fallback order.
    pub fn chain(&self, primary: Method, fallback: bool) -> Vec<Method> {
        let mut chain = vec![primary];
        if fallback {
            for &method in &self.config.fallback_order {
                if method != Method::None && !chain.contains(&method) {
                    chain.push(method);
                }
            }
        }
        chain
    }

    fn engine(&self, kind: Method) -> Option<&dyn CalculationEngine> {
        self.engines.iter().find(|e| e.kind() == kind).map(|e| e.as_ref())
    }

    fn route(&self, query: &str, detection: &DetectionResult, options: &CalculateOptions) -> CalculationResult {
        let Some(primary) = primary_engine(detection.intent) else {
            return CalculationResult::not_a_calculation();
        };
        if detection.confidence < self.config.min_confidence {
            log::debug!(
                "confidence {:.2} below {:.2}, treating as not a calculation",
                detection.confidence,
                self.config.min_confidence
            );
            return CalculationResult::not_a_calculation();
        }

        let request = EngineRequest {
            query,
            detection,
            context: options.context.as_ref(),
            generated_code: options.generated_code.as_ref(),
        };
        let fallback = options.enable_fallback.unwrap_or(self.config.enable_fallback);

        let mut failures: Vec<(Method, CalcError)> = Vec::new();
        for method in self.chain(primary, fallback) {
            let attempt = match self.engine(method) {
                Some(engine) => engine.execute(&request).and_then(accept),
                None => Err(CalcError::evaluation(format!("no {} engine configured", method))),
            };
            match attempt {
                Ok(mut result) => {
                    result.method = method;
                    if !failures.is_empty() {
                        let mut steps: Vec<String> = failures
                            .iter()
                            .map(|(m, e)| format!("{} failed: {}", m, e))
                            .collect();
                        steps.append(&mut result.steps);
                        result.steps = steps;
                    }
                    return result;
                }
                Err(err) => {
                    log::debug!("{} failed: {} ({})", method, err, err.kind());
                    let terminal = !err.kind().allows_fallback();
                    failures.push((method, err));
                    if terminal {
                        break;
                    }
                }
            }
        }

        aggregate_failure(primary, failures)
    }
}

/// Treat non-finite answers as failures so the next engine gets a turn.
fn accept(result: CalculationResult) -> Result<CalculationResult, CalcError> {
    if !result.success {
        return Err(CalcError::evaluation(
            result.error.unwrap_or_else(|| "engine reported failure".to_string()),
        ));
    }
    match &result.result {
        Some(value) if !value.is_finite() => Err(CalcError::domain(format!(
            "result is not a finite number: {}",
            ResultValue::display(value)
        ))),
        _ => Ok(result),
    }
}

/// One failure listing every attempt. The kind is the primary engine's.
fn aggregate_failure(primary: Method, failures: Vec<(Method, CalcError)>) -> CalculationResult {
    let Some((_, first)) = failures.first() else {
        return CalculationResult::failure(&CalcError::evaluation("no engine attempted"), primary);
    };
    let mut result = CalculationResult::failure(first, primary);
    result.error = Some(
        failures
            .iter()
            .map(|(m, e)| format!("{}: {}", m, e))
            .collect::<Vec<_>>()
            .join("; "),
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_engines() {
        assert_eq!(primary_engine(IntentType::SimpleMath), Some(Method::Evaluator));
        assert_eq!(primary_engine(IntentType::Statistical), Some(Method::FunctionLibrary));
        assert_eq!(primary_engine(IntentType::Complex), Some(Method::Sandbox));
        assert_eq!(primary_engine(IntentType::None), None);
    }

    #[test]
    fn test_chain_order() {
        let router = Router::builder().build();
        assert_eq!(
            router.chain(Method::Spreadsheet, true),
            vec![Method::Spreadsheet, Method::Evaluator, Method::FunctionLibrary, Method::Sandbox]
        );
        assert_eq!(router.chain(Method::Sandbox, false), vec![Method::Sandbox]);

        let router = Router::builder()
            .fallback_order(vec![Method::Sandbox, Method::None, Method::Evaluator])
            .build();
        assert_eq!(
            router.chain(Method::Evaluator, true),
            vec![Method::Evaluator, Method::Sandbox]
        );
    }

    #[test]
    fn test_builder_replaces_same_kind() {
        let router = Router::builder()
            .engine(EvaluatorEngine)
            .engine(FunctionLibraryEngine::new())
            .engine(EvaluatorEngine)
            .build();
        assert_eq!(router.engine_kinds(), vec![Method::FunctionLibrary, Method::Evaluator]);
    }

    #[test]
    fn test_aggregate_failure_lists_attempts() {
        let r = aggregate_failure(
            Method::Evaluator,
            vec![
                (Method::Evaluator, CalcError::domain("division by zero")),
                (Method::Sandbox, CalcError::missing("generatedCode")),
            ],
        );
        assert!(!r.success);
        assert_eq!(r.method, Method::Evaluator);
        assert_eq!(r.error_kind, Some(abacus_core::ErrorKind::DomainError));
        assert_eq!(
            r.error.as_deref(),
            Some("evaluator: division by zero; sandbox: missing parameter: generatedCode")
        );
    }

    #[test]
    fn test_accept_rejects_non_finite() {
        let nan = CalculationResult::success(f64::NAN, Method::Evaluator);
        assert_eq!(accept(nan).unwrap_err().kind(), abacus_core::ErrorKind::DomainError);
        assert!(accept(CalculationResult::success(1.0, Method::Evaluator)).is_ok());
    }
}
