// End-to-end routing: detection, engine selection and fallback.
// Run with: cargo test -p abacus-router --test routing

use std::sync::{Arc, Mutex};

use abacus_core::{CalcError, CalculationResult, ErrorKind, IntentType, Method};
use abacus_engine::WorkbookRegistry;
use abacus_router::{
    CalculateOptions, CalculationContext, CalculationEngine, EngineRequest, FunctionLibraryEngine,
    GeneratedCode, Router, SandboxEngine, SpreadsheetEngineAdapter, StaticCodeGenerator,
};
use abacus_sandbox::{Executor, SandboxConfig};

fn registry() -> Arc<Mutex<WorkbookRegistry>> {
    Arc::new(Mutex::new(WorkbookRegistry::new()))
}

fn router() -> Router {
    Router::builder()
        .standard_engines(registry(), Arc::new(Executor::new(SandboxConfig::default())))
        .build()
}

fn calc(query: &str) -> CalculationResult {
    router().calculate(query, &CalculateOptions::default())
}

#[test]
fn test_simple_math_goes_to_evaluator() {
    let r = calc("(25+75)*2");
    assert!(r.success);
    assert_eq!(r.number(), Some(200.0));
    assert_eq!(r.method, Method::Evaluator);
    assert_eq!(r.detection.unwrap().intent, IntentType::SimpleMath);
    assert!(r.execution_time_ms >= 0.0);

    assert_eq!(calc("100/4").number(), Some(25.0));
}

#[test]
fn test_percentages_agree_across_forms() {
    assert_eq!(calc("15% of $8,500").number(), Some(1275.0));
    assert_eq!(calc("15% of 8500").number(), Some(1275.0));
}

#[test]
fn test_not_a_calculation_is_not_a_failure() {
    let r = calc("Create a report summarizing Q3 revenue");
    assert!(r.is_not_calculation());
    assert_eq!(r.method, Method::None);
    assert!(r.error.is_none());
    assert_eq!(r.detection.unwrap().intent, IntentType::None);
}

#[test]
fn test_financial_queries() {
    let r = calc("What is the monthly payment on a $200,000 mortgage at 5% interest for 30 years?");
    assert!(r.success, "{:?}", r.error);
    assert_eq!(r.method, Method::FunctionLibrary);
    assert!((r.number().unwrap() - 1073.64).abs() < 0.01);

    let r = calc("Calculate IRR for cash flows: -100000, 30000, 40000, 50000, 60000");
    assert!((r.number().unwrap() - 0.2489).abs() < 0.001);
}

#[test]
fn test_statistical_queries() {
    let r = calc("average of 10, 20, 30, 40, 50");
    assert_eq!(r.method, Method::FunctionLibrary);
    assert_eq!(r.number(), Some(30.0));
    assert_eq!(calc("median of 10, 20, 30, 40, 50").number(), Some(30.0));
    assert_eq!(calc("sum of 10, 20, 30, 40, 50").number(), Some(150.0));
}

#[test]
fn test_formula_against_inline_data() {
    let ctx = CalculationContext {
        spreadsheet_data: Some(vec![vec!["1".into()], vec!["2".into()], vec!["3".into()]]),
        ..CalculationContext::default()
    };
    let r = router().calculate("=SUM(A1:A3)", &CalculateOptions::default().with_context(ctx));
    assert_eq!(r.method, Method::Spreadsheet);
    assert_eq!(r.number(), Some(6.0));
}

#[test]
fn test_formula_against_loaded_document() {
    let registry = registry();
    {
        let mut reg = registry.lock().unwrap();
        let wb = reg.workbook_mut("doc-1");
        wb.add_sheet("Revenue").unwrap();
        wb.set_cell_value("Revenue", "A1", "10").unwrap();
        wb.set_cell_value("Revenue", "A2", "=A1*3").unwrap();
    }
    let router = Router::builder()
        .engine(SpreadsheetEngineAdapter::new(Arc::clone(&registry)))
        .build();

    let opts = CalculateOptions::default().with_context(CalculationContext::for_document("doc-1"));
    let r = router.calculate("=A1+A2", &opts);
    assert_eq!(r.number(), Some(40.0));

    // Evaluation never writes to the document
    let reg = registry.lock().unwrap();
    let wb = reg.workbook("doc-1").unwrap();
    assert_eq!(wb.sheet("Revenue").unwrap().cell_count(), 2);
}

#[test]
fn test_unloaded_document() {
    let opts = CalculateOptions::default()
        .with_context(CalculationContext::for_document("missing"))
        .without_fallback();
    let r = router().calculate("=A1*2", &opts);
    assert!(!r.success);
    assert_eq!(r.error_kind, Some(ErrorKind::WorkbookNotLoaded));
    assert!(!r.is_not_calculation());
}

#[test]
fn test_unit_conversion_falls_back_without_code() {
    let r = calc("Convert 10 km to miles");
    assert!(r.success);
    assert_eq!(r.method, Method::FunctionLibrary);
    assert!((r.number().unwrap() - 6.2137).abs() < 1e-3);
    assert!(r.steps[0].starts_with("sandbox failed"));
}

#[test]
fn test_fallback_can_be_disabled() {
    let r = router().calculate("Convert 10 km to miles", &CalculateOptions::default().without_fallback());
    assert!(!r.success);
    assert_eq!(r.method, Method::Sandbox);
    assert_eq!(r.error_kind, Some(ErrorKind::ParameterMissing));
}

#[test]
fn test_rejected_code_is_terminal() {
    let opts = CalculateOptions::default().with_code("import os\nprint(os.getcwd())");
    let r = router().calculate("Convert 10 km to miles", &opts);
    assert!(!r.success);
    assert_eq!(r.error_kind, Some(ErrorKind::SandboxRejected));
    let error = r.error.unwrap();
    assert!(error.starts_with("sandbox:"));
    assert!(!error.contains("function_library"));
}

struct BusySandbox;

impl CalculationEngine for BusySandbox {
    fn kind(&self) -> Method {
        Method::Sandbox
    }

    fn execute(&self, _request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        Err(CalcError::SandboxAtCapacity { limit: 1 })
    }
}

#[test]
fn test_busy_sandbox_falls_through() {
    let router = Router::builder()
        .engine(BusySandbox)
        .engine(FunctionLibraryEngine::new())
        .build();
    let opts = CalculateOptions::default().with_code("print(10 * 0.621371)");
    let r = router.calculate("Convert 10 km to miles", &opts);
    assert!(r.success, "{:?}", r.error);
    assert_eq!(r.method, Method::FunctionLibrary);
    assert!((r.number().unwrap() - 6.21371).abs() < 1e-3);
    assert!(r.steps[0].starts_with("sandbox failed"));

    // Alone, the busy sandbox is reported with its retryable kind
    let router = Router::builder().engine(BusySandbox).build();
    let r = router.calculate("Convert 10 km to miles", &opts);
    assert_eq!(r.error_kind, Some(ErrorKind::SandboxAtCapacity));
}

#[test]
fn test_all_engines_failing_aggregates() {
    let r = calc("10/0");
    assert!(!r.success);
    assert_eq!(r.method, Method::Evaluator);
    assert_eq!(r.error_kind, Some(ErrorKind::DomainError));
    let error = r.error.unwrap();
    for method in ["evaluator:", "function_library:", "spreadsheet:", "sandbox:"] {
        assert!(error.contains(method), "{} missing from {}", method, error);
    }
}

#[test]
fn test_oversized_formulas_fail_cleanly() {
    let queries = [
        format!("={}1", "-".repeat(200_000)),
        format!("={}1{}", "(".repeat(100_000), ")".repeat(100_000)),
        "=SUM(A1:XFD1048576)".to_string(),
    ];
    for query in &queries {
        let r = calc(query);
        assert!(!r.success);
        assert!(r.error.unwrap().contains("spreadsheet:"));
    }
}

#[test]
fn test_low_confidence_is_not_a_calculation() {
    let router = Router::builder()
        .standard_engines(registry(), Arc::new(Executor::new(SandboxConfig::default())))
        .min_confidence(0.8)
        .build();
    let r = router.calculate("run a regression on sales and advertising", &CalculateOptions::default());
    assert!(r.is_not_calculation());
    assert_eq!(r.detection.unwrap().confidence, 0.75);
}

struct NanEngine;

impl CalculationEngine for NanEngine {
    fn kind(&self) -> Method {
        Method::Evaluator
    }

    fn execute(&self, _request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        Ok(CalculationResult::success(f64::NAN, Method::Evaluator))
    }
}

#[test]
fn test_non_finite_result_triggers_fallback() {
    let router = Router::builder()
        .engine(NanEngine)
        .engine(SpreadsheetEngineAdapter::new(registry()))
        .fallback_order(vec![Method::Evaluator, Method::Spreadsheet])
        .build();
    let r = router.calculate("(25+75)*2", &CalculateOptions::default());
    assert!(r.success);
    assert_eq!(r.method, Method::Spreadsheet);
    assert_eq!(r.number(), Some(200.0));
    assert!(r.steps[0].contains("not a finite number"));
}

#[cfg(unix)]
#[test]
fn test_sandbox_answer_from_generator() {
    let executor = Arc::new(Executor::new(SandboxConfig {
        interpreter: vec!["sh".into()],
        ..SandboxConfig::default()
    }));
    let generator = StaticCodeGenerator(GeneratedCode::new("echo 42").with_explanation("prints the answer"));
    let router = Router::builder()
        .standard_engines(registry(), Arc::clone(&executor))
        .engine(SandboxEngine::new(executor).with_generator(Arc::new(generator)))
        .build();

    let r = router.calculate("run a regression on sales and advertising", &CalculateOptions::default());
    assert!(r.success, "{:?}", r.error);
    assert_eq!(r.method, Method::Sandbox);
    assert_eq!(r.number(), Some(42.0));
    assert_eq!(r.formatted, "42");
    assert_eq!(r.steps, vec!["prints the answer".to_string()]);

    // Per-call code wins over the generator
    let r = router.calculate(
        "run a regression on sales and advertising",
        &CalculateOptions::default().with_code("echo 'slope 1.5'"),
    );
    assert_eq!(r.formatted, "slope 1.5");
}
