//! Adapters that put each backend behind [`CalculationEngine`].

use std::sync::{Arc, Mutex};

use abacus_calc::{conversion, problems, Divisor, FinancialParams, FunctionLibrary, PeriodBasis, Tier};
use abacus_core::{format_currency, format_number, format_percent, CalcError, CalculationResult, Method, ResultValue};
use abacus_engine::{CellError, EvalResult, Value, Workbook, WorkbookRegistry};
use abacus_intent::{DetectionResult, Parameters};
use abacus_sandbox::Executor;

use crate::codegen::{CodeGenerator, GeneratedCode};
use crate::context::CalculationContext;

/// Sheet used for scratch workbooks built from inline grid data.
pub const SCRATCH_SHEET: &str = "Sheet1";

/// Everything an engine may look at for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub query: &'a str,
    pub detection: &'a DetectionResult,
    pub context: Option<&'a CalculationContext>,
    pub generated_code: Option<&'a GeneratedCode>,
}

impl<'a> EngineRequest<'a> {
    pub fn new(query: &'a str, detection: &'a DetectionResult) -> Self {
        Self { query, detection, context: None, generated_code: None }
    }

    fn params(&self) -> &'a Parameters {
        &self.detection.parameters
    }
}

/// A computation backend the router can dispatch to.
///
/// Implementations return `Err` for every failure; the router decides
/// whether another engine gets a turn.
pub trait CalculationEngine: Send + Sync {
    fn kind(&self) -> Method;

    fn execute(&self, request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError>;
}

// =============================================================================
// Evaluator
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluatorEngine;

impl CalculationEngine for EvaluatorEngine {
    fn kind(&self) -> Method {
        Method::Evaluator
    }

    fn execute(&self, request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        let expr = request.detection.normalized_expression.trim();
        let expr = expr.strip_prefix('=').unwrap_or(expr);
        let value = abacus_calc::evaluate(expr)?;
        let result = CalculationResult::success(value, Method::Evaluator);
        let step = format!("{} = {}", expr, result.formatted);
        Ok(result.with_step(step))
    }
}

// =============================================================================
// Function library
// =============================================================================

/// Financial and statistical functions, plus the closed-form solvers for
/// unit conversion, ratios and percentage word problems.
#[derive(Default)]
pub struct FunctionLibraryEngine {
    library: FunctionLibrary,
}

impl FunctionLibraryEngine {
    pub fn new() -> Self {
        Self { library: FunctionLibrary::new() }
    }

    pub fn with_library(library: FunctionLibrary) -> Self {
        Self { library }
    }

    fn convert(&self, value: f64, from: &str, to: &str) -> Result<CalculationResult, CalcError> {
        let converted = conversion::convert(value, from, to)?;
        let formatted = format!("{} {}", format_number(converted), to);
        let step = format!("{} {} = {}", format_number(value), from, formatted);
        Ok(CalculationResult::success(converted, Method::FunctionLibrary)
            .with_formatted(formatted)
            .with_step(step))
    }

    fn ratio(&self, p: &Parameters, r1: f64, r2: f64) -> Result<CalculationResult, CalcError> {
        let known = p.known_value.ok_or_else(|| CalcError::missing("knownValue"))?;
        let first_known = p.is_first_known.unwrap_or(true);
        let value = problems::solve_ratio(r1, r2, known, first_known)?;
        let step = format!(
            "{}:{} with {} known = {} → {}",
            format_number(r1),
            format_number(r2),
            if first_known { "first" } else { "second" },
            format_number(known),
            format_number(value)
        );
        Ok(CalculationResult::success(value, Method::FunctionLibrary).with_step(step))
    }

    fn word_problem(&self, p: &Parameters, kind: &str) -> Result<CalculationResult, CalcError> {
        let percent = p.percentage.ok_or_else(|| CalcError::missing("percentage"))?;
        let amount = p.value.ok_or_else(|| CalcError::missing("value"))?;
        let value = problems::apply_percentage(kind, percent, amount)?;
        let step = format!("{} of {}% on {}", kind, format_number(percent), format_currency(amount));
        Ok(CalculationResult::success(value, Method::FunctionLibrary)
            .with_formatted(format_currency(value))
            .with_step(step))
    }

    fn financial(&self, name: &str, p: &Parameters) -> Result<CalculationResult, CalcError> {
        let computed = self.library.calculate_financial(name, &financial_params(p))?;
        let formatted = match name {
            "IRR" | "CAGR" => format_percent(computed.value),
            "NPER" => format_number(computed.value),
            _ => format_currency(computed.value),
        };
        Ok(CalculationResult::success(computed.value, Method::FunctionLibrary)
            .with_formatted(formatted)
            .with_step(tier_step(name, computed.tier)))
    }

    fn statistical(&self, name: &str, p: &Parameters) -> Result<CalculationResult, CalcError> {
        let divisor = if p.population == Some(true) {
            Divisor::Population
        } else {
            Divisor::Sample
        };
        let values = p.values.as_deref().unwrap_or(&[]);
        let computed = self.library.calculate_statistical(name, values, divisor)?;
        Ok(CalculationResult::success(computed.value, Method::FunctionLibrary)
            .with_step(format!("{} of {} values", name, values.len()))
            .with_step(tier_step(name, computed.tier)))
    }
}

impl CalculationEngine for FunctionLibraryEngine {
    fn kind(&self) -> Method {
        Method::FunctionLibrary
    }

    fn execute(&self, request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        let p = request.params();

        if let (Some(value), Some(from), Some(to)) = (p.value, p.from_unit.as_deref(), p.to_unit.as_deref()) {
            return self.convert(value, from, to);
        }
        if let (Some(r1), Some(r2)) = (p.ratio1, p.ratio2) {
            return self.ratio(p, r1, r2);
        }
        if let Some(kind) = p.word_problem.as_deref() {
            return self.word_problem(p, kind);
        }

        let name = p
            .function
            .as_deref()
            .ok_or_else(|| CalcError::missing("function"))?
            .to_ascii_uppercase();
        if self.library.financial_names().iter().any(|n| *n == name) {
            self.financial(&name, p)
        } else {
            self.statistical(&name, p)
        }
    }
}

fn financial_params(p: &Parameters) -> FinancialParams {
    FinancialParams {
        rate: p.rate,
        nper: p.nper,
        pv: p.pv,
        fv: p.fv,
        pmt: p.pmt,
        cash_flows: p.cash_flows.clone(),
        years: p.years,
        start_value: p.start_value,
        end_value: p.end_value,
        basis: if p.monthly_periods == Some(true) {
            PeriodBasis::Monthly
        } else {
            PeriodBasis::PerPeriod
        },
        ..FinancialParams::default()
    }
}

fn tier_step(name: &str, tier: Tier) -> String {
    match tier {
        Tier::Primary => format!("{} (primary implementation)", name),
        Tier::Fallback => format!("{} (fallback implementation)", name),
    }
}

// =============================================================================
// Spreadsheet
// =============================================================================

/// Evaluates formulas against a loaded document, or against a scratch
/// workbook built from the context's inline grid data.
pub struct SpreadsheetEngineAdapter {
    registry: Arc<Mutex<WorkbookRegistry>>,
}

impl SpreadsheetEngineAdapter {
    pub fn new(registry: Arc<Mutex<WorkbookRegistry>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Mutex<WorkbookRegistry>> {
        &self.registry
    }

    fn evaluate(&self, formula: &str, context: Option<&CalculationContext>) -> Result<EvalResult, CalcError> {
        let Some(ctx) = context else {
            return Ok(scratch_workbook(&CalculationContext::default())?.0.evaluate_formula(SCRATCH_SHEET, formula)?);
        };

        if let Some(doc) = ctx.document_id.as_deref() {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            if registry.contains(doc) {
                let workbook = registry.workbook(doc)?;
                let sheet = match &ctx.sheet_name {
                    Some(name) => name.clone(),
                    None => workbook
                        .sheet_names()
                        .into_iter()
                        .next()
                        .ok_or_else(|| CalcError::not_found(format!("document '{}' has no sheets", doc)))?,
                };
                return Ok(registry.evaluate_formula_in_document(doc, &sheet, formula)?);
            }
            if !ctx.has_inline_data() {
                return Err(CalcError::WorkbookNotLoaded(doc.to_string()));
            }
        }

        let (workbook, sheet) = scratch_workbook(ctx)?;
        Ok(workbook.evaluate_formula(&sheet, formula)?)
    }
}

impl CalculationEngine for SpreadsheetEngineAdapter {
    fn kind(&self) -> Method {
        Method::Spreadsheet
    }

    fn execute(&self, request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        let expr = request.detection.normalized_expression.trim();
        let formula = if expr.starts_with('=') {
            expr.to_string()
        } else {
            format!("={}", expr)
        };
        let value = eval_to_value(self.evaluate(&formula, request.context)?)?;
        let result = CalculationResult::success(value, Method::Spreadsheet);
        let step = format!("{} → {}", formula, result.formatted);
        Ok(result.with_step(step))
    }
}

/// Build a throwaway workbook from inline data, going through the same
/// sheet and cell API a loader would use.
fn scratch_workbook(ctx: &CalculationContext) -> Result<(Workbook, String), CalcError> {
    let sheet = ctx.sheet_name.clone().unwrap_or_else(|| SCRATCH_SHEET.to_string());
    let mut workbook = Workbook::new();
    match &ctx.spreadsheet_data {
        Some(rows) => {
            workbook.import_rows(&sheet, rows)?;
        }
        None => {
            workbook.add_sheet(&sheet)?;
        }
    }
    if let Some(cells) = &ctx.cell_data {
        let mut entries: Vec<(&String, &String)> = cells.iter().collect();
        entries.sort();
        for (address, raw) in entries {
            workbook.set_cell_value(&sheet, address, raw)?;
        }
    }
    Ok((workbook, sheet))
}

fn eval_to_value(result: EvalResult) -> Result<ResultValue, CalcError> {
    match result {
        EvalResult::Scalar(value) => scalar_value(value),
        EvalResult::Array(rows) if rows.len() == 1 && rows[0].len() == 1 => {
            scalar_value(rows[0][0].clone())
        }
        EvalResult::Array(rows) => {
            let matrix = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|v| match v {
                            Value::Number(n) => Ok(*n),
                            Value::Empty => Ok(0.0),
                            Value::Error(e) => Err(cell_error(*e)),
                            other => Err(CalcError::evaluation(format!(
                                "array element '{}' is not a number",
                                other.to_text()
                            ))),
                        })
                        .collect::<Result<Vec<f64>, CalcError>>()
                })
                .collect::<Result<Vec<_>, CalcError>>()?;
            Ok(ResultValue::Matrix(matrix))
        }
    }
}

fn scalar_value(value: Value) -> Result<ResultValue, CalcError> {
    match value {
        Value::Number(n) => Ok(ResultValue::Number(n)),
        Value::Empty => Ok(ResultValue::Number(0.0)),
        Value::Text(s) => Ok(ResultValue::Text(s)),
        Value::Boolean(b) => Ok(ResultValue::Text(if b { "TRUE" } else { "FALSE" }.to_string())),
        Value::Error(e) => Err(cell_error(e)),
    }
}

fn cell_error(e: CellError) -> CalcError {
    let message = format!("formula evaluated to {}", e);
    match e {
        CellError::Div0 | CellError::Num => CalcError::domain(message),
        CellError::Ref => CalcError::not_found(message),
        CellError::Name | CellError::Value | CellError::NA => CalcError::evaluation(message),
    }
}

// =============================================================================
// Sandbox
// =============================================================================

/// Runs generated code. The code comes from the request, or else from the
/// configured [`CodeGenerator`].
pub struct SandboxEngine {
    executor: Arc<Executor>,
    generator: Option<Arc<dyn CodeGenerator>>,
}

impl SandboxEngine {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor, generator: None }
    }

    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }
}

impl CalculationEngine for SandboxEngine {
    fn kind(&self) -> Method {
        Method::Sandbox
    }

    fn execute(&self, request: &EngineRequest<'_>) -> Result<CalculationResult, CalcError> {
        let generated = match (request.generated_code, &self.generator) {
            (Some(code), _) => code.clone(),
            (None, Some(generator)) => generator.generate(request.query)?,
            (None, None) => return Err(CalcError::missing("generatedCode")),
        };

        let stdout = self.executor.execute(&generated.code)?;
        let answer = stdout.trim();
        if answer.is_empty() {
            return Err(CalcError::evaluation("generated code printed nothing"));
        }

        let value = answer
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(ResultValue::Number)
            .unwrap_or_else(|| ResultValue::Text(answer.to_string()));
        let mut result = CalculationResult::success(value, Method::Sandbox).with_formatted(answer);
        if let Some(explanation) = generated.explanation {
            result = result.with_step(explanation);
        }
        Ok(result)
    }
}
