// Built-in spreadsheet functions
//
// Financial, statistical, conversion and matrix functions delegate to
// abacus-calc so the grid and the calculator agree on every number.

use std::sync::OnceLock;

use abacus_calc::financial::{self, PaymentTiming};
use abacus_calc::{conversion, matrix, Divisor, FunctionLibrary};
use abacus_core::{CalcError, ErrorKind};

use super::eval::{evaluate, CellError, CellLookup, EvalResult, Value};
use super::parser::Expr;

type FunctionImpl = fn(&[EvalResult]) -> EvalResult;

/// Eagerly evaluated functions. IF is handled separately because only the
/// taken branch may be evaluated.
const FUNCTIONS: &[(&str, FunctionImpl)] = &[
    ("SUM", sum),
    ("AVERAGE", average),
    ("MIN", min),
    ("MAX", max),
    ("COUNT", count),
    ("MEDIAN", median),
    ("STDEV", stdev_sample),
    ("STDEV.S", stdev_sample),
    ("STDEV.P", stdev_population),
    ("VAR", var_sample),
    ("VAR.S", var_sample),
    ("VAR.P", var_population),
    ("ROUND", round),
    ("ABS", abs),
    ("SQRT", sqrt),
    ("INT", int),
    ("MOD", modulo),
    ("POWER", power),
    ("AND", and),
    ("OR", or),
    ("NOT", not),
    ("CONCAT", concat),
    ("CONCATENATE", concat),
    ("PMT", pmt),
    ("FV", fv),
    ("PV", pv),
    ("NPV", npv),
    ("IRR", irr),
    ("CONVERT", convert),
    ("MDETERM", mdeterm),
    ("MINVERSE", minverse),
    ("MMULT", mmult),
];

/// Check if a function name is a known built-in. Names are uppercase, as
/// produced by the parser.
pub fn is_known_function(name: &str) -> bool {
    name == "IF" || FUNCTIONS.iter().any(|(n, _)| *n == name)
}

pub fn function_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("IF").chain(FUNCTIONS.iter().map(|(n, _)| *n))
}

pub(crate) fn call<L: CellLookup>(name: &str, args: &[Expr], lookup: &L) -> EvalResult {
    if name == "IF" {
        return if_fn(args, lookup);
    }
    let Some(&(_, f)) = FUNCTIONS.iter().find(|(n, _)| *n == name) else {
        return EvalResult::error(CellError::Name);
    };
    let values: Vec<EvalResult> = args.iter().map(|a| evaluate(a, lookup)).collect();
    f(&values)
}

fn library() -> &'static FunctionLibrary {
    static LIBRARY: OnceLock<FunctionLibrary> = OnceLock::new();
    LIBRARY.get_or_init(FunctionLibrary::new)
}

fn num(n: f64) -> EvalResult {
    EvalResult::Scalar(Value::from(n))
}

fn fail(e: CellError) -> EvalResult {
    EvalResult::error(e)
}

fn from_calc(result: Result<f64, CalcError>, domain: CellError) -> EvalResult {
    match result {
        Ok(n) => num(n),
        Err(e) => fail(match e.kind() {
            ErrorKind::DomainError => domain,
            ErrorKind::ParameterMissing => CellError::Div0,
            _ => CellError::Value,
        }),
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

/// Numbers for aggregates. Inside ranges only numeric cells count (text,
/// booleans and blanks are skipped); direct scalar arguments are coerced.
/// The first error value wins.
fn collect_numbers(args: &[EvalResult]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            EvalResult::Array(rows) => {
                for v in rows.iter().flatten() {
                    match v {
                        Value::Number(n) => out.push(*n),
                        Value::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            EvalResult::Scalar(Value::Empty) => {}
            EvalResult::Scalar(v) => out.push(v.to_number()?),
        }
    }
    Ok(out)
}

fn scalar_number(args: &[EvalResult], idx: usize) -> Result<Option<f64>, CellError> {
    match args.get(idx).map(EvalResult::to_scalar) {
        None | Some(Value::Empty) => Ok(None),
        Some(v) => v.to_number().map(Some),
    }
}

fn required(args: &[EvalResult], idx: usize) -> Result<f64, CellError> {
    scalar_number(args, idx)?.ok_or(CellError::Value)
}

fn arity(args: &[EvalResult], min: usize, max: usize) -> Result<(), CellError> {
    if args.len() < min || args.len() > max {
        Err(CellError::Value)
    } else {
        Ok(())
    }
}

fn timing(args: &[EvalResult], idx: usize) -> Result<PaymentTiming, CellError> {
    Ok(match scalar_number(args, idx)? {
        Some(t) if t != 0.0 => PaymentTiming::Begin,
        _ => PaymentTiming::End,
    })
}

fn to_matrix(arg: &EvalResult) -> Result<Vec<Vec<f64>>, CellError> {
    let rows = match arg {
        EvalResult::Array(rows) => rows.clone(),
        EvalResult::Scalar(v) => vec![vec![v.clone()]],
    };
    rows.iter()
        .map(|r| {
            r.iter()
                .map(|v| match v {
                    Value::Number(n) => Ok(*n),
                    Value::Error(e) => Err(*e),
                    _ => Err(CellError::Value),
                })
                .collect()
        })
        .collect()
}

fn matrix_result(m: Vec<Vec<f64>>) -> EvalResult {
    EvalResult::Array(m.into_iter().map(|r| r.into_iter().map(Value::from).collect()).collect())
}

macro_rules! try_cell {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return fail(e),
        }
    };
}

// =============================================================================
// Aggregates
// =============================================================================

fn statistical(name: &str, args: &[EvalResult], divisor: Divisor, empty: EvalResult) -> EvalResult {
    let values = try_cell!(collect_numbers(args));
    if values.is_empty() {
        return empty;
    }
    let result = library().calculate_statistical(name, &values, divisor).map(|c| c.value);
    from_calc(result, CellError::Div0)
}

fn sum(args: &[EvalResult]) -> EvalResult {
    statistical("SUM", args, Divisor::Sample, num(0.0))
}

fn average(args: &[EvalResult]) -> EvalResult {
    statistical("AVERAGE", args, Divisor::Sample, fail(CellError::Div0))
}

fn min(args: &[EvalResult]) -> EvalResult {
    statistical("MIN", args, Divisor::Sample, num(0.0))
}

fn max(args: &[EvalResult]) -> EvalResult {
    statistical("MAX", args, Divisor::Sample, num(0.0))
}

fn median(args: &[EvalResult]) -> EvalResult {
    statistical("MEDIAN", args, Divisor::Sample, fail(CellError::Num))
}

fn count(args: &[EvalResult]) -> EvalResult {
    let n = args
        .iter()
        .flat_map(EvalResult::values)
        .filter(|v| matches!(v, Value::Number(_)))
        .count();
    num(n as f64)
}

fn stdev_sample(args: &[EvalResult]) -> EvalResult {
    statistical("STDEV", args, Divisor::Sample, fail(CellError::Div0))
}

fn stdev_population(args: &[EvalResult]) -> EvalResult {
    statistical("STDEV", args, Divisor::Population, fail(CellError::Div0))
}

fn var_sample(args: &[EvalResult]) -> EvalResult {
    statistical("VAR", args, Divisor::Sample, fail(CellError::Div0))
}

fn var_population(args: &[EvalResult]) -> EvalResult {
    statistical("VAR", args, Divisor::Population, fail(CellError::Div0))
}

// =============================================================================
// Math
// =============================================================================

fn round(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 2));
    let x = try_cell!(required(args, 0));
    let digits = try_cell!(scalar_number(args, 1)).unwrap_or(0.0).trunc() as i32;
    let factor = 10f64.powi(digits);
    // f64::round rounds half away from zero, matching spreadsheets
    num((x * factor).round() / factor)
}

fn abs(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    num(try_cell!(required(args, 0)).abs())
}

fn sqrt(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    let x = try_cell!(required(args, 0));
    if x < 0.0 {
        return fail(CellError::Num);
    }
    num(x.sqrt())
}

fn int(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    num(try_cell!(required(args, 0)).floor())
}

fn modulo(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 2, 2));
    let a = try_cell!(required(args, 0));
    let b = try_cell!(required(args, 1));
    if b == 0.0 {
        return fail(CellError::Div0);
    }
    // Result takes the sign of the divisor
    num(a - b * (a / b).floor())
}

fn power(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 2, 2));
    let a = try_cell!(required(args, 0));
    let b = try_cell!(required(args, 1));
    num(a.powf(b))
}

// =============================================================================
// Logical and text
// =============================================================================

fn if_fn<L: CellLookup>(args: &[Expr], lookup: &L) -> EvalResult {
    if args.is_empty() || args.len() > 3 {
        return fail(CellError::Value);
    }
    let condition = try_cell!(evaluate(&args[0], lookup).to_scalar().to_bool());
    let branch = if condition { args.get(1) } else { args.get(2) };
    match branch {
        Some(Expr::Empty) => num(0.0),
        Some(expr) => evaluate(expr, lookup),
        None => EvalResult::Scalar(Value::Boolean(condition)),
    }
}

fn logical_values(args: &[EvalResult]) -> Result<Vec<bool>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            EvalResult::Array(rows) => {
                for v in rows.iter().flatten() {
                    match v {
                        Value::Boolean(b) => out.push(*b),
                        Value::Number(n) => out.push(*n != 0.0),
                        Value::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            EvalResult::Scalar(v) => out.push(v.to_bool()?),
        }
    }
    if out.is_empty() {
        return Err(CellError::Value);
    }
    Ok(out)
}

fn and(args: &[EvalResult]) -> EvalResult {
    let values = try_cell!(logical_values(args));
    EvalResult::Scalar(Value::Boolean(values.iter().all(|b| *b)))
}

fn or(args: &[EvalResult]) -> EvalResult {
    let values = try_cell!(logical_values(args));
    EvalResult::Scalar(Value::Boolean(values.iter().any(|b| *b)))
}

fn not(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    let b = try_cell!(args[0].to_scalar().to_bool());
    EvalResult::Scalar(Value::Boolean(!b))
}

fn concat(args: &[EvalResult]) -> EvalResult {
    let mut out = String::new();
    for v in args.iter().flat_map(EvalResult::values) {
        if let Value::Error(e) = v {
            return fail(*e);
        }
        out.push_str(&v.to_text());
    }
    EvalResult::Scalar(Value::Text(out))
}

// =============================================================================
// Financial (spreadsheet sign convention)
// =============================================================================

fn pmt(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 3, 5));
    let rate = try_cell!(required(args, 0));
    let nper = try_cell!(required(args, 1));
    let pv = try_cell!(required(args, 2));
    let fv = try_cell!(scalar_number(args, 3)).unwrap_or(0.0);
    let when = try_cell!(timing(args, 4));
    from_calc(financial::pmt(rate, nper, pv, fv, when), CellError::Num)
}

fn fv(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 3, 5));
    let rate = try_cell!(required(args, 0));
    let nper = try_cell!(required(args, 1));
    let payment = try_cell!(required(args, 2));
    let pv = try_cell!(scalar_number(args, 3)).unwrap_or(0.0);
    let when = try_cell!(timing(args, 4));
    num(financial::fv(rate, nper, payment, pv, when))
}

fn pv(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 3, 5));
    let rate = try_cell!(required(args, 0));
    let nper = try_cell!(required(args, 1));
    let payment = try_cell!(required(args, 2));
    let fv = try_cell!(scalar_number(args, 3)).unwrap_or(0.0);
    let when = try_cell!(timing(args, 4));
    num(financial::pv(rate, nper, payment, fv, when))
}

fn npv(args: &[EvalResult]) -> EvalResult {
    if args.len() < 2 {
        return fail(CellError::Value);
    }
    let rate = try_cell!(required(args, 0));
    let flows = try_cell!(collect_numbers(&args[1..]));
    from_calc(financial::npv(rate, &flows), CellError::Div0)
}

fn irr(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 2));
    let flows = try_cell!(collect_numbers(&args[..1]));
    let guess = try_cell!(scalar_number(args, 1)).unwrap_or(0.1);
    from_calc(financial::irr(&flows, guess), CellError::Num)
}

// =============================================================================
// Conversion and matrix
// =============================================================================

fn convert(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 3, 3));
    let value = try_cell!(required(args, 0));
    let from = args[1].to_scalar().to_text();
    let to = args[2].to_scalar().to_text();
    match conversion::convert(value, &from, &to) {
        Ok(n) => num(n),
        Err(_) => fail(CellError::NA),
    }
}

fn mdeterm(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    let m = try_cell!(to_matrix(&args[0]));
    from_calc(matrix::determinant(&m), CellError::Value)
}

fn minverse(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 1, 1));
    let m = try_cell!(to_matrix(&args[0]));
    match matrix::inverse(&m) {
        Ok(inv) => matrix_result(inv),
        Err(e) if e.kind() == ErrorKind::DomainError && m.iter().all(|r| r.len() == m.len()) => {
            fail(CellError::Num)
        }
        Err(_) => fail(CellError::Value),
    }
}

fn mmult(args: &[EvalResult]) -> EvalResult {
    try_cell!(arity(args, 2, 2));
    let a = try_cell!(to_matrix(&args[0]));
    let b = try_cell!(to_matrix(&args[1]));
    match matrix::multiply(&a, &b) {
        Ok(m) => matrix_result(m),
        Err(_) => fail(CellError::Value),
    }
}
