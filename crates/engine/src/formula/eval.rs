// Formula evaluator - walks the AST against a CellLookup

use std::fmt;

use serde::{Serialize, Serializer};

use super::functions;
use super::parser::{Expr, Op, SheetRef};

/// Spreadsheet error values stored in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellError {
    Div0,
    Ref,
    Name,
    Value,
    Num,
    NA,
}

impl CellError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Div0 => "#DIV/0!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Value => "#VALUE!",
            CellError::Num => "#NUM!",
            CellError::NA => "#N/A",
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CellError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The scalar primitive for all computed cell values.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

impl Value {
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Empty => Ok(0.0),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| CellError::Value),
            Value::Error(e) => Err(*e),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => abacus_core::format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE".into() } else { "FALSE".into() },
            Value::Empty => String::new(),
            Value::Error(e) => e.as_str().to_string(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Empty => Ok(false),
            Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Value::Text(_) => Err(CellError::Value),
            Value::Error(e) => Err(*e),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        if n.is_finite() {
            Value::Number(n)
        } else {
            Value::Error(CellError::Num)
        }
    }
}

/// Result of evaluating an expression: a scalar, or a 2D block of values
/// for ranges and array functions.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Scalar(Value),
    Array(Vec<Vec<Value>>),
}

impl EvalResult {
    pub fn error(e: CellError) -> Self {
        EvalResult::Scalar(Value::Error(e))
    }

    /// Scalar view. A 1x1 array is its only element; larger arrays give the
    /// top-left value.
    pub fn to_scalar(&self) -> Value {
        match self {
            EvalResult::Scalar(v) => v.clone(),
            EvalResult::Array(rows) => rows
                .first()
                .and_then(|r| r.first())
                .cloned()
                .unwrap_or(Value::Empty),
        }
    }

    /// Scalar for operator operands: multi-cell arrays are `#VALUE!`.
    fn operand(self) -> Value {
        match self {
            EvalResult::Scalar(v) => v,
            EvalResult::Array(rows) if rows.len() == 1 && rows[0].len() == 1 => rows[0][0].clone(),
            EvalResult::Array(_) => Value::Error(CellError::Value),
        }
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            EvalResult::Scalar(v) => Box::new(std::iter::once(v)),
            EvalResult::Array(rows) => Box::new(rows.iter().flatten()),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, EvalResult::Array(_))
    }
}

/// Read access to cell values during evaluation.
///
/// Implementations return stored (already computed) values; evaluation never
/// recurses into other formulas.
pub trait CellLookup {
    /// Value at `(row, col)` on `sheet`. `None` when the sheet does not exist.
    fn value(&self, sheet: &SheetRef, row: usize, col: usize) -> Option<Value>;
}

pub fn evaluate<L: CellLookup>(expr: &Expr, lookup: &L) -> EvalResult {
    match expr {
        Expr::Number(n) => EvalResult::Scalar(Value::from(*n)),
        Expr::Text(s) => EvalResult::Scalar(Value::Text(s.clone())),
        Expr::Boolean(b) => EvalResult::Scalar(Value::Boolean(*b)),
        Expr::Empty => EvalResult::Scalar(Value::Empty),
        Expr::Name(_) => EvalResult::error(CellError::Name),
        Expr::CellRef { sheet, row, col } => EvalResult::Scalar(
            lookup.value(sheet, *row, *col).unwrap_or(Value::Error(CellError::Ref)),
        ),
        Expr::Range { sheet, start_row, start_col, end_row, end_col } => {
            let mut rows = Vec::with_capacity(end_row - start_row + 1);
            for row in *start_row..=*end_row {
                let mut values = Vec::with_capacity(end_col - start_col + 1);
                for col in *start_col..=*end_col {
                    match lookup.value(sheet, row, col) {
                        Some(v) => values.push(v),
                        None => return EvalResult::error(CellError::Ref),
                    }
                }
                rows.push(values);
            }
            EvalResult::Array(rows)
        }
        Expr::Neg(inner) => {
            let v = evaluate(inner, lookup).operand();
            EvalResult::Scalar(match v.to_number() {
                Ok(n) => Value::Number(-n),
                Err(e) => Value::Error(e),
            })
        }
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate(left, lookup).operand();
            let r = evaluate(right, lookup).operand();
            EvalResult::Scalar(binary_op(*op, &l, &r))
        }
        Expr::Function { name, args } => functions::call(name, args, lookup),
    }
}

fn binary_op(op: Op, l: &Value, r: &Value) -> Value {
    match op {
        Op::Concat => {
            if let Value::Error(e) = l {
                return Value::Error(*e);
            }
            if let Value::Error(e) = r {
                return Value::Error(*e);
            }
            Value::Text(format!("{}{}", l.to_text(), r.to_text()))
        }
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => compare(op, l, r),
        _ => {
            let (a, b) = match (l.to_number(), r.to_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            match op {
                Op::Add => Value::from(a + b),
                Op::Sub => Value::from(a - b),
                Op::Mul => Value::from(a * b),
                Op::Div if b == 0.0 => Value::Error(CellError::Div0),
                Op::Div => Value::from(a / b),
                Op::Pow if a == 0.0 && b < 0.0 => Value::Error(CellError::Div0),
                Op::Pow => Value::from(a.powf(b)),
                _ => Value::Error(CellError::Value),
            }
        }
    }
}

fn compare(op: Op, l: &Value, r: &Value) -> Value {
    use std::cmp::Ordering;

    if let Value::Error(e) = l {
        return Value::Error(*e);
    }
    if let Value::Error(e) = r {
        return Value::Error(*e);
    }

    // Numbers (and empty/booleans) compare numerically; anything involving
    // text compares case-insensitively as text.
    let ordering = match (l, r) {
        (Value::Text(_), _) | (_, Value::Text(_)) => {
            l.to_text().to_lowercase().cmp(&r.to_text().to_lowercase())
        }
        _ => {
            let a = l.to_number().unwrap_or(0.0);
            let b = r.to_number().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    };

    Value::Boolean(match op {
        Op::Lt => ordering == Ordering::Less,
        Op::Gt => ordering == Ordering::Greater,
        Op::Eq => ordering == Ordering::Equal,
        Op::LtEq => ordering != Ordering::Greater,
        Op::GtEq => ordering != Ordering::Less,
        _ => ordering != Ordering::Equal,
    })
}
