use crate::formula::eval::Value;
use crate::formula::parser::{self, Expr, ParseError};

/// What the user typed into a cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellInput {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// `source` keeps the text exactly as entered (with its leading `=`).
    Formula { source: String, ast: Expr },
}

impl CellInput {
    /// Interpret raw input the way a spreadsheet entry box does: a leading
    /// `=` is a formula, numeric text is a number, `TRUE`/`FALSE` are
    /// booleans, anything else is text.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Ok(CellInput::Empty);
        }

        if trimmed.starts_with('=') {
            let ast = parser::parse(trimmed)?;
            return Ok(CellInput::Formula { source: trimmed.to_string(), ast });
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return Ok(CellInput::Number(num));
            }
        }

        if trimmed.eq_ignore_ascii_case("TRUE") {
            return Ok(CellInput::Boolean(true));
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return Ok(CellInput::Boolean(false));
        }

        Ok(CellInput::Text(trimmed.to_string()))
    }

    pub fn formula(&self) -> Option<&str> {
        match self {
            CellInput::Formula { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn ast(&self) -> Option<&Expr> {
        match self {
            CellInput::Formula { ast, .. } => Some(ast),
            _ => None,
        }
    }

    /// The stored value of a literal. Formulas have no literal value.
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            CellInput::Empty => Some(Value::Empty),
            CellInput::Number(n) => Some(Value::Number(*n)),
            CellInput::Text(s) => Some(Value::Text(s.clone())),
            CellInput::Boolean(b) => Some(Value::Boolean(*b)),
            CellInput::Formula { .. } => None,
        }
    }

    /// Text that re-creates this input through `parse`.
    pub fn raw(&self) -> String {
        match self {
            CellInput::Empty => String::new(),
            CellInput::Number(n) => abacus_core::format_number(*n),
            CellInput::Text(s) => s.clone(),
            CellInput::Boolean(b) => if *b { "TRUE".into() } else { "FALSE".into() },
            CellInput::Formula { source, .. } => source.clone(),
        }
    }
}

impl From<f64> for CellInput {
    fn from(n: f64) -> Self {
        CellInput::Number(n)
    }
}

impl From<bool> for CellInput {
    fn from(b: bool) -> Self {
        CellInput::Boolean(b)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub input: CellInput,
    /// Computed value. Always current: writes recompute it before returning.
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_kinds() {
        assert_eq!(CellInput::parse("  ").unwrap(), CellInput::Empty);
        assert_eq!(CellInput::parse("42.5").unwrap(), CellInput::Number(42.5));
        assert_eq!(CellInput::parse("true").unwrap(), CellInput::Boolean(true));
        assert_eq!(CellInput::parse("Revenue").unwrap(), CellInput::Text("Revenue".into()));
        assert_eq!(CellInput::parse("NaN").unwrap(), CellInput::Text("NaN".into()));

        let formula = CellInput::parse("=A1*2").unwrap();
        assert_eq!(formula.formula(), Some("=A1*2"));
        assert!(formula.literal_value().is_none());
    }

    #[test]
    fn test_bad_formula_is_an_error() {
        assert!(CellInput::parse("=SUM(A1").is_err());
    }

    #[test]
    fn test_raw_round_trips() {
        for text in ["", "12", "0.25", "TRUE", "hello", "=A1+B1"] {
            let input = CellInput::parse(text).unwrap();
            assert_eq!(CellInput::parse(&input.raw()).unwrap(), input);
        }
    }
}
