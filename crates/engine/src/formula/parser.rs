// Formula parser - converts formula strings into AST
// Supports: numbers, strings, booleans, cell refs (A1), ranges (A1:B5),
// sheet-qualified refs (Sheet1!A1, 'My Sheet'!A1:B2), functions (SUM, STDEV.S),
// arithmetic (+ - * / ^), postfix %, concatenation (&), comparisons.

use std::fmt;

use crate::cell_id::{letters_to_col, CellAddress, MAX_ROWS};

/// Sheet a reference points at. Names are resolved against the workbook at
/// evaluation time, so a reference to a sheet added later starts working
/// once the sheet exists.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetRef {
    Current,
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    CellRef {
        sheet: SheetRef,
        row: usize,
        col: usize,
    },
    /// Normalized so `start_* <= end_*`.
    Range {
        sheet: SheetRef,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    /// Bare identifier that is not a function call. Evaluates to `#NAME?`.
    Name(String),
    /// Omitted argument (the trailing slot in `=IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

fn err<T>(msg: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(msg.into()))
}

/// Formula text limit after the `=`, in characters.
pub const MAX_FORMULA_LENGTH: usize = 8192;

/// Nesting limit for parentheses, function calls, unary signs and `^` chains.
pub const MAX_NESTING: usize = 64;

/// Limit on the height of the parsed tree.
pub const MAX_TREE_DEPTH: usize = 1024;

/// Cells a single range may cover: one full column.
pub const MAX_RANGE_CELLS: usize = MAX_ROWS;

/// Parse a formula. The leading `=` is required.
pub fn parse(formula: &str) -> Result<Expr, ParseError> {
    let formula = formula.trim();
    let Some(input) = formula.strip_prefix('=') else {
        return err("formula must start with =");
    };
    if input.chars().count() > MAX_FORMULA_LENGTH {
        return err(format!("formula longer than {} characters", MAX_FORMULA_LENGTH));
    }
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return err("empty formula");
    }
    let (expr, pos) = parse_comparison(&tokens, 0, 0)?;
    if pos != tokens.len() {
        return err(format!("unexpected token at position {}", pos));
    }
    if tree_depth(&expr) > MAX_TREE_DEPTH {
        return err(format!("formula has more than {} chained operations", MAX_TREE_DEPTH));
    }
    Ok(expr)
}

/// Height of the AST, walked with an explicit stack. Long operator chains
/// like `=A1+A2+...` are built by loops, not recursion, so the nesting
/// check alone does not bound them.
fn tree_depth(expr: &Expr) -> usize {
    let mut max = 0;
    let mut stack = vec![(expr, 1)];
    while let Some((expr, depth)) = stack.pop() {
        max = max.max(depth);
        match expr {
            Expr::Function { args, .. } => stack.extend(args.iter().map(|a| (a, depth + 1))),
            Expr::BinaryOp { left, right, .. } => {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
            Expr::Neg(inner) => stack.push((inner, depth + 1)),
            _ => {}
        }
    }
    max
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef { row: usize, col: usize },
    /// Sheet name prefix, e.g. "Sheet1" from "Sheet1!A1"
    SheetPrefix(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                // "" inside a string is an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return err("unterminated string literal"),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '\'' => {
                // Quoted sheet name: 'My Sheet'!A1, with '' escaping a quote
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            name.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => name.push(ch),
                        None => return err("unterminated sheet name"),
                    }
                }
                if chars.next() != Some('!') {
                    return err("quoted sheet name must be followed by !");
                }
                tokens.push(Token::SheetPrefix(name));
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                // Dotted function names (STDEV.S, VAR.P)
                while chars.peek() == Some(&'.') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if !lookahead.peek().is_some_and(|ch| ch.is_ascii_alphabetic()) {
                        break;
                    }
                    chars.next();
                    ident.push('.');
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphanumeric() {
                            ident.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }

                if chars.peek() == Some(&'!') {
                    chars.next();
                    tokens.push(Token::SheetPrefix(ident));
                    continue;
                }

                // LOG10( and ATAN2( look like cell refs; a call wins
                let is_call = chars.peek() == Some(&'(');
                if let Some(address) = try_parse_cell_ref(&ident).filter(|_| !is_call) {
                    tokens.push(Token::CellRef { row: address.row, col: address.col });
                } else if ident.contains('$') {
                    return err(format!("invalid cell reference: {}", ident));
                } else {
                    tokens.push(Token::Ident(ident.to_ascii_uppercase()));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Scientific notation: 1.5E3, 2e-4
                if matches!(chars.peek(), Some('e' | 'E')) {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let signed = matches!(lookahead.peek(), Some('+' | '-'));
                    if signed {
                        lookahead.next();
                    }
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        num_str.push('e');
                        chars.next();
                        if signed {
                            if let Some(sign) = chars.next() {
                                num_str.push(sign);
                            }
                        }
                        while let Some(&d) = chars.peek() {
                            if d.is_ascii_digit() {
                                num_str.push(d);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| ParseError(format!("invalid number: {}", num_str)))?;
                tokens.push(Token::Number(num));
            }
            _ => return err(format!("unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

/// Letters followed by digits, with optional `$` markers.
fn try_parse_cell_ref(s: &str) -> Option<CellAddress> {
    let cleaned: String = s.chars().filter(|&c| c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);
    if letters.len() > 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let col = letters_to_col(letters)?;
    let row: usize = digits.parse().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }
    Some(CellAddress::new(row - 1, col))
}

type Parsed = Result<(Expr, usize), ParseError>;

fn descend(depth: usize) -> Result<usize, ParseError> {
    if depth >= MAX_NESTING {
        return err(format!("formula nests deeper than {} levels", MAX_NESTING));
    }
    Ok(depth + 1)
}

fn binary(op: Op, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (mut left, mut pos) = parse_concat(tokens, pos, depth)?;

    while let Some(token) = tokens.get(pos) {
        let op = match token {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1, depth)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_concat(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (mut left, mut pos) = parse_add_sub(tokens, pos, depth)?;

    while let Some(Token::Ampersand) = tokens.get(pos) {
        let (right, new_pos) = parse_add_sub(tokens, pos + 1, depth)?;
        left = binary(Op::Concat, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (mut left, mut pos) = parse_mul_div(tokens, pos, depth)?;

    while let Some(token) = tokens.get(pos) {
        let op = match token {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1, depth)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (mut left, mut pos) = parse_power(tokens, pos, depth)?;

    while let Some(token) = tokens.get(pos) {
        let op = match token {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1, depth)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative, binds tighter than * /
fn parse_power(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (base, pos) = parse_unary(tokens, pos, depth)?;

    if let Some(Token::Caret) = tokens.get(pos) {
        let (exponent, new_pos) = parse_power(tokens, pos + 1, descend(depth)?)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

// Unary sign binds tighter than ^, so =-2^2 is 4 (spreadsheet convention)
fn parse_unary(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    match tokens.get(pos) {
        Some(Token::Minus) => {
            let (expr, pos) = parse_unary(tokens, pos + 1, descend(depth)?)?;
            Ok((Expr::Neg(Box::new(expr)), pos))
        }
        Some(Token::Plus) => parse_unary(tokens, pos + 1, descend(depth)?),
        _ => parse_percent(tokens, pos, depth),
    }
}

// Percent postfix (%) desugars to * 0.01
fn parse_percent(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let (mut expr, mut pos) = parse_primary(tokens, pos, depth)?;

    while let Some(Token::Percent) = tokens.get(pos) {
        expr = binary(Op::Mul, expr, Expr::Number(0.01));
        pos += 1;
    }

    Ok((expr, pos))
}

fn reference(sheet: SheetRef, tokens: &[Token], pos: usize) -> Parsed {
    let Some(&Token::CellRef { row, col }) = tokens.get(pos) else {
        return err("sheet reference must be followed by a cell reference");
    };
    if let (Some(Token::Colon), Some(&Token::CellRef { row: end_row, col: end_col })) =
        (tokens.get(pos + 1), tokens.get(pos + 2))
    {
        let cells = (row.abs_diff(end_row) + 1).saturating_mul(col.abs_diff(end_col) + 1);
        if cells > MAX_RANGE_CELLS {
            return err(format!("range covers {} cells, limit is {}", cells, MAX_RANGE_CELLS));
        }
        return Ok((
            Expr::Range {
                sheet,
                start_row: row.min(end_row),
                start_col: col.min(end_col),
                end_row: row.max(end_row),
                end_col: col.max(end_col),
            },
            pos + 3,
        ));
    }
    Ok((Expr::CellRef { sheet, row, col }, pos + 1))
}

fn parse_primary(tokens: &[Token], pos: usize, depth: usize) -> Parsed {
    let Some(token) = tokens.get(pos) else {
        return err("unexpected end of formula");
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::SheetPrefix(name) => reference(SheetRef::Named(name.clone()), tokens, pos + 1),
        Token::CellRef { .. } => reference(SheetRef::Current, tokens, pos),
        Token::Ident(name) => {
            if let Some(Token::LParen) = tokens.get(pos + 1) {
                let (args, new_pos) = parse_function_args(tokens, pos + 2, descend(depth)?)?;
                return Ok((Expr::Function { name: name.clone(), args }, new_pos));
            }
            match name.as_str() {
                "TRUE" => Ok((Expr::Boolean(true), pos + 1)),
                "FALSE" => Ok((Expr::Boolean(false), pos + 1)),
                _ => Ok((Expr::Name(name.clone()), pos + 1)),
            }
        }
        Token::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1, descend(depth)?)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                _ => err("missing closing parenthesis"),
            }
        }
        _ => err(format!("unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize, depth: usize) -> Result<(Vec<Expr>, usize), ParseError> {
    let mut args = Vec::new();
    let mut pos = pos;

    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        let arg = match tokens.get(pos) {
            Some(Token::Comma | Token::RParen) => Expr::Empty,
            _ => {
                let (arg, new_pos) = parse_comparison(tokens, pos, depth)?;
                pos = new_pos;
                arg
            }
        };
        args.push(arg);

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(_) => return err("expected comma or closing parenthesis"),
            None => return err("missing closing parenthesis in function call"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: usize, col: usize) -> Expr {
        Expr::CellRef { sheet: SheetRef::Current, row, col }
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let expr = parse("=1+2*3").unwrap();
        assert_eq!(
            expr,
            binary(Op::Add, Expr::Number(1.0), binary(Op::Mul, Expr::Number(2.0), Expr::Number(3.0)))
        );
    }

    #[test]
    fn test_parse_power_right_assoc() {
        let expr = parse("=2^3^2").unwrap();
        assert_eq!(
            expr,
            binary(Op::Pow, Expr::Number(2.0), binary(Op::Pow, Expr::Number(3.0), Expr::Number(2.0)))
        );
    }

    #[test]
    fn test_parse_cell_and_range() {
        assert_eq!(parse("=B3").unwrap(), cell(2, 1));
        assert_eq!(parse("=$b$3").unwrap(), cell(2, 1));
        assert_eq!(
            parse("=SUM(B5:A1)").unwrap(),
            Expr::Function {
                name: "SUM".into(),
                args: vec![Expr::Range {
                    sheet: SheetRef::Current,
                    start_row: 0,
                    start_col: 0,
                    end_row: 4,
                    end_col: 1,
                }],
            }
        );
    }

    #[test]
    fn test_parse_sheet_refs() {
        assert_eq!(
            parse("=Inputs!A1").unwrap(),
            Expr::CellRef { sheet: SheetRef::Named("Inputs".into()), row: 0, col: 0 }
        );
        assert_eq!(
            parse("='Bob''s Sheet'!C2").unwrap(),
            Expr::CellRef { sheet: SheetRef::Named("Bob's Sheet".into()), row: 1, col: 2 }
        );
        assert!(matches!(
            parse("='Q1 Data'!A1:B2").unwrap(),
            Expr::Range { sheet: SheetRef::Named(ref n), .. } if n == "Q1 Data"
        ));
    }

    #[test]
    fn test_parse_dotted_function_and_empty_args() {
        let expr = parse("=STDEV.S(A1:A3)").unwrap();
        assert!(matches!(expr, Expr::Function { ref name, .. } if name == "STDEV.S"));

        let expr = parse("=IF(A1,1,)").unwrap();
        let Expr::Function { args, .. } = expr else { panic!("expected function") };
        assert_eq!(args.len(), 3);
        assert_eq!(args[2], Expr::Empty);

        let expr = parse("=LOG10(100)").unwrap();
        assert!(matches!(expr, Expr::Function { ref name, .. } if name == "LOG10"));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("=\"say \"\"hi\"\"\"").unwrap(), Expr::Text("say \"hi\"".into()));
        assert_eq!(parse("=true").unwrap(), Expr::Boolean(true));
        assert_eq!(parse("=1.5e3").unwrap(), Expr::Number(1500.0));
        assert_eq!(parse("=50%").unwrap(), binary(Op::Mul, Expr::Number(50.0), Expr::Number(0.01)));
        assert_eq!(parse("=profit").unwrap(), Expr::Name("PROFIT".into()));
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let unary = format!("={}1", "-".repeat(200));
        assert!(parse(&unary).unwrap_err().0.contains("nests deeper"));
        let parens = format!("={}1{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&parens).unwrap_err().0.contains("nests deeper"));
        let powers = format!("=2{}", "^2".repeat(100));
        assert!(parse(&powers).is_err());
        let calls = format!("={}1{}", "ABS(".repeat(100), ")".repeat(100));
        assert!(parse(&calls).is_err());

        // Huge inputs stop at the length check before any recursion
        assert!(parse(&format!("={}1", "-".repeat(200_000))).unwrap_err().0.contains("longer than"));
        let huge = format!("={}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(parse(&huge).is_err());

        // Modest nesting still parses
        assert!(parse(&format!("={}1", "-".repeat(10))).is_ok());
        assert!(parse(&format!("={}1{}", "(".repeat(30), ")".repeat(30))).is_ok());
        assert!(parse("=IF(A1>0,ROUND(SUM(A1:A3)/COUNT(A1:A3),2),-(B1^2))").is_ok());
    }

    #[test]
    fn test_parse_long_operator_chain() {
        let ok = format!("=1{}", "+1".repeat(500));
        assert!(parse(&ok).is_ok());
        let too_tall = format!("=1{}", "+1".repeat(2000));
        assert!(parse(&too_tall).unwrap_err().0.contains("chained operations"));
    }

    #[test]
    fn test_parse_range_cell_budget() {
        assert!(parse("=SUM(A1:A1048576)").is_ok());
        let err = parse("=SUM(A1:XFD1048576)").unwrap_err();
        assert!(err.0.contains("range covers"), "{}", err);
        assert!(parse("=SUM(A1:B1048576)").is_err());
        assert!(parse("=Other!A1:XFD1048576").is_err());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["1+2", "=", "=(1+2", "=1+", "=SUM(1,2", "=\"open", "=A1 B1", "=#"] {
            assert!(parse(bad).is_err(), "{bad} should not parse");
        }
    }
}
