// Restricted arithmetic evaluator.
// Supports: numeric literals, + - * / ^, parentheses, unary minus,
// postfix % (percent) and binary % (modulo), and a fixed set of functions
// and constants. Any other identifier is rejected at tokenization.

use std::time::Instant;

use abacus_core::{CalcError, CalculationResult, Method};

pub const MAX_EXPRESSION_LENGTH: usize = 1_000;

const FUNCTIONS: &[(&str, usize, usize)] = &[
    // name, min args, max args
    ("abs", 1, 1),
    ("sqrt", 1, 1),
    ("round", 1, 2),
    ("floor", 1, 1),
    ("ceil", 1, 1),
    ("min", 1, usize::MAX),
    ("max", 1, usize::MAX),
    ("pow", 2, 2),
    ("ln", 1, 1),
    ("log", 1, 2),
    ("log10", 1, 1),
    ("exp", 1, 1),
];

const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    /// Whitelisted function name.
    Function(&'static str),
    Constant(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone)]
enum Node {
    Number(f64),
    Neg(Box<Node>),
    Percent(Box<Node>),
    Binary { op: Op, left: Box<Node>, right: Box<Node> },
    Call { name: &'static str, args: Vec<Node> },
}

/// Evaluate an expression and wrap the outcome in a [`CalculationResult`].
pub fn evaluate_expression(expr: &str) -> CalculationResult {
    let start = Instant::now();
    let mut result = match evaluate(expr) {
        Ok(value) => {
            let r = CalculationResult::success(value, Method::Evaluator);
            let step = format!("{} = {}", expr.trim(), r.formatted);
            r.with_step(step)
        }
        Err(e) => CalculationResult::failure(&e, Method::Evaluator),
    };
    result.execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    result
}

/// Evaluate an expression to a number.
pub fn evaluate(expr: &str) -> Result<f64, CalcError> {
    if expr.len() > MAX_EXPRESSION_LENGTH {
        return Err(CalcError::evaluation(format!(
            "expression exceeds {} characters",
            MAX_EXPRESSION_LENGTH
        )));
    }
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(CalcError::evaluation("empty expression"));
    }
    let (node, pos) = parse_add_sub(&tokens, 0)?;
    if pos != tokens.len() {
        return Err(CalcError::evaluation(format!("unexpected token at position {}", pos)));
    }
    let value = eval_node(&node)?;
    if !value.is_finite() {
        return Err(CalcError::domain("result is not a finite number"));
    }
    Ok(value)
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
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
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| CalcError::evaluation(format!("invalid number: {}", num_str)))?;
                tokens.push(Token::Number(num));
            }
            'A'..='Z' | 'a'..='z' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let lower = ident.to_ascii_lowercase();
                if let Some(&(name, _, _)) = FUNCTIONS.iter().find(|(n, _, _)| *n == lower) {
                    tokens.push(Token::Function(name));
                } else if let Some(&(_, value)) = CONSTANTS.iter().find(|(n, _)| *n == lower) {
                    tokens.push(Token::Constant(value));
                } else {
                    return Err(CalcError::evaluation(format!("identifier '{}' is not allowed", ident)));
                }
            }
            _ => return Err(CalcError::evaluation(format!("unexpected character: {}", c))),
        }
    }

    Ok(tokens)
}

fn starts_operand(token: Option<&Token>) -> bool {
    matches!(
        token,
        Some(Token::Number(_) | Token::Function(_) | Token::Constant(_) | Token::LParen)
    )
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Node::Binary { op, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    let (mut left, mut pos) = parse_unary(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            // Postfix percent was already consumed, so a % here has a right operand.
            Token::Percent => Op::Mod,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1)?;
        left = Node::Binary { op, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

// Unary minus binds looser than ^, so -2^2 = -4
fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    match tokens.get(pos) {
        Some(Token::Minus) => {
            let (inner, pos) = parse_unary(tokens, pos + 1)?;
            Ok((Node::Neg(Box::new(inner)), pos))
        }
        Some(Token::Plus) => parse_unary(tokens, pos + 1),
        _ => parse_power(tokens, pos),
    }
}

// Exponentiation (^) - right-associative
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if let Some(Token::Caret) = tokens.get(pos) {
        let (exponent, new_pos) = parse_unary(tokens, pos + 1)?;
        return Ok((
            Node::Binary { op: Op::Pow, left: Box::new(base), right: Box::new(exponent) },
            new_pos,
        ));
    }

    Ok((base, pos))
}

// Postfix percent: only when no operand follows (otherwise it is modulo)
fn parse_percent(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    let (mut node, mut pos) = parse_primary(tokens, pos)?;

    while let Some(Token::Percent) = tokens.get(pos) {
        if starts_operand(tokens.get(pos + 1)) {
            break;
        }
        node = Node::Percent(Box::new(node));
        pos += 1;
    }

    Ok((node, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Node, usize), CalcError> {
    let Some(token) = tokens.get(pos) else {
        return Err(CalcError::evaluation("unexpected end of expression"));
    };

    match token {
        Token::Number(n) => Ok((Node::Number(*n), pos + 1)),
        Token::Constant(v) => Ok((Node::Number(*v), pos + 1)),
        Token::LParen => {
            let (node, pos) = parse_add_sub(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((node, pos + 1)),
                _ => Err(CalcError::evaluation("missing closing parenthesis")),
            }
        }
        Token::Function(name) => {
            if tokens.get(pos + 1) != Some(&Token::LParen) {
                return Err(CalcError::evaluation(format!("{} must be called with parentheses", name)));
            }
            let (args, new_pos) = parse_call_args(tokens, pos + 2)?;
            let &(_, min, max) = FUNCTIONS
                .iter()
                .find(|(n, _, _)| n == name)
                .ok_or_else(|| CalcError::evaluation(format!("unknown function {}", name)))?;
            if args.len() < min || args.len() > max {
                return Err(CalcError::evaluation(format!(
                    "{} takes {} argument(s), got {}",
                    name,
                    if min == max { min.to_string() } else { format!("at least {}", min) },
                    args.len()
                )));
            }
            Ok((Node::Call { name, args }, new_pos))
        }
        _ => Err(CalcError::evaluation(format!("unexpected token at position {}", pos))),
    }
}

fn parse_call_args(tokens: &[Token], pos: usize) -> Result<(Vec<Node>, usize), CalcError> {
    let mut args = Vec::new();
    let mut pos = pos;

    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        let (arg, new_pos) = parse_add_sub(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            _ => return Err(CalcError::evaluation("expected comma or closing parenthesis")),
        }
    }
}

fn eval_node(node: &Node) -> Result<f64, CalcError> {
    match node {
        Node::Number(n) => Ok(*n),
        Node::Neg(inner) => Ok(-eval_node(inner)?),
        Node::Percent(inner) => Ok(eval_node(inner)? / 100.0),
        Node::Binary { op, left, right } => {
            let l = eval_node(left)?;
            let r = eval_node(right)?;
            match op {
                Op::Add => Ok(l + r),
                Op::Sub => Ok(l - r),
                Op::Mul => Ok(l * r),
                Op::Div => {
                    if r == 0.0 {
                        Err(CalcError::domain("division by zero"))
                    } else {
                        Ok(l / r)
                    }
                }
                Op::Mod => {
                    if r == 0.0 {
                        Err(CalcError::domain("modulo by zero"))
                    } else {
                        Ok(l % r)
                    }
                }
                Op::Pow => {
                    let v = l.powf(r);
                    if v.is_nan() {
                        Err(CalcError::domain(format!("{}^{} is undefined", l, r)))
                    } else {
                        Ok(v)
                    }
                }
            }
        }
        Node::Call { name, args } => {
            let values = args.iter().map(eval_node).collect::<Result<Vec<f64>, _>>()?;
            call_function(name, &values)
        }
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, CalcError> {
    let x = args.first().copied().unwrap_or(0.0);
    match name {
        "abs" => Ok(x.abs()),
        "sqrt" => {
            if x < 0.0 {
                Err(CalcError::domain("square root of a negative number"))
            } else {
                Ok(x.sqrt())
            }
        }
        "round" => {
            let digits = args.get(1).copied().unwrap_or(0.0).trunc() as i32;
            let factor = 10f64.powi(digits);
            Ok((x * factor).round() / factor)
        }
        "floor" => Ok(x.floor()),
        "ceil" => Ok(x.ceil()),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "pow" => Ok(x.powf(args[1])),
        "ln" | "log" | "log10" => {
            if x <= 0.0 {
                return Err(CalcError::domain(format!("{} of a non-positive number", name)));
            }
            match (name, args.get(1)) {
                ("ln", _) => Ok(x.ln()),
                ("log", Some(&base)) if base > 0.0 && base != 1.0 => Ok(x.log(base)),
                ("log", Some(_)) => Err(CalcError::domain("invalid logarithm base")),
                _ => Ok(x.log10()),
            }
        }
        "exp" => Ok(x.exp()),
        _ => Err(CalcError::evaluation(format!("unknown function {}", name))),
    }
}
