//! Restricted expression language for the `expression` validator.
//!
//! Supports literals, the single variable `field_value`, `len(...)`,
//! arithmetic, comparisons (including chained comparisons and `in`), and
//! boolean logic. Nothing else can be named or called.

use std::cmp::Ordering;

use serde_json::{Number, Value};
use thiserror::Error;

use super::validators::{truthy, value_len};

/// Name of the only variable an expression can reference.
pub const FIELD_VALUE: &str = "field_value";

/// Maximum number of tokens in an expression.
const MAX_TOKENS: usize = 256;

/// Maximum nesting depth of the parsed expression.
const MAX_DEPTH: usize = 64;

/// Expression parse or evaluation failure.
#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("expression is too long")]
    TooLong,

    #[error("expression is nested too deeply")]
    TooDeep,

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,
}

/// Parse and evaluate `source` with `field_value` bound to `field_value`.
pub fn evaluate(source: &str, field_value: &Value) -> Result<Value, ExpressionError> {
    let expr = parse(source)?;
    expr.eval(field_value)
}

/// Parse `source` into an expression tree.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Ident(name) => format!("'{name}'"),
            Token::Op(op) => format!("'{op}'"),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

/// Two-character operators must come before their one-character prefixes.
const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

struct Lexer<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.skip_whitespace() {
            if tokens.len() >= MAX_TOKENS {
                return Err(ExpressionError::TooLong);
            }

            let token = match c {
                '(' => {
                    self.cursor += 1;
                    Token::LParen
                }
                ')' => {
                    self.cursor += 1;
                    Token::RParen
                }
                '\'' | '"' => self.lex_string(c)?,
                c if c.is_ascii_digit() || c == '.' => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_ident(),
                _ => self.lex_operator(c)?,
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) -> Option<char> {
        let rest = &self.input[self.cursor..];
        let trimmed = rest.trim_start();
        self.cursor += rest.len() - trimmed.len();
        trimmed.chars().next()
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, ExpressionError> {
        let input = self.input;
        self.cursor += quote.len_utf8();
        let mut parsed = String::new();
        let mut chars = input[self.cursor..].chars();

        loop {
            let current = chars.next().ok_or(ExpressionError::UnterminatedString)?;
            self.cursor += current.len_utf8();
            match current {
                c if c == quote => break,
                '\\' => {
                    let escaped = chars.next().ok_or(ExpressionError::UnterminatedString)?;
                    self.cursor += escaped.len_utf8();
                    parsed.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c => parsed.push(c),
            }
        }

        Ok(Token::Str(parsed))
    }

    fn lex_number(&mut self) -> Result<Token, ExpressionError> {
        let start = self.cursor;
        let len = self.input[start..]
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(self.input.len() - start);
        self.cursor += len;
        let text = &self.input[start..self.cursor];

        let number = if text.contains('.') {
            text.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            text.parse::<i64>().ok().map(Number::from)
        };
        number
            .map(Token::Number)
            .ok_or_else(|| ExpressionError::InvalidNumber(text.to_string()))
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.cursor;
        let len = self.input[start..]
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(self.input.len() - start);
        self.cursor += len;
        Token::Ident(self.input[start..self.cursor].to_string())
    }

    fn lex_operator(&mut self, c: char) -> Result<Token, ExpressionError> {
        let rest = &self.input[self.cursor..];
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .ok_or(ExpressionError::UnexpectedChar(c))?;
        self.cursor += op.len();
        Ok(Token::Op(*op))
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    FieldValue,
    Len(Box<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.cursor += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep);
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") || self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= 1;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") || self.eat_op(&["&&"]).is_some() {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_keyword("not") || self.eat_op(&["!"]).is_some() {
            self.enter()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.parse_sum()?;
        let mut chain = Vec::new();
        while let Some(op) = self.compare_op() {
            chain.push((op, self.parse_sum()?));
        }
        if chain.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), chain))
        }
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        if let Some(op) = self.eat_op(&["==", "!=", "<=", ">=", "<", ">"]) {
            return Some(match op {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<=" => CmpOp::Le,
                ">=" => CmpOp::Ge,
                "<" => CmpOp::Lt,
                _ => CmpOp::Gt,
            });
        }
        if self.eat_keyword("in") {
            return Some(CmpOp::In);
        }
        let is_not_in = matches!(self.peek(), Some(Token::Ident(name)) if name == "not")
            && matches!(self.tokens.get(self.cursor + 1), Some(Token::Ident(name)) if name == "in");
        if is_not_in {
            self.cursor += 2;
            return Some(CmpOp::NotIn);
        }
        None
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_term()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { ArithOp::Add } else { ArithOp::Sub };
            let right = self.parse_term()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let op = match op {
                "*" => ArithOp::Mul,
                "/" => ArithOp::Div,
                _ => ArithOp::Rem,
            };
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_op(&["-"]).is_some() {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next().ok_or(ExpressionError::UnexpectedEnd)? {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                FIELD_VALUE => Ok(Expr::FieldValue),
                "len" => {
                    match self.next() {
                        Some(Token::LParen) => {}
                        Some(other) => return Err(ExpressionError::UnexpectedToken(other.describe())),
                        None => return Err(ExpressionError::UnexpectedEnd),
                    }
                    let inner = self.parse_or()?;
                    self.expect_rparen()?;
                    Ok(Expr::Len(Box::new(inner)))
                }
                _ => Err(ExpressionError::UnknownName(name)),
            },
            other => Err(ExpressionError::UnexpectedToken(other.describe())),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(ExpressionError::UnexpectedToken(other.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

impl Expr {
    /// Evaluate the expression with `field_value` bound.
    pub fn eval(&self, field_value: &Value) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::FieldValue => Ok(field_value.clone()),
            Expr::Len(inner) => {
                let value = inner.eval(field_value)?;
                Ok(Value::from(value_len(&value)))
            }
            Expr::Neg(inner) => {
                let value = inner.eval(field_value)?;
                arith(ArithOp::Sub, &Value::from(0), &value)
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(field_value)?))),
            Expr::And(left, right) => {
                if !truthy(&left.eval(field_value)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&right.eval(field_value)?)))
            }
            Expr::Or(left, right) => {
                if truthy(&left.eval(field_value)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&right.eval(field_value)?)))
            }
            Expr::Arith(op, left, right) => {
                arith(*op, &left.eval(field_value)?, &right.eval(field_value)?)
            }
            Expr::Compare(first, chain) => {
                let mut left = first.eval(field_value)?;
                for (op, right) in chain {
                    let right = right.eval(field_value)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn mismatch(op: &'static str, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::TypeMismatch {
        op,
        left: type_name(left),
        right: type_name(right),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    let ordering = |symbol: &'static str| -> Result<Ordering, ExpressionError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return Err(mismatch(symbol, left, right));
                };
                a.partial_cmp(&b).ok_or(ExpressionError::NotFinite)
            }
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            _ => Err(mismatch(symbol, left, right)),
        }
    };

    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Lt => ordering("<")?.is_lt(),
        CmpOp::Le => ordering("<=")?.is_le(),
        CmpOp::Gt => ordering(">")?.is_gt(),
        CmpOp::Ge => ordering(">=")?.is_ge(),
        CmpOp::In => contains(right, left, "in")?,
        CmpOp::NotIn => !contains(right, left, "not in")?,
    })
}

fn contains(
    haystack: &Value,
    needle: &Value,
    op: &'static str,
) -> Result<bool, ExpressionError> {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => Ok(h.contains(n.as_str())),
        (Value::Array(items), _) => Ok(items.iter().any(|item| values_equal(item, needle))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(mismatch(op, needle, haystack)),
    }
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let symbol = match op {
        ArithOp::Add => "+",
        ArithOp::Sub => "-",
        ArithOp::Mul => "*",
        ArithOp::Div => "/",
        ArithOp::Rem => "%",
    };

    if let (ArithOp::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(mismatch(symbol, left, right));
    };

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div | ArithOp::Rem if b == 0 => return Err(ExpressionError::DivisionByZero),
            ArithOp::Div => None,
            ArithOp::Rem => a.checked_rem_euclid(b),
        };
        if let Some(result) = result {
            return Ok(Value::from(result));
        }
    }

    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return Err(mismatch(symbol, left, right));
    };
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div | ArithOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        ArithOp::Div => a / b,
        ArithOp::Rem => a.rem_euclid(b),
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or(ExpressionError::NotFinite)
}
