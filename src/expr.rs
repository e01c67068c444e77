//! Expression language for schema-declared computed values.
//!
//! Form and schedule documents declare computations as strings, e.g.
//! `"max(0, netGain - basicDeduction)"` or
//! `"sum(transferAmount) - sum(acquisitionAmount) - sum(expenses)"`.
//! These parse into a typed [`Expr`] tree that can be statically inspected
//! (which names does it depend on?) before anything is evaluated.
//!
//! Supported forms: decimal literals, bare references to form field names,
//! `sum(entryField)` over a schedule's entries, unary minus, `+`, `-`,
//! `max(a, b)` and `min(a, b)`, parentheses.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}' in expression")]
    UnexpectedToken(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("sum() expects a single entry field name")]
    InvalidSumArgument,
    #[error("{name}() expects exactly two arguments")]
    InvalidArity { name: String },
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("no entry field '{0}' to sum")]
    UnknownEntryField(String),
    #[error("sum({0}) is only valid in a schedule aggregate expression")]
    SumNotAllowed(String),
    #[error("reference '{0}' is not valid in a schedule expression; use sum({0})")]
    FieldNotAllowed(String),
}

/// A parsed schema expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Decimal),
    /// Reference to a form field (or the field an aggregate is bound to).
    Field(String),
    /// Sum of a named entry field across a schedule's entries.
    Sum(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Form field names this expression reads (excludes `sum()` targets).
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect(&mut out, &mut BTreeSet::new());
        out
    }

    /// Entry field names this expression sums.
    pub fn summed_fields(&self) -> BTreeSet<&str> {
        let mut refs = BTreeSet::new();
        let mut sums = BTreeSet::new();
        self.collect(&mut refs, &mut sums);
        sums
    }

    fn collect<'a>(&'a self, refs: &mut BTreeSet<&'a str>, sums: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field(name) => {
                refs.insert(name);
            }
            Expr::Sum(field) => {
                sums.insert(field);
            }
            Expr::Neg(inner) => inner.collect(refs, sums),
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Max(lhs, rhs)
            | Expr::Min(lhs, rhs) => {
                lhs.collect(refs, sums);
                rhs.collect(refs, sums);
            }
        }
    }

    /// Evaluate a form expression. References resolve in `env`; `sum()` is
    /// rejected (there are no entries at the form level).
    pub fn eval_form(&self, env: &BTreeMap<String, Decimal>) -> Result<Decimal, ExprError> {
        self.eval(Some(env), None)
    }

    /// Evaluate a schedule aggregate expression. `sum()` terms resolve in
    /// `sums` (entry field name → sum across entries); bare references are
    /// rejected (entry fields only have meaning inside `sum()`).
    pub fn eval_schedule(&self, sums: &BTreeMap<String, Decimal>) -> Result<Decimal, ExprError> {
        self.eval(None, Some(sums))
    }

    fn eval(
        &self,
        fields: Option<&BTreeMap<String, Decimal>>,
        sums: Option<&BTreeMap<String, Decimal>>,
    ) -> Result<Decimal, ExprError> {
        match self {
            Expr::Literal(value) => Ok(*value),
            Expr::Field(name) => match fields {
                Some(env) => env
                    .get(name)
                    .copied()
                    .ok_or_else(|| ExprError::UnknownName(name.clone())),
                None => Err(ExprError::FieldNotAllowed(name.clone())),
            },
            Expr::Sum(field) => match sums {
                Some(sums) => sums
                    .get(field)
                    .copied()
                    .ok_or_else(|| ExprError::UnknownEntryField(field.clone())),
                None => Err(ExprError::SumNotAllowed(field.clone())),
            },
            Expr::Neg(inner) => Ok(-inner.eval(fields, sums)?),
            Expr::Add(lhs, rhs) => Ok(lhs.eval(fields, sums)? + rhs.eval(fields, sums)?),
            Expr::Sub(lhs, rhs) => Ok(lhs.eval(fields, sums)? - rhs.eval(fields, sums)?),
            Expr::Max(lhs, rhs) => Ok(lhs.eval(fields, sums)?.max(rhs.eval(fields, sums)?)),
            Expr::Min(lhs, rhs) => Ok(lhs.eval(fields, sums)?.min(rhs.eval(fields, sums)?)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Right operands of +/- are parenthesised when composite so that
        // parsing the rendered text rebuilds the same tree.
        fn grouped(expr: &Expr) -> bool {
            matches!(
                expr,
                Expr::Add(..) | Expr::Sub(..) | Expr::Neg(..)
            )
        }
        match self {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Field(name) => write!(f, "{name}"),
            Expr::Sum(field) => write!(f, "sum({field})"),
            Expr::Neg(inner) if grouped(inner) => write!(f, "-({inner})"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::Add(lhs, rhs) if grouped(rhs) => write!(f, "{lhs} + ({rhs})"),
            Expr::Add(lhs, rhs) => write!(f, "{lhs} + {rhs}"),
            Expr::Sub(lhs, rhs) if grouped(rhs) => write!(f, "{lhs} - ({rhs})"),
            Expr::Sub(lhs, rhs) => write!(f, "{lhs} - {rhs}"),
            Expr::Max(lhs, rhs) => write!(f, "max({lhs}, {rhs})"),
            Expr::Min(lhs, rhs) => write!(f, "min({lhs}, {rhs})"),
        }
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(t) => Err(ExprError::UnexpectedToken(t.to_string())),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(s: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = Decimal::from_str(&number)
                    .map_err(|_| ExprError::InvalidNumber(number.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&i) = chars.peek() {
                    if i.is_ascii_alphanumeric() || i == '_' {
                        ident.push(i);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(t.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    // expr := unary (('+' | '-') unary)*
    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    expr = Expr::Add(Box::new(expr), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    expr = Expr::Sub(Box::new(expr), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.parse_call(&name)
                } else {
                    Ok(Expr::Field(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(t) => Err(ExprError::UnexpectedToken(t.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, ExprError> {
        self.expect(Token::LParen)?;
        match name {
            "sum" => {
                let field = match self.next() {
                    Some(Token::Ident(field)) => field,
                    _ => return Err(ExprError::InvalidSumArgument),
                };
                self.expect(Token::RParen)?;
                Ok(Expr::Sum(field))
            }
            "max" | "min" => {
                let lhs = self.parse_expr()?;
                match self.next() {
                    Some(Token::Comma) => {}
                    _ => {
                        return Err(ExprError::InvalidArity {
                            name: name.to_string(),
                        })
                    }
                }
                let rhs = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
                Ok(if name == "max" {
                    Expr::Max(lhs, rhs)
                } else {
                    Expr::Min(lhs, rhs)
                })
            }
            other => Err(ExprError::UnknownFunction(other.to_string())),
        }
    }
}
