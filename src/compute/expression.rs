//! Arithmetic expression parsing and evaluation for rate equations.
//!
//! Channel models may describe gate rates with free-form expressions over
//! voltage, calcium concentration, and temperature. This module compiles
//! such an expression into a small AST once and evaluates it repeatedly at
//! different sample points.

use std::collections::HashMap;

/// Errors raised while compiling or evaluating an expression.
///
/// These always indicate a malformed model, never a runtime fluke, so
/// callers surface them immediately instead of absorbing them into fitness
/// scoring.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpressionError {
    #[error("parse error in '{text}' at offset {offset}: {reason}")]
    Parse {
        text: String,
        offset: usize,
        reason: String,
    },
    #[error("undefined symbol '{name}' in expression '{text}'")]
    UndefinedSymbol { name: String, text: String },
    #[error("unknown function '{name}' in expression '{text}'")]
    UnknownFunction { name: String, text: String },
}

/// Built-in unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Exp,
    Ln,
    Log10,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tanh,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Self::Exp),
            "ln" | "log" => Some(Self::Ln),
            "log10" => Some(Self::Log10),
            "sqrt" => Some(Self::Sqrt),
            "abs" => Some(Self::Abs),
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            "tanh" => Some(Self::Tanh),
            _ => None,
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Sqrt => x.sqrt(),
            Self::Abs => x.abs(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tanh => x.tanh(),
        }
    }
}

/// Compiled expression AST.
#[derive(Debug, Clone)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    /// Compile an expression from text.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let mut parser = Parser {
            text,
            chars: text.char_indices().peekable(),
        };
        let expr = parser.expr()?;
        parser.skip_whitespace();
        if let Some(&(offset, c)) = parser.chars.peek() {
            return Err(ExpressionError::Parse {
                text: text.to_string(),
                offset,
                reason: format!("unexpected character '{c}'"),
            });
        }
        Ok(expr)
    }

    /// Evaluate against a variable environment. Every symbol the
    /// expression references must be present.
    pub fn eval(&self, vars: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Var(name) => {
                vars.get(name)
                    .copied()
                    .ok_or_else(|| ExpressionError::UndefinedSymbol {
                        name: name.clone(),
                        text: String::new(),
                    })
            }
            Expr::Neg(e) => Ok(-e.eval(vars)?),
            Expr::Add(a, b) => Ok(a.eval(vars)? + b.eval(vars)?),
            Expr::Sub(a, b) => Ok(a.eval(vars)? - b.eval(vars)?),
            Expr::Mul(a, b) => Ok(a.eval(vars)? * b.eval(vars)?),
            Expr::Div(a, b) => Ok(a.eval(vars)? / b.eval(vars)?),
            Expr::Pow(a, b) => Ok(a.eval(vars)?.powf(b.eval(vars)?)),
            Expr::Call(f, e) => Ok(f.apply(e.eval(vars)?)),
        }
    }

    /// Collect every variable name the expression references.
    pub fn symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_symbols(&self, out: &mut Vec<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => out.push(name.clone()),
            Expr::Neg(e) | Expr::Call(_, e) => e.collect_symbols(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }
}

/// Recursive-descent parser over the expression grammar:
///
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := unary (('*' | '/') unary)*
/// unary  := '-' unary | power
/// power  := atom ('^' unary)?
/// atom   := number | ident | ident '(' expr ')' | '(' expr ')'
/// ```
struct Parser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(&(_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn error(&mut self, reason: impl Into<String>) -> ExpressionError {
        let offset = self.chars.peek().map(|&(i, _)| i).unwrap_or(self.text.len());
        ExpressionError::Parse {
            text: self.text.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some(&(_, '+')) => {
                    self.chars.next();
                    let rhs = self.term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(&(_, '-')) => {
                    self.chars.next();
                    let rhs = self.term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some(&(_, '*')) => {
                    self.chars.next();
                    let rhs = self.unary()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(&(_, '/')) => {
                    self.chars.next();
                    let rhs = self.unary()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        if matches!(self.chars.peek(), Some(&(_, '-'))) {
            self.chars.next();
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.atom()?;
        self.skip_whitespace();
        if matches!(self.chars.peek(), Some(&(_, '^'))) {
            self.chars.next();
            // Right-associative exponent.
            let exponent = self.unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some((_, '(')) => {
                self.chars.next();
                let inner = self.expr()?;
                self.skip_whitespace();
                match self.chars.next() {
                    Some((_, ')')) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some((start, c)) if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, c)) = self.chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        self.chars.next();
                    } else if (c == 'e' || c == 'E') && self.peek_exponent(i) {
                        // Scientific notation: consume 'e', optional sign,
                        // then digits.
                        end = i + 1;
                        self.chars.next();
                        if let Some(&(j, s)) = self.chars.peek() {
                            if s == '+' || s == '-' {
                                end = j + 1;
                                self.chars.next();
                            }
                        }
                        while let Some(&(j, d)) = self.chars.peek() {
                            if d.is_ascii_digit() {
                                end = j + 1;
                                self.chars.next();
                            } else {
                                break;
                            }
                        }
                        break;
                    } else {
                        break;
                    }
                }
                let slice = &self.text[start..end];
                slice
                    .parse::<f64>()
                    .map(Expr::Num)
                    .map_err(|_| self.error(format!("invalid number '{slice}'")))
            }
            Some((start, c)) if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = self.chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                let name = &self.text[start..end];
                self.skip_whitespace();
                if matches!(self.chars.peek(), Some(&(_, '('))) {
                    let func = Func::from_name(name).ok_or_else(|| {
                        ExpressionError::UnknownFunction {
                            name: name.to_string(),
                            text: self.text.to_string(),
                        }
                    })?;
                    self.chars.next();
                    let arg = self.expr()?;
                    self.skip_whitespace();
                    match self.chars.next() {
                        Some((_, ')')) => Ok(Expr::Call(func, Box::new(arg))),
                        _ => Err(self.error("expected ')' after function argument")),
                    }
                } else {
                    Ok(Expr::Var(name.to_string()))
                }
            }
            Some((_, c)) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    /// True if the character after offset `i` continues a numeric exponent.
    fn peek_exponent(&self, i: usize) -> bool {
        let rest = &self.text[i + 1..];
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if c.is_ascii_digit() => true,
            Some('+') | Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        }
    }
}
