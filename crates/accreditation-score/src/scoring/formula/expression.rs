//! Restricted arithmetic/comparison language used by formula definitions.
//!
//! Source text is tokenized and parsed into an [`Expr`] tree once, then
//! evaluated against a [`VariableSet`] acting as the symbol table. Variables
//! are identifiers, so there is no textual substitution and no risk of a
//! short name matching inside a longer one.

use std::fmt::Write as _;

use crate::scoring::domain::VariableSet;

const EQUALITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("at most two comparison operators may be chained")]
    ComparisonChain,
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("expected a number but the expression yields a boolean")]
    ExpectedNumber,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::Pow => "^",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Sub => 4,
            ArithOp::Mul | ArithOp::Div | ArithOp::Rem => 5,
            ArithOp::Pow => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Eq => (lhs - rhs).abs() <= EQUALITY_TOLERANCE,
            CmpOp::Ne => (lhs - rhs).abs() > EQUALITY_TOLERANCE,
        }
    }
}

/// Parsed expression tree. Condition shapes have their own nodes so each
/// keeps its own evaluation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Variable(String),
    Neg(Box<Expr>),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lower lower_op subject upper_op upper`, e.g. `2 < RK <= 3`.
    Range {
        lower: Box<Expr>,
        lower_op: CmpOp,
        subject: Box<Expr>,
        upper_op: CmpOp,
        upper: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Runtime value of an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn as_number(self) -> Result<f64, ExpressionError> {
        match self {
            Value::Number(value) => Ok(value),
            Value::Bool(_) => Err(ExpressionError::ExpectedNumber),
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::Number(value) => value != 0.0,
            Value::Bool(value) => value,
        }
    }
}

/// A formula line: an expression with an optional `NAME =` binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: Option<String>,
    pub expr: Expr,
}

impl Statement {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser::new(tokens);

        let target = match (parser.peek_kind(0), parser.peek_kind(1)) {
            (Some(Token::Ident(name)), Some(Token::Assign)) => {
                let name = name.clone();
                parser.pos += 2;
                Some(name)
            }
            _ => None,
        };

        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(Self { target, expr })
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    pub fn evaluate(&self, scope: &VariableSet) -> Result<Value, ExpressionError> {
        match self {
            Expr::Number(value) => Ok(Value::Number(*value)),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Variable(name) => scope
                .get(name)
                .map(Value::Number)
                .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
            Expr::Neg(inner) => Ok(Value::Number(-inner.evaluate(scope)?.as_number()?)),
            Expr::Arith { op, lhs, rhs } => {
                let lhs = lhs.evaluate(scope)?.as_number()?;
                let rhs = rhs.evaluate(scope)?.as_number()?;
                apply_arith(*op, lhs, rhs).map(Value::Number)
            }
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(scope).and_then(Value::as_number))
                    .collect::<Result<Vec<_>, _>>()?;
                call_function(name, &values).map(Value::Number)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.evaluate(scope)?.as_number()?;
                let rhs = rhs.evaluate(scope)?.as_number()?;
                Ok(Value::Bool(op.holds(lhs, rhs)))
            }
            Expr::Range {
                lower,
                lower_op,
                subject,
                upper_op,
                upper,
            } => {
                let lower = lower.evaluate(scope)?.as_number()?;
                let subject = subject.evaluate(scope)?.as_number()?;
                let upper = upper.evaluate(scope)?.as_number()?;
                Ok(Value::Bool(
                    lower_op.holds(lower, subject) && upper_op.holds(subject, upper),
                ))
            }
            Expr::And(lhs, rhs) => {
                if !lhs.evaluate(scope)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(rhs.evaluate(scope)?.truthy()))
            }
            Expr::Or(lhs, rhs) => {
                if lhs.evaluate(scope)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(rhs.evaluate(scope)?.truthy()))
            }
        }
    }

    /// Render the expression with every known variable replaced by its value.
    /// Unknown variables keep their name so the audit trail shows what was missing.
    pub fn render(&self, scope: &VariableSet) -> String {
        let mut out = String::new();
        self.render_into(scope, &mut out);
        out
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(..) => 1,
            Expr::And(..) => 2,
            Expr::Compare { .. } | Expr::Range { .. } => 3,
            Expr::Arith { op, .. } => op.precedence(),
            Expr::Neg(_) => 6,
            Expr::Number(_) | Expr::Bool(_) | Expr::Variable(_) | Expr::Call { .. } => 8,
        }
    }

    fn render_child(&self, wrap: bool, scope: &VariableSet, out: &mut String) {
        if wrap {
            out.push('(');
            self.render_into(scope, out);
            out.push(')');
        } else {
            self.render_into(scope, out);
        }
    }

    fn render_into(&self, scope: &VariableSet, out: &mut String) {
        let own = self.precedence();
        match self {
            Expr::Number(value) => {
                let _ = write!(out, "{value}");
            }
            Expr::Bool(value) => {
                let _ = write!(out, "{value}");
            }
            Expr::Variable(name) => match scope.get(name) {
                Some(value) => {
                    let _ = write!(out, "{value}");
                }
                None => out.push_str(name),
            },
            Expr::Neg(inner) => {
                out.push('-');
                inner.render_child(inner.precedence() < own, scope, out);
            }
            Expr::Arith { op, lhs, rhs } => {
                let (wrap_lhs, wrap_rhs) = if *op == ArithOp::Pow {
                    (lhs.precedence() <= own, rhs.precedence() < own)
                } else {
                    (lhs.precedence() < own, rhs.precedence() <= own)
                };
                lhs.render_child(wrap_lhs, scope, out);
                let _ = write!(out, " {} ", op.symbol());
                rhs.render_child(wrap_rhs, scope, out);
            }
            Expr::Call { name, args } => {
                out.push_str(name);
                out.push('(');
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    arg.render_into(scope, out);
                }
                out.push(')');
            }
            Expr::Compare { op, lhs, rhs } => {
                lhs.render_child(lhs.precedence() <= own, scope, out);
                let _ = write!(out, " {} ", op.symbol());
                rhs.render_child(rhs.precedence() <= own, scope, out);
            }
            Expr::Range {
                lower,
                lower_op,
                subject,
                upper_op,
                upper,
            } => {
                lower.render_child(lower.precedence() <= own, scope, out);
                let _ = write!(out, " {} ", lower_op.symbol());
                subject.render_child(subject.precedence() <= own, scope, out);
                let _ = write!(out, " {} ", upper_op.symbol());
                upper.render_child(upper.precedence() <= own, scope, out);
            }
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                let symbol = if matches!(self, Expr::And(..)) {
                    "&&"
                } else {
                    "||"
                };
                lhs.render_child(lhs.precedence() < own, scope, out);
                let _ = write!(out, " {symbol} ");
                rhs.render_child(rhs.precedence() <= own, scope, out);
            }
        }
    }
}

fn apply_arith(op: ArithOp, lhs: f64, rhs: f64) -> Result<f64, ExpressionError> {
    let value = match op {
        ArithOp::Add => lhs + rhs,
        ArithOp::Sub => lhs - rhs,
        ArithOp::Mul => lhs * rhs,
        ArithOp::Div | ArithOp::Rem if rhs == 0.0 => {
            return Err(ExpressionError::DivisionByZero)
        }
        ArithOp::Div => lhs / rhs,
        ArithOp::Rem => lhs % rhs,
        ArithOp::Pow => lhs.powf(rhs),
    };
    finite(value)
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, ExpressionError> {
    let unary = |apply: fn(f64) -> f64| -> Result<f64, ExpressionError> {
        match args {
            [value] => finite(apply(*value)),
            _ => Err(ExpressionError::Arity {
                name: name.to_string(),
                expected: "1",
                found: args.len(),
            }),
        }
    };

    match name {
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: "at least 1",
                    found: 0,
                });
            }
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            let first = args[0];
            finite(args[1..].iter().copied().fold(first, fold))
        }
        "abs" => unary(f64::abs),
        "round" => unary(f64::round),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "sqrt" => unary(f64::sqrt),
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

fn finite(value: f64) -> Result<f64, ExpressionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExpressionError::NonFinite)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
    Assign,
    Cmp(CmpOp),
    AndAnd,
    OrOr,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(value) => format!("number {value}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::Caret => "'^'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Assign => "'='".to_string(),
            Token::Cmp(op) => format!("'{}'", op.symbol()),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
        }
    }
}

#[derive(Debug)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;
        let start = pos;

        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next_is_digit(bytes, pos + 1)) {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
                let sign = usize::from(matches!(bytes.get(pos + 1), Some(b'+' | b'-')));
                if next_is_digit(bytes, pos + 1 + sign) {
                    pos += 1 + sign;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let literal = &source[start..pos];
            let value = literal
                .parse::<f64>()
                .map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                offset: start,
            });
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
            {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(source[start..pos].to_string()),
                offset: start,
            });
            continue;
        }

        let next = bytes.get(pos + 1).copied();
        let (token, width) = match (ch, next) {
            ('>', Some(b'=')) => (Token::Cmp(CmpOp::Ge), 2),
            ('<', Some(b'=')) => (Token::Cmp(CmpOp::Le), 2),
            ('=', Some(b'=')) => (Token::Cmp(CmpOp::Eq), 2),
            ('!', Some(b'=')) => (Token::Cmp(CmpOp::Ne), 2),
            ('&', Some(b'&')) => (Token::AndAnd, 2),
            ('|', Some(b'|')) => (Token::OrOr, 2),
            ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
            ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
            ('=', _) => (Token::Assign, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => {
                let ch = source[start..].chars().next().unwrap_or(ch);
                return Err(ExpressionError::UnexpectedChar { ch, offset: start });
            }
        };
        tokens.push(Spanned {
            token,
            offset: start,
        });
        pos += width;
    }

    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    Ok(tokens)
}

fn next_is_digit(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos).map(u8::is_ascii_digit).unwrap_or(false)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek_kind(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|spanned| &spanned.token)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_kind(0)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let spanned = self.tokens.get(self.pos);
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn unexpected(&self, expected: &'static str) -> ExpressionError {
        match self.tokens.get(self.pos) {
            Some(spanned) => ExpressionError::UnexpectedToken {
                found: spanned.token.describe(),
                expected,
                offset: spanned.offset,
            },
            None => ExpressionError::UnexpectedEnd(expected),
        }
    }

    fn expect_end(&self) -> Result<(), ExpressionError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn next_cmp(&mut self) -> Option<CmpOp> {
        match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.parse_additive()?;
        let Some(lower_op) = self.next_cmp() else {
            return Ok(first);
        };
        let second = self.parse_additive()?;
        let Some(upper_op) = self.next_cmp() else {
            return Ok(Expr::Compare {
                op: lower_op,
                lhs: Box::new(first),
                rhs: Box::new(second),
            });
        };
        let third = self.parse_additive()?;
        if matches!(self.peek(), Some(Token::Cmp(_))) {
            return Err(ExpressionError::ComparisonChain);
        }
        Ok(Expr::Range {
            lower: Box::new(first),
            lower_op,
            subject: Box::new(second),
            upper_op,
            upper: Box::new(third),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if self.peek() != Some(&Token::Caret) {
            return Ok(base);
        }
        self.pos += 1;
        let exponent = self.parse_unary()?;
        Ok(Expr::Arith {
            op: ArithOp::Pow,
            lhs: Box::new(base),
            rhs: Box::new(exponent),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(spanned) = self.advance() else {
            return Err(ExpressionError::UnexpectedEnd("a value"));
        };

        match spanned.token.clone() {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Variable(name)),
            },
            Token::LParen => {
                let inner = self.parse_expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.unexpected("')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a value"))
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }
}
