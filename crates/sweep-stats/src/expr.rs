//! Derived-metric expressions.
//!
//! A stat request of the form `name = expr` defines a new counter computed
//! from already-parsed counters, once per core (e.g. `IPC = insts / cycles`).
//! Expressions are limited to the four arithmetic operators, parentheses,
//! numeric literals and counter references; they are parsed into a tree and
//! evaluated directly, never executed as code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("invalid expression '{input}': {reason}")]
    Parse { input: String, reason: String },
    #[error("unknown stat reference: {0}")]
    UnknownStat(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Stat(String),
    Literal(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        let expr = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.err("trailing tokens after expression"));
        }
        Ok(expr)
    }

    /// Evaluates against one core's counter values. Division by zero follows
    /// IEEE semantics so a zero-cycle run surfaces as inf/NaN, not a crash.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ExprError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Stat(name) => {
                lookup(name).ok_or_else(|| ExprError::UnknownStat(name.clone()))
            }
            Expr::Literal(value) => Ok(*value),
            Expr::Add(lhs, rhs) => Ok(lhs.eval(lookup)? + rhs.eval(lookup)?),
            Expr::Sub(lhs, rhs) => Ok(lhs.eval(lookup)? - rhs.eval(lookup)?),
            Expr::Mul(lhs, rhs) => Ok(lhs.eval(lookup)? * rhs.eval(lookup)?),
            Expr::Div(lhs, rhs) => Ok(lhs.eval(lookup)? / rhs.eval(lookup)?),
            Expr::Neg(inner) => Ok(-inner.eval(lookup)?),
        }
    }
}

/// Splits `name = expr` into the new stat name and its parsed right-hand
/// side. The name must be a bare identifier.
pub fn parse_equation(spec: &str) -> Result<(String, Expr), ExprError> {
    let (name, body) = spec.split_once('=').ok_or_else(|| ExprError::Parse {
        input: spec.to_string(),
        reason: "expected name = expression".to_string(),
    })?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ExprError::Parse {
            input: spec.to_string(),
            reason: format!("invalid stat name '{name}'"),
        });
    }
    Ok((name.to_string(), Expr::parse(body)?))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
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
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number.parse::<f64>().map_err(|_| ExprError::Parse {
                    input: input.to_string(),
                    reason: format!("bad numeric literal '{number}'"),
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c => {
                return Err(ExprError::Parse {
                    input: input.to_string(),
                    reason: format!("unexpected character '{c}'"),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn err(&self, reason: &str) -> ExprError {
        ExprError::Parse {
            input: self.input.to_string(),
            reason: reason.to_string(),
        }
    }

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

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.next();
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.next();
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.next();
                    lhs = Expr::Div(Box::new(lhs), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(name)) => Ok(Expr::Stat(name)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.err("missing closing parenthesis")),
                }
            }
            _ => Err(self.err("expected a stat name, number or parenthesis")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<f64> {
        match name {
            "insts" => Some(4_000_000.0),
            "cycles" => Some(2_000_000.0),
            "misses" => Some(100.0),
            _ => None,
        }
    }

    #[test]
    fn evaluates_ratio() {
        let (name, expr) = parse_equation("IPC = insts / cycles").unwrap();
        assert_eq!(name, "IPC");
        assert_eq!(expr.eval(&lookup).unwrap(), 2.0);
    }

    #[test]
    fn respects_precedence_and_parens() {
        let expr = Expr::parse("misses + 2 * 3").unwrap();
        assert_eq!(expr.eval(&lookup).unwrap(), 106.0);
        let expr = Expr::parse("(misses + 2) * 3").unwrap();
        assert_eq!(expr.eval(&lookup).unwrap(), 306.0);
    }

    #[test]
    fn unary_minus() {
        let expr = Expr::parse("-misses / 2").unwrap();
        assert_eq!(expr.eval(&lookup).unwrap(), -50.0);
    }

    #[test]
    fn division_by_zero_is_not_an_error() {
        let expr = Expr::parse("misses / 0").unwrap();
        assert!(expr.eval(&lookup).unwrap().is_infinite());
    }

    #[test]
    fn unknown_stat_is_reported() {
        let expr = Expr::parse("bogus + 1").unwrap();
        assert!(matches!(
            expr.eval(&lookup),
            Err(ExprError::UnknownStat(name)) if name == "bogus"
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Expr::parse("a ++").is_err());
        assert!(Expr::parse("(a + b").is_err());
        assert!(parse_equation("no equals sign").is_err());
        assert!(parse_equation("a b = 1").is_err());
    }
}
