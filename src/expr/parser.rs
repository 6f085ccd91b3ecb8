//! Lexer and parser for the expression grammar.
//!
//! Expressions appear inside `${...}` interpolation segments in template
//! strings. The grammar is deliberately small:
//!
//! ```text
//! expr     := literal | reference | call
//! literal  := 'single quoted string' | integer | true | false
//! reference:= ("parameters" | "resources" | "modules") ("." ident)+
//! call     := ident "(" [ expr ("," expr)* ] ")"
//! ident    := [A-Za-z_][A-Za-z0-9_-]*
//! ```
//!
//! References are always rooted: `parameters.location`,
//! `resources.vnet.properties.addressSpace`, `modules.net.outputs.subnetId`.

use std::fmt;

use crate::core::StratusError;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `'literal string'`
    StringLit(String),
    /// Integer literal, possibly negative.
    NumberLit(i64),
    /// `true` / `false`
    BoolLit(bool),
    /// Rooted dotted reference path.
    Reference(RefPath),
    /// Built-in function call.
    Call {
        /// Function name.
        name: String,
        /// Argument expressions, in order.
        args: Vec<Expr>,
    },
}

/// The namespace a reference is rooted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRoot {
    /// `parameters.<name>`
    Parameters,
    /// `resources.<name>.<path...>`
    Resources,
    /// `modules.<name>.outputs.<name>`
    Modules,
}

impl fmt::Display for RefRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameters => write!(f, "parameters"),
            Self::Resources => write!(f, "resources"),
            Self::Modules => write!(f, "modules"),
        }
    }
}

/// A dotted reference path such as `resources.vnet.properties.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    /// Root namespace.
    pub root: RefRoot,
    /// Path segments after the root; the first is the symbolic name.
    pub segments: Vec<String>,
}

impl fmt::Display for RefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root, self.segments.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Dot,
    Comma,
    LParen,
    RParen,
}

fn parse_error(expression: &str, message: impl Into<String>) -> StratusError {
    StratusError::ExpressionParse {
        expression: expression.to_string(),
        message: message.into(),
    }
}

fn lex(src: &str) -> Result<Vec<Token>, StratusError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => lit.push(ch),
                        None => return Err(parse_error(src, "unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(lit));
            }
            '-' | '0'..='9' => {
                let mut num = String::new();
                if c == '-' {
                    num.push(c);
                    chars.next();
                }
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num
                    .parse::<i64>()
                    .map_err(|_| parse_error(src, format!("invalid number literal '{num}'")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == '-' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(parse_error(src, format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), StratusError> {
        match self.next() {
            Some(ref tok) if tok == expected => Ok(()),
            _ => Err(parse_error(self.src, format!("expected {what}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, StratusError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::StringLit(s)),
            Some(Token::Int(n)) => Ok(Expr::NumberLit(n)),
            Some(Token::Ident(ident)) => self.parse_ident(ident),
            Some(other) => Err(parse_error(self.src, format!("unexpected token {other:?}"))),
            None => Err(parse_error(self.src, "empty expression")),
        }
    }

    fn parse_ident(&mut self, ident: String) -> Result<Expr, StratusError> {
        match ident.as_str() {
            "true" => return Ok(Expr::BoolLit(true)),
            "false" => return Ok(Expr::BoolLit(false)),
            _ => {}
        }
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        match self.peek() {
                            Some(Token::Comma) => {
                                self.next();
                            }
                            _ => break,
                        }
                    }
                }
                self.expect(&Token::RParen, "')' to close argument list")?;
                Ok(Expr::Call { name: ident, args })
            }
            Some(Token::Dot) => {
                let root = match ident.as_str() {
                    "parameters" => RefRoot::Parameters,
                    "resources" => RefRoot::Resources,
                    "modules" => RefRoot::Modules,
                    other => {
                        return Err(parse_error(
                            self.src,
                            format!(
                                "references must be rooted at parameters, resources, or modules (got '{other}')"
                            ),
                        ));
                    }
                };
                let mut segments = Vec::new();
                while self.peek() == Some(&Token::Dot) {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(seg)) => segments.push(seg),
                        _ => {
                            return Err(parse_error(self.src, "expected identifier after '.'"));
                        }
                    }
                }
                if segments.is_empty() {
                    return Err(parse_error(self.src, "reference path has no segments"));
                }
                Ok(Expr::Reference(RefPath { root, segments }))
            }
            _ => Err(parse_error(
                self.src,
                format!("bare identifier '{ident}'; references must be rooted (e.g. parameters.{ident})"),
            )),
        }
    }
}

/// Parse a single expression (the contents of one `${...}` segment).
pub fn parse(src: &str) -> Result<Expr, StratusError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let expr = parser.parse_expr()?;
    if parser.peek().is_some() {
        return Err(parse_error(src, "trailing input after expression"));
    }
    Ok(expr)
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text outside any `${...}`.
    Literal(String),
    /// A parsed `${...}` expression.
    Expr(Expr),
}

/// Split a raw template string into literal and expression segments.
///
/// The scan is quote-aware so `}` inside a string literal does not terminate
/// the segment: `${concat('a}', 'b')}` is one expression.
pub fn parse_interpolation(raw: &str) -> Result<Vec<Segment>, StratusError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' && matches!(chars.peek(), Some((_, '{'))) {
            chars.next();
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            let mut inner = String::new();
            let mut in_quote = false;
            let mut closed = false;
            for (_, ec) in chars.by_ref() {
                match ec {
                    '\'' => {
                        in_quote = !in_quote;
                        inner.push(ec);
                    }
                    '}' if !in_quote => {
                        closed = true;
                        break;
                    }
                    _ => inner.push(ec),
                }
            }
            if !closed {
                return Err(parse_error(raw, "unterminated '${' segment"));
            }
            segments.push(Segment::Expr(parse(&inner)?));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
