//! Bullet patterns from the admin tool.
//!
//! A pattern is a small arithmetic expression of one variable `x` (the bullet's
//! age in ticks) whose value is the bullet's sideways offset from its straight
//! track. The source comes from a generated file so it is parsed by a closed
//! grammar here and never handed to anything more general:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom ('**' unary)?
//! atom  := number | name | name '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Names are `x`, the constants `pi`, `e`, `tau` and a fixed table of math
//! functions. A leading `math.` on any name is accepted and ignored.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub const MAX_SOURCE_LEN: usize = 256;
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("expression longer than {0} bytes")]
    TooLong(usize),
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number '{0}'")]
    BadNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("{name} expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("expression nested deeper than {0}")]
    TooDeep(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("math domain error in {0}")]
    Domain(&'static str),
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, thiserror::Error)]
pub enum PatternFileError {
    #[error("read pattern file: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode pattern file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Pow,
    Slash,
    Percent,
    Comma,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "number {n}"),
            Token::Name(n) => write!(f, "name '{n}'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Pow => f.write_str("'**'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::Comma => f.write_str("','"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if bytes.get(i + 1) == Some(&b'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &src[start..i];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::BadNumber(text.to_string()))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                tokens.push(Token::Name(src[start..i].to_string()));
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or(c);
                return Err(ExprError::UnexpectedChar(ch, i));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Exp,
    Log,
    Log10,
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    Pow,
    Fmod,
    Hypot,
    Radians,
    Degrees,
}

enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        let f = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "abs" | "fabs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            "fmod" => Func::Fmod,
            "hypot" => Func::Hypot,
            "radians" => Func::Radians,
            "degrees" => Func::Degrees,
            _ => return None,
        };
        Some(f)
    }

    fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Atan2 => "atan2",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
            Func::Sqrt => "sqrt",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Abs => "abs",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Min => "min",
            Func::Max => "max",
            Func::Pow => "pow",
            Func::Fmod => "fmod",
            Func::Hypot => "hypot",
            Func::Radians => "radians",
            Func::Degrees => "degrees",
        }
    }

    fn arity(self) -> Arity {
        match self {
            Func::Atan2 | Func::Pow | Func::Fmod | Func::Hypot => Arity::Exactly(2),
            Func::Min | Func::Max => Arity::AtLeast(2),
            _ => Arity::Exactly(1),
        }
    }

    fn check_arity(self, got: usize) -> Result<(), ExprError> {
        let (ok, expected) = match self.arity() {
            Arity::Exactly(1) => (got == 1, "1"),
            Arity::Exactly(2) => (got == 2, "2"),
            Arity::Exactly(_) => (false, "?"),
            Arity::AtLeast(n) => (got >= n, "at least 2"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: self.name(),
                expected,
                got,
            })
        }
    }

    fn apply(self, args: &[f64]) -> Result<f64, ExprError> {
        let a = args[0];
        let b = args.get(1).copied().unwrap_or(0.0);
        let v = match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Asin => a.asin(),
            Func::Acos => a.acos(),
            Func::Atan => a.atan(),
            Func::Atan2 => a.atan2(b),
            Func::Sinh => a.sinh(),
            Func::Cosh => a.cosh(),
            Func::Tanh => a.tanh(),
            Func::Sqrt => a.sqrt(),
            Func::Exp => a.exp(),
            Func::Log if a <= 0.0 => return Err(ExprError::Domain("log")),
            Func::Log => a.ln(),
            Func::Log10 if a <= 0.0 => return Err(ExprError::Domain("log10")),
            Func::Log10 => a.log10(),
            Func::Abs => a.abs(),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Pow => a.powf(b),
            Func::Fmod if b == 0.0 => return Err(ExprError::DivisionByZero),
            Func::Fmod => a % b,
            Func::Hypot => a.hypot(b),
            Func::Radians => a.to_radians(),
            Func::Degrees => a.to_degrees(),
        };
        if v.is_nan() {
            Err(ExprError::Domain(self.name()))
        } else {
            Ok(v)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var,
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(t.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(ExprError::TooDeep(MAX_DEPTH))
        } else {
            Ok(())
        }
    }

    fn expr(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        self.enter()?;
        let node = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Node::Neg(Box::new(self.unary()?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(node)
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Node::Num(n)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Name(raw)) => {
                let name = raw.strip_prefix("math.").unwrap_or(&raw);
                if self.peek() == Some(&Token::LParen) {
                    let func =
                        Func::lookup(name).ok_or_else(|| ExprError::UnknownName(raw.clone()))?;
                    self.pos += 1;
                    self.enter()?;
                    let mut args = vec![self.expr()?];
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    self.depth -= 1;
                    func.check_arity(args.len())?;
                    return Ok(Node::Call(func, args));
                }
                match name {
                    "x" => Ok(Node::Var),
                    "pi" => Ok(Node::Num(std::f64::consts::PI)),
                    "e" => Ok(Node::Num(std::f64::consts::E)),
                    "tau" => Ok(Node::Num(std::f64::consts::TAU)),
                    _ => Err(ExprError::UnknownName(raw.clone())),
                }
            }
            Some(t) => Err(ExprError::UnexpectedToken(t.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

impl Node {
    fn eval(&self, x: f64) -> Result<f64, ExprError> {
        match self {
            Node::Num(n) => Ok(*n),
            Node::Var => Ok(x),
            Node::Neg(inner) => Ok(-inner.eval(x)?),
            Node::Bin(op, lhs, rhs) => {
                let a = lhs.eval(x)?;
                let b = rhs.eval(x)?;
                match op {
                    BinOp::Add => Ok(a + b),
                    BinOp::Sub => Ok(a - b),
                    BinOp::Mul => Ok(a * b),
                    BinOp::Div if b == 0.0 => Err(ExprError::DivisionByZero),
                    BinOp::Div => Ok(a / b),
                    BinOp::Mod if b == 0.0 => Err(ExprError::DivisionByZero),
                    // floored modulo: the result takes the divisor's sign
                    BinOp::Mod => Ok(a - b * (a / b).floor()),
                    BinOp::Pow => Ok(a.powf(b)),
                }
            }
            Node::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(x))
                    .collect::<Result<Vec<_>, _>>()?;
                func.apply(&values)
            }
        }
    }
}

/// A parsed pattern expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    root: Node,
}

impl Expr {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        if src.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong(MAX_SOURCE_LEN));
        }
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some(t) = parser.next() {
            return Err(ExprError::UnexpectedToken(t.to_string()));
        }
        Ok(Self { root })
    }

    pub fn eval(&self, x: f64) -> Result<f64, ExprError> {
        let v = self.root.eval(x)?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(ExprError::NonFinite)
        }
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

/// The named pattern that newly fired player bullets follow.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    pub source: String,
    compiled: Result<Expr, ExprError>,
}

impl Pattern {
    /// Parses once up front; a source that doesn't parse still becomes a pattern
    /// whose offset is always zero.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Expr::parse(&source);
        Self {
            name: name.into(),
            source,
            compiled,
        }
    }

    pub fn parse_error(&self) -> Option<&ExprError> {
        self.compiled.as_ref().err()
    }

    /// Lateral offset at bullet age `tick`, zero when evaluation fails.
    pub fn offset(&self, tick: u32) -> f32 {
        match &self.compiled {
            Ok(expr) => match expr.eval(f64::from(tick)) {
                Ok(v) => v as f32,
                Err(err) => {
                    tracing::trace!(pattern = %self.name, tick, %err, "pattern evaluation failed");
                    0.0
                }
            },
            Err(_) => 0.0,
        }
    }
}

/// On-disk form written by the admin tool.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PatternFile {
    #[serde(default)]
    pub name: String,
    pub expression: String,
}

pub async fn read_pattern_file(path: &Path) -> Result<PatternFile, PatternFileError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, x: f64) -> f64 {
        Expr::parse(src).unwrap().eval(x).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn admin_tool_examples_evaluate() {
        assert!(close(eval("x", 7.0), 7.0));
        assert!(close(eval("50 * math.sin(x / 5)", 5.0), 50.0 * 1f64.sin()));
        assert!(close(eval("50 * (x % 20 - 10)", 25.0), -250.0));
        assert!(close(eval("30 * math.sin(x / 8) + x * 0.5", 8.0), 30.0 * 1f64.sin() + 4.0));
        assert!(close(
            eval("40 * math.sin(x / 3) + 20 * math.cos(x / 7)", 0.0),
            20.0
        ));
    }

    #[test]
    fn operator_precedence() {
        assert!(close(eval("1 + 2 * 3", 0.0), 7.0));
        assert!(close(eval("(1 + 2) * 3", 0.0), 9.0));
        assert!(close(eval("-2 ** 2", 0.0), -4.0));
        assert!(close(eval("2 ** 3 ** 2", 0.0), 512.0));
        assert!(close(eval("2 ** -1", 0.0), 0.5));
        assert!(close(eval("10 - 4 - 3", 0.0), 3.0));
        assert!(close(eval("-x", 3.0), -3.0));
    }

    #[test]
    fn modulo_is_floored() {
        assert!(close(eval("-1 % 20", 0.0), 19.0));
        assert!(close(eval("7 % -3", 0.0), -2.0));
        assert!(close(eval("fmod(-1, 20)", 0.0), -1.0));
    }

    #[test]
    fn constants_and_multi_arg_functions() {
        assert!(close(eval("math.pi", 0.0), std::f64::consts::PI));
        assert!(close(eval("max(1, x, 3)", 5.0), 5.0));
        assert!(close(eval("min(4, 2)", 0.0), 2.0));
        assert!(close(eval("atan2(1, 1)", 0.0), std::f64::consts::FRAC_PI_4));
        assert!(close(eval("1e2 + .5", 0.0), 100.5));
    }

    #[test]
    fn rejects_names_outside_whitelist() {
        assert_eq!(
            Expr::parse("__import__(x)").unwrap_err(),
            ExprError::UnknownName("__import__".into())
        );
        assert_eq!(
            Expr::parse("os.system(x)").unwrap_err(),
            ExprError::UnknownName("os.system".into())
        );
        assert_eq!(Expr::parse("y + 1").unwrap_err(), ExprError::UnknownName("y".into()));
        assert!(matches!(
            Expr::parse("x; 1").unwrap_err(),
            ExprError::UnexpectedChar(';', 1)
        ));
        assert!(matches!(
            Expr::parse("'a'").unwrap_err(),
            ExprError::UnexpectedChar('\'', 0)
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Expr::parse("").unwrap_err(), ExprError::Empty);
        assert_eq!(Expr::parse("   ").unwrap_err(), ExprError::Empty);
        assert_eq!(Expr::parse("1 +").unwrap_err(), ExprError::UnexpectedEnd);
        assert_eq!(Expr::parse("(1").unwrap_err(), ExprError::UnexpectedEnd);
        assert!(matches!(Expr::parse("1 2"), Err(ExprError::UnexpectedToken(_))));
        assert!(matches!(Expr::parse("1..2"), Err(ExprError::BadNumber(_))));
        assert!(matches!(Expr::parse("sin(1, 2)"), Err(ExprError::Arity { .. })));
        assert!(matches!(Expr::parse("max(1)"), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn bounds_size_and_nesting() {
        let long = "1+".repeat(200) + "1";
        assert_eq!(Expr::parse(&long).unwrap_err(), ExprError::TooLong(MAX_SOURCE_LEN));
        let deep = "(".repeat(40) + "1" + &")".repeat(40);
        assert_eq!(Expr::parse(&deep).unwrap_err(), ExprError::TooDeep(MAX_DEPTH));
    }

    #[test]
    fn runtime_errors_are_reported() {
        let div = Expr::parse("1 / (x - 2)").unwrap();
        assert_eq!(div.eval(2.0).unwrap_err(), ExprError::DivisionByZero);
        assert!(close(div.eval(3.0).unwrap(), 1.0));
        assert_eq!(
            Expr::parse("sqrt(x - 10)").unwrap().eval(0.0).unwrap_err(),
            ExprError::Domain("sqrt")
        );
        assert_eq!(
            Expr::parse("log(x)").unwrap().eval(0.0).unwrap_err(),
            ExprError::Domain("log")
        );
        assert_eq!(
            Expr::parse("exp(x)").unwrap().eval(1000.0).unwrap_err(),
            ExprError::NonFinite
        );
    }

    #[test]
    fn pattern_offset_falls_back_to_zero() {
        let broken = Pattern::new("broken", "sin(");
        assert!(broken.parse_error().is_some());
        assert_eq!(broken.offset(3), 0.0);

        let spiky = Pattern::new("spiky", "10 / (x - 1)");
        assert_eq!(spiky.offset(1), 0.0);
        assert_eq!(spiky.offset(2), 10.0);
        // the same expression is tried again after a failing tick
        assert_eq!(spiky.offset(1), 0.0);
        assert_eq!(spiky.offset(3), 5.0);
    }

    #[test]
    fn pattern_file_decodes() {
        let file: PatternFile =
            serde_json::from_str(r#"{"expression": "50 * math.sin(x / 10)", "name": "sine wave"}"#)
                .unwrap();
        assert_eq!(file.name, "sine wave");
        assert_eq!(file.expression, "50 * math.sin(x / 10)");
    }

    #[tokio::test]
    async fn missing_pattern_file_is_an_error() {
        let path = std::env::temp_dir().join("dogfight-no-such-pattern.json");
        assert!(matches!(
            read_pattern_file(&path).await,
            Err(PatternFileError::Io(_))
        ));
    }
}
