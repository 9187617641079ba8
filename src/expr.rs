//! Viewport expressions for pin sizes and node parameters.
//!
//! Descriptors write dynamic values as `expr(...)`, e.g. `expr(width / 2)` or
//! `expr([1.0 / width, 1.0 / height])`. The body is arithmetic over the
//! variables `width`, `height` and `dpr`, with `+ - * / %`, parentheses,
//! unary minus and the functions `min`, `max`, `floor`, `ceil`, `round`,
//! `abs` and `sqrt`. A bracketed list of up to four expressions yields a vector.

use std::fmt;

use crate::backend::{UniformValue, Viewport};
use crate::error::CompositorError;

/// Values visible to an expression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExprVars {
    pub width: f32,
    pub height: f32,
    pub dpr: f32,
}

impl From<Viewport> for ExprVars {
    fn from(viewport: Viewport) -> Self {
        Self {
            width: viewport.width as f32,
            height: viewport.height as f32,
            dpr: viewport.device_pixel_ratio,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Var {
    Width,
    Height,
    Dpr,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Func {
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
}

impl Func {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        Some(match name {
            "min" => (Self::Min, 2),
            "max" => (Self::Max, 2),
            "floor" => (Self::Floor, 1),
            "ceil" => (Self::Ceil, 1),
            "round" => (Self::Round, 1),
            "abs" => (Self::Abs, 1),
            "sqrt" => (Self::Sqrt, 1),
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Number(f32),
    Var(Var),
    Neg(Box<Node>),
    Binary(char, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval(&self, vars: &ExprVars) -> f32 {
        match self {
            Node::Number(value) => *value,
            Node::Var(Var::Width) => vars.width,
            Node::Var(Var::Height) => vars.height,
            Node::Var(Var::Dpr) => vars.dpr,
            Node::Neg(inner) => -inner.eval(vars),
            Node::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(vars), rhs.eval(vars));
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    _ => a % b,
                }
            }
            Node::Call(func, args) => {
                let arg = |i: usize| args[i].eval(vars);
                match func {
                    Func::Min => arg(0).min(arg(1)),
                    Func::Max => arg(0).max(arg(1)),
                    Func::Floor => arg(0).floor(),
                    Func::Ceil => arg(0).ceil(),
                    Func::Round => arg(0).round(),
                    Func::Abs => arg(0).abs(),
                    Func::Sqrt => arg(0).sqrt(),
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f32),
    Ident(String),
    Op(char),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let text = &source[start..end];
            let value = text
                .parse::<f32>()
                .map_err(|_| format!("bad number '{}'", text))?;
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_alphanumeric() || d == '_' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(source[start..end].to_string()));
        } else if "+-*/%(),[]".contains(c) {
            tokens.push(Token::Op(c));
            chars.next();
        } else {
            return Err(format!("unexpected character '{}'", c));
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
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: char) -> Result<(), String> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(format!("expected '{}'", op))
        }
    }

    fn components(&mut self) -> Result<Vec<Node>, String> {
        if !self.eat('[') {
            return Ok(vec![self.sum()?]);
        }
        let mut items = vec![self.sum()?];
        while self.eat(',') {
            items.push(self.sum()?);
        }
        self.expect(']')?;
        if items.len() > 4 {
            return Err("vectors have at most four components".to_string());
        }
        Ok(items)
    }

    fn sum(&mut self) -> Result<Node, String> {
        let mut node = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ('+' | '-'))) => *op,
                _ => return Ok(node),
            };
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.product()?));
        }
    }

    fn product(&mut self) -> Result<Node, String> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ('*' | '/' | '%'))) => *op,
                _ => return Ok(node),
            };
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Node, String> {
        if self.eat('-') {
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Node::Number(value)),
            Some(Token::Op('(')) => {
                let node = self.sum()?;
                self.expect(')')?;
                Ok(node)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "width" => Ok(Node::Var(Var::Width)),
                "height" => Ok(Node::Var(Var::Height)),
                "dpr" => Ok(Node::Var(Var::Dpr)),
                _ => {
                    let (func, arity) =
                        Func::lookup(&name).ok_or_else(|| format!("unknown name '{}'", name))?;
                    self.expect('(')?;
                    let mut args = vec![self.sum()?];
                    while self.eat(',') {
                        args.push(self.sum()?);
                    }
                    self.expect(')')?;
                    if args.len() != arity {
                        return Err(format!("{} takes {} argument(s)", name, arity));
                    }
                    Ok(Node::Call(func, args))
                }
            },
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// A parsed viewport expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    components: Vec<Node>,
}

impl Expression {
    /// Parses an expression body (without the `expr(...)` wrapper).
    pub fn parse(source: &str) -> Result<Self, CompositorError> {
        let error = |message: String| CompositorError::Expression {
            source_text: source.to_string(),
            message,
        };

        let tokens = tokenize(source).map_err(error)?;
        let mut parser = Parser { tokens, pos: 0 };
        let components = parser.components().map_err(error)?;
        if parser.pos < parser.tokens.len() {
            return Err(error("trailing input".to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            components,
        })
    }

    /// Recognizes the `expr(...)` form used in descriptors.
    ///
    /// Returns `None` when `text` is not wrapped in `expr(...)`.
    pub fn from_descriptor(text: &str) -> Option<Result<Self, CompositorError>> {
        let body = text.trim().strip_prefix("expr(")?.strip_suffix(')')?;
        Some(Self::parse(body))
    }

    /// Number of components: 1 for scalars, 2 to 4 for vectors.
    pub fn arity(&self) -> usize {
        self.components.len()
    }

    pub fn eval(&self, vars: &ExprVars) -> Vec<f32> {
        self.components.iter().map(|node| node.eval(vars)).collect()
    }

    /// The first component.
    pub fn eval_scalar(&self, vars: &ExprVars) -> f32 {
        self.components[0].eval(vars)
    }

    pub fn eval_uniform(&self, vars: &ExprVars) -> Option<UniformValue> {
        UniformValue::from_slice(&self.eval(vars))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expr({})", self.source)
    }
}
