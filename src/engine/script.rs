//! Restricted expression interpreter backing the `scripted` rule type.
//!
//! Grammar:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `x in list`
//! - Dot-path access rooted at `user`, `resource`, `action`, `context`
//! - Literals: integers, floats, `"strings"`, `true`, `false`, `null`
//! - Parentheses for grouping
//!
//! There are no function calls, no assignment, and no ambient capabilities;
//! a script can read the scope it is handed and nothing else. Source length,
//! parser nesting, and evaluation steps are all hard-bounded so a hostile
//! script cannot stall the decision path.

use serde_json::Value;

use crate::engine::errors::EngineError;

/// Longest accepted script source, in bytes.
const MAX_SOURCE_LEN: usize = 4096;
/// Deepest accepted expression nesting (parentheses and unary chains).
const MAX_NESTING: usize = 32;
/// Evaluation step budget per run.
const MAX_EVAL_STEPS: usize = 8192;

/// A compiled, reusable script. Compilation happens once at rule
/// construction; evaluation is pure.
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    expr: Expr,
}

impl Script {
    pub fn compile(source: &str) -> Result<Self, EngineError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(EngineError::InvalidScript(format!(
                "script exceeds {MAX_SOURCE_LEN} bytes"
            )));
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(EngineError::InvalidScript("empty expression".into()));
        }
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(EngineError::InvalidScript(format!(
                "unexpected trailing token: {tok:?}"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a scope object. The result must be a boolean;
    /// anything else is a runtime fault.
    pub fn eval(&self, scope: &Value) -> Result<bool, EngineError> {
        self.eval_with_budget(scope, MAX_EVAL_STEPS)
    }

    fn eval_with_budget(&self, scope: &Value, steps: usize) -> Result<bool, EngineError> {
        let mut evaluator = Evaluator { steps_left: steps };
        match evaluator.eval(&self.expr, scope)? {
            EvalValue::Bool(b) => Ok(b),
            other => Err(EngineError::ScriptRuntime(format!(
                "script must evaluate to a boolean, got {other:?}"
            ))),
        }
    }
}

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Literal),
    Path(Vec<String>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Dot,
    LParen,
    RParen,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Not,
    In,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(EngineError::InvalidScript(
                        "single `=` is not an operator (use `==`)".into(),
                    ));
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_none() {
                    return Err(EngineError::InvalidScript(
                        "single `&` is not an operator (use `&&`)".into(),
                    ));
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_none() {
                    return Err(EngineError::InvalidScript(
                        "single `|` is not an operator (use `||`)".into(),
                    ));
                }
                tokens.push(Token::Or);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped) => s.push(escaped),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(EngineError::InvalidScript(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if num.contains('.') {
                    let f: f64 = num.parse().map_err(|_| {
                        EngineError::InvalidScript(format!("invalid float `{num}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num.parse().map_err(|_| {
                        EngineError::InvalidScript(format!("invalid integer `{num}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "true" => tokens.push(Token::Ident("true".into())),
                    "false" => tokens.push(Token::Ident("false".into())),
                    "null" => tokens.push(Token::Ident("null".into())),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(EngineError::InvalidScript(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }

    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn descend(&mut self) -> Result<(), EngineError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EngineError::InvalidScript(format!(
                "expression nesting exceeds {MAX_NESTING} levels"
            )));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (cmp_op unary)?
    fn parse_comparison(&mut self) -> Result<Expr, EngineError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, EngineError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary();
            self.ascend();
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.parse_primary()
    }

    /// primary = literal | path | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Literal::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Literal::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Literal::Bool(true))),
                "false" => Ok(Expr::Literal(Literal::Bool(false))),
                "null" => Ok(Expr::Literal(Literal::Null)),
                _ => {
                    let mut path = vec![name];
                    while self.peek() == Some(&Token::Dot) {
                        self.advance();
                        match self.advance() {
                            Some(Token::Ident(seg)) => path.push(seg),
                            _ => {
                                return Err(EngineError::InvalidScript(
                                    "expected identifier after `.`".into(),
                                ));
                            }
                        }
                    }
                    Ok(Expr::Path(path))
                }
            },
            Some(Token::LParen) => {
                self.descend()?;
                let expr = self.parse_expr();
                self.ascend();
                let expr = expr?;
                if self.advance() != Some(Token::RParen) {
                    return Err(EngineError::InvalidScript(
                        "expected closing parenthesis `)`".into(),
                    ));
                }
                Ok(expr)
            }
            other => Err(EngineError::InvalidScript(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }
}

// ─── Evaluator ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum EvalValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Array(Vec<EvalValue>),
    Null,
}

impl EvalValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Int(n) => Some(*n as f64),
            EvalValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for EvalValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvalValue::Int(a), EvalValue::Int(b)) => a == b,
            (EvalValue::Float(a), EvalValue::Float(b)) => a == b,
            (EvalValue::Int(a), EvalValue::Float(b)) => (*a as f64) == *b,
            (EvalValue::Float(a), EvalValue::Int(b)) => *a == (*b as f64),
            (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
            (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
            (EvalValue::Null, EvalValue::Null) => true,
            _ => false,
        }
    }
}

struct Evaluator {
    steps_left: usize,
}

impl Evaluator {
    fn step(&mut self) -> Result<(), EngineError> {
        if self.steps_left == 0 {
            return Err(EngineError::ScriptRuntime(
                "evaluation step budget exhausted".into(),
            ));
        }
        self.steps_left -= 1;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, scope: &Value) -> Result<EvalValue, EngineError> {
        self.step()?;
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Int(n) => EvalValue::Int(*n),
                Literal::Float(f) => EvalValue::Float(*f),
                Literal::Str(s) => EvalValue::Str(s.clone()),
                Literal::Bool(b) => EvalValue::Bool(*b),
                Literal::Null => EvalValue::Null,
            }),
            Expr::Path(segments) => {
                let mut current = scope;
                for seg in segments {
                    current = current.get(seg).unwrap_or(&Value::Null);
                }
                Ok(json_to_eval(current))
            }
            Expr::Not(inner) => match self.eval(inner, scope)? {
                EvalValue::Bool(b) => Ok(EvalValue::Bool(!b)),
                _ => Err(EngineError::ScriptRuntime(
                    "`!` operator requires a boolean operand".into(),
                )),
            },
            Expr::In {
                element,
                collection,
            } => {
                let elem = self.eval(element, scope)?;
                match self.eval(collection, scope)? {
                    EvalValue::Array(items) => Ok(EvalValue::Bool(items.contains(&elem))),
                    _ => Err(EngineError::ScriptRuntime(
                        "`in` operator requires an array on the right side".into(),
                    )),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                match op {
                    BinaryOp::And => match (&l, &r) {
                        (EvalValue::Bool(a), EvalValue::Bool(b)) => Ok(EvalValue::Bool(*a && *b)),
                        _ => Err(EngineError::ScriptRuntime(
                            "`&&` requires boolean operands".into(),
                        )),
                    },
                    BinaryOp::Or => match (&l, &r) {
                        (EvalValue::Bool(a), EvalValue::Bool(b)) => Ok(EvalValue::Bool(*a || *b)),
                        _ => Err(EngineError::ScriptRuntime(
                            "`||` requires boolean operands".into(),
                        )),
                    },
                    BinaryOp::Eq => Ok(EvalValue::Bool(l == r)),
                    BinaryOp::Ne => Ok(EvalValue::Bool(l != r)),
                    BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => {
                        let (Some(lf), Some(rf)) = (l.as_f64(), r.as_f64()) else {
                            return Err(EngineError::ScriptRuntime(
                                "ordering comparison requires numeric operands".into(),
                            ));
                        };
                        let result = match op {
                            BinaryOp::Gt => lf > rf,
                            BinaryOp::Lt => lf < rf,
                            BinaryOp::Ge => lf >= rf,
                            BinaryOp::Le => lf <= rf,
                            _ => unreachable!(),
                        };
                        Ok(EvalValue::Bool(result))
                    }
                }
            }
        }
    }
}

fn json_to_eval(value: &Value) -> EvalValue {
    match value {
        Value::Null => EvalValue::Null,
        Value::Bool(b) => EvalValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                EvalValue::Float(f)
            } else {
                EvalValue::Null
            }
        }
        Value::String(s) => EvalValue::Str(s.clone()),
        Value::Array(arr) => EvalValue::Array(arr.iter().map(json_to_eval).collect()),
        // objects are opaque; comparing one is a type error downstream
        Value::Object(_) => EvalValue::Null,
    }
}
