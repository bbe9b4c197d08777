/// Safe expression language — tokenizing, parsing and evaluation.
///
/// Timelines never execute host code. Conditions, assigned values, call
/// arguments, step keys and `raw-exec` statements all go through this
/// small grammar instead.
use std::cmp::Ordering;
use thiserror::Error;

use crate::schema::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error in '{input}' at column {column}: {message}")]
    Syntax {
        input: String,
        column: usize,
        message: String,
    },
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{func}() expects {expected} argument(s), got {found}")]
    Arity {
        func: String,
        expected: &'static str,
        found: usize,
    },
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
    #[error("'{target}' has no attribute '{attr}'")]
    MissingAttribute { target: String, attr: String },
    #[error("'{0}' is not available in a constant expression")]
    NotConstant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A bare name such as `step`, supplied by the environment.
    Name(String),
    /// `target.attr`
    Attribute { target: String, attr: String },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Builtin function call: `watched("intro")`.
    Call { func: String, args: Vec<Expr> },
}

/// One `raw-exec` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `target.attr = expr`
    Assign {
        target: String,
        attr: String,
        value: Expr,
    },
    /// `target.method(args...)`
    Call {
        target: String,
        method: String,
        args: Vec<Expr>,
    },
    /// A bare expression, evaluated and discarded.
    Eval(Expr),
}

/// What an expression can see of the running game.
pub trait Environment {
    fn attribute(&self, target: &str, attr: &str) -> Result<Value, ExprError>;

    fn variable(&self, _name: &str) -> Option<Value> {
        None
    }

    fn is_watched(&self, _name: &str) -> bool {
        false
    }

    fn exists(&self, _target: &str) -> bool {
        false
    }

    /// A uniform sample in `[0, 1)`, or `None` where randomness is not
    /// allowed.
    fn random(&mut self) -> Option<f64> {
        None
    }

    /// A uniform integer in `[lo, hi]`, or `None` where randomness is not
    /// allowed.
    fn random_int(&mut self, _lo: i64, _hi: i64) -> Option<i64> {
        None
    }
}

/// Environment for load-time evaluation: numbers and operators only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantEnv;

impl Environment for ConstantEnv {
    fn attribute(&self, target: &str, attr: &str) -> Result<Value, ExprError> {
        Err(ExprError::NotConstant(format!("{}.{}", target, attr)))
    }
}

/// Parse and evaluate a single expression.
pub fn evaluate(input: &str, env: &mut dyn Environment) -> Result<Value, ExprError> {
    let expr = parse(input)?;
    eval(&expr, env)
}

/// Evaluate an expression that may not touch the game (step keys).
pub fn evaluate_constant(input: &str) -> Result<Value, ExprError> {
    evaluate(input, &mut ConstantEnv)
}

/// Parse an expression.
///
/// Grammar, loosest binding first:
/// - `a or b`, `a || b`
/// - `a and b`, `a && b`
/// - `not a`, `!a`
/// - `a == b`, `!=`, `<`, `<=`, `>`, `>=` (not chained)
/// - `a + b`, `a - b`
/// - `a * b`, `a / b`, `a % b`
/// - `-a`
/// - literals (`12`, `1.5`, `"text"`, `'text'`, `true`, `false`, `none`),
///   `target.attr`, `name`, `func(args)`, `( ... )`
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(input, &tokens);
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a `;`-separated statement list for `raw-exec`.
pub fn parse_statements(input: &str) -> Result<Vec<Statement>, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(input, &tokens);
    let mut statements = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.at_end() {
            break;
        }
        statements.push(parser.statement()?);
        if !parser.at_end() && !parser.eat(&Token::Semicolon) {
            return Err(parser.error("expected ';' between statements"));
        }
    }
    Ok(statements)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(BinaryOp),
    Bang,
    Assign,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |column: usize, message: &str| ExprError::Syntax {
        input: input.to_string(),
        column,
        message: message.to_string(),
    };

    while i < len {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i + 1 < len && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_float = true;
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = if is_float {
                Token::Float(text.parse().map_err(|_| syntax(start, "bad number"))?)
            } else {
                Token::Int(text.parse().map_err(|_| syntax(start, "integer too large"))?)
            };
            tokens.push((token, start));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.as_str() {
                "and" => Token::Op(BinaryOp::And),
                "or" => Token::Op(BinaryOp::Or),
                "not" => Token::Bang,
                _ => Token::Ident(word),
            };
            tokens.push((token, start));
            continue;
        }

        if c == '"' || c == '\'' {
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < len {
                match chars[i] {
                    '\\' if i + 1 < len => {
                        text.push(match chars[i + 1] {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    ch if ch == c => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    ch => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(syntax(start, "unterminated string"));
            }
            tokens.push((Token::Str(text), start));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Op(BinaryOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(BinaryOp::Ne), 2),
            ('<', Some('=')) => (Token::Op(BinaryOp::Le), 2),
            ('>', Some('=')) => (Token::Op(BinaryOp::Ge), 2),
            ('&', Some('&')) => (Token::Op(BinaryOp::And), 2),
            ('|', Some('|')) => (Token::Op(BinaryOp::Or), 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Op(BinaryOp::Lt), 1),
            ('>', _) => (Token::Op(BinaryOp::Gt), 1),
            ('+', _) => (Token::Op(BinaryOp::Add), 1),
            ('-', _) => (Token::Op(BinaryOp::Sub), 1),
            ('*', _) => (Token::Op(BinaryOp::Mul), 1),
            ('/', _) => (Token::Op(BinaryOp::Div), 1),
            ('%', _) => (Token::Op(BinaryOp::Rem), 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semicolon, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            _ => return Err(syntax(start, &format!("unexpected character '{}'", c))),
        };
        tokens.push((token, start));
        i += width;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Depth limit for parsed trees: parentheses, prefix operators, call
/// arguments and chained binary operators all count.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    input: &'a str,
    tokens: &'a [(Token, usize)],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: &'a [(Token, usize)]) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn deeper(&mut self) -> Result<(), ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        self.deeper()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Left-associative chain of `ops` over `operand`. Every link deepens
    /// the tree by one.
    fn chain(
        &mut self,
        ops: &[BinaryOp],
        operand: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut lhs = operand(self)?;
        while let Some(op) = self.eat_op(ops) {
            self.deeper()?;
            let rhs = operand(self)?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn error(&self, message: &str) -> ExprError {
        let column = self
            .tokens
            .get(self.pos)
            .map(|(_, col)| *col)
            .unwrap_or_else(|| self.input.chars().count());
        ExprError::Syntax {
            input: self.input.to_string(),
            column,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), ExprError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn eat_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn ident(&mut self, message: &str) -> Result<String, ExprError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    fn statement(&mut self) -> Result<Statement, ExprError> {
        let is_member = matches!(
            (self.peek(), self.peek_at(1), self.peek_at(2)),
            (Some(Token::Ident(_)), Some(Token::Dot), Some(Token::Ident(_)))
        );
        if is_member {
            match self.peek_at(3) {
                Some(Token::Assign) => {
                    let target = self.ident("expected target")?;
                    self.pos += 1;
                    let attr = self.ident("expected attribute")?;
                    self.pos += 1;
                    let value = self.expression()?;
                    return Ok(Statement::Assign {
                        target,
                        attr,
                        value,
                    });
                }
                Some(Token::LParen) => {
                    let target = self.ident("expected target")?;
                    self.pos += 1;
                    let method = self.ident("expected method")?;
                    let args = self.arguments()?;
                    return Ok(Statement::Call {
                        target,
                        method,
                        args,
                    });
                }
                _ => {}
            }
        }
        Ok(Statement::Eval(self.expression()?))
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        self.chain(&[BinaryOp::Or], Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        self.chain(&[BinaryOp::And], Self::not_expr)
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            let inner = self.nested(Self::not_expr)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        const COMPARISONS: [BinaryOp; 6] = [
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
        ];
        let lhs = self.sum()?;
        if let Some(op) = self.eat_op(&COMPARISONS) {
            let rhs = self.sum()?;
            if self.eat_op(&COMPARISONS).is_some() {
                return Err(self.error("comparisons cannot be chained"));
            }
            return Ok(binary(op, lhs, rhs));
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        self.chain(&[BinaryOp::Add, BinaryOp::Sub], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        self.chain(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op(&[BinaryOp::Sub]).is_some() {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat_op(&[BinaryOp::Add]).is_some() {
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error("unexpected end of expression")),
        };
        self.pos += 1;

        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::LParen => {
                let inner = self.nested(Self::expression)?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.eat(&Token::Dot) {
                    let attr = self.ident("expected attribute name after '.'")?;
                    if self.peek() == Some(&Token::LParen) {
                        return Err(self.error("method calls are only allowed as statements"));
                    }
                    return Ok(Expr::Attribute { target: name, attr });
                }
                if self.peek() == Some(&Token::LParen) {
                    let args = self.arguments()?;
                    return Ok(Expr::Call { func: name, args });
                }
                Ok(match name.as_str() {
                    "true" | "True" => Expr::Literal(Value::Bool(true)),
                    "false" | "False" => Expr::Literal(Value::Bool(false)),
                    "none" | "None" => Expr::Literal(Value::None),
                    _ => Expr::Name(name),
                })
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a value"))
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.expect(&Token::LParen, "expected '('")?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::expression)?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "expected ',' or ')'")?;
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn eval(expr: &Expr, env: &mut dyn Environment) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => env
            .variable(name)
            .ok_or_else(|| ExprError::UnknownName(name.clone())),
        Expr::Attribute { target, attr } => env.attribute(target, attr),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, env)?.truthy())),
        Expr::Neg(inner) => match eval(inner, env)? {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(ExprError::Overflow("-")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ExprError::TypeMismatch {
                op: "-",
                lhs: other.type_name(),
                rhs: other.type_name(),
            }),
        },
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                let left = eval(lhs, env)?.truthy();
                Ok(Value::Bool(left && eval(rhs, env)?.truthy()))
            }
            BinaryOp::Or => {
                let left = eval(lhs, env)?.truthy();
                Ok(Value::Bool(left || eval(rhs, env)?.truthy()))
            }
            _ => {
                let left = eval(lhs, env)?;
                let right = eval(rhs, env)?;
                apply_binary(*op, left, right)
            }
        },
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env)?);
            }
            call_builtin(func, values, env)
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    let mismatch = |lhs: &Value, rhs: &Value| ExprError::TypeMismatch {
        op: op.symbol(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => arithmetic(op, &lhs, &rhs, i64::checked_add, |a, b| a + b)
                .ok_or_else(|| mismatch(&lhs, &rhs))?,
        },
        BinaryOp::Sub => arithmetic(op, &lhs, &rhs, i64::checked_sub, |a, b| a - b)
            .ok_or_else(|| mismatch(&lhs, &rhs))?,
        BinaryOp::Mul => arithmetic(op, &lhs, &rhs, i64::checked_mul, |a, b| a * b)
            .ok_or_else(|| mismatch(&lhs, &rhs))?,
        BinaryOp::Div => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Err(mismatch(&lhs, &rhs));
            };
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::Rem => {
            if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
                if *b == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                return a
                    .checked_rem_euclid(*b)
                    .map(Value::Int)
                    .ok_or(ExprError::Overflow("%"));
            }
            match (lhs.as_f64(), rhs.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => Err(ExprError::DivisionByZero),
                (Some(a), Some(b)) => Ok(Value::Float(a.rem_euclid(b))),
                _ => Err(mismatch(&lhs, &rhs)),
            }
        }
        BinaryOp::And => Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
        BinaryOp::Or => Ok(Value::Bool(lhs.truthy() || rhs.truthy())),
    }
}

/// Integer arithmetic when both sides are ints, float otherwise. `None`
/// when either side is not numeric.
fn arithmetic(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Result<Value, ExprError>> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(
            int_op(*a, *b)
                .map(Value::Int)
                .ok_or(ExprError::Overflow(op.symbol())),
        ),
        _ => {
            let a = lhs.as_f64()?;
            let b = rhs.as_f64()?;
            Some(Ok(Value::Float(float_op(a, b))))
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::None, Value::None) => true,
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::None, _) | (_, Value::None) => false,
        _ => lhs.as_f64() == rhs.as_f64(),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::None, _) | (_, Value::None) => None,
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}

fn call_builtin(func: &str, args: Vec<Value>, env: &mut dyn Environment) -> Result<Value, ExprError> {
    let arity = |expected: &'static str| ExprError::Arity {
        func: func.to_string(),
        expected,
        found: args.len(),
    };

    match func {
        "watched" | "exists" => {
            let [Value::Str(name)] = args.as_slice() else {
                return Err(arity("1 string"));
            };
            Ok(Value::Bool(if func == "watched" {
                env.is_watched(name)
            } else {
                env.exists(name)
            }))
        }
        "random" => {
            if !args.is_empty() {
                return Err(arity("0"));
            }
            Ok(Value::Float(roll(func, env)?))
        }
        "chance" => {
            let p = match args.as_slice() {
                [p] => p.as_f64().ok_or_else(|| arity("1 numeric"))?,
                _ => return Err(arity("1 numeric")),
            };
            Ok(Value::Bool(roll(func, env)? < p))
        }
        "randint" => {
            let (lo, hi) = match args.as_slice() {
                [Value::Int(lo), Value::Int(hi)] if lo <= hi => (*lo, *hi),
                _ => return Err(arity("2 ordered integer")),
            };
            env.random_int(lo, hi)
                .map(Value::Int)
                .ok_or_else(|| ExprError::NotConstant(format!("{}()", func)))
        }
        "abs" => match args.as_slice() {
            [Value::Int(i)] => i.checked_abs().map(Value::Int).ok_or(ExprError::Overflow("abs")),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            _ => Err(arity("1 numeric")),
        },
        "min" | "max" => {
            let mut iter = args.iter();
            let mut best = iter.next().ok_or_else(|| arity("at least 1"))?;
            for candidate in iter {
                let ordering = compare(candidate, best).ok_or_else(|| ExprError::TypeMismatch {
                    op: if func == "min" { "min" } else { "max" },
                    lhs: candidate.type_name(),
                    rhs: best.type_name(),
                })?;
                let better = if func == "min" {
                    ordering == Ordering::Less
                } else {
                    ordering == Ordering::Greater
                };
                if better {
                    best = candidate;
                }
            }
            Ok(best.clone())
        }
        _ => Err(ExprError::UnknownFunction(func.to_string())),
    }
}

fn roll(func: &str, env: &mut dyn Environment) -> Result<f64, ExprError> {
    env.random()
        .ok_or_else(|| ExprError::NotConstant(format!("{}()", func)))
}
