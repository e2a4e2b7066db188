use crate::error::{CompileError, EvalError};
use crate::qrng::LowDiscrepancySequence;
use crate::traits::{DensityEquation, GapArgs, GapEquation, GapStep, Scalar};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Single-argument math functions understood by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Ln,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            _ => return None,
        };
        Some(func)
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Asin => a.asin(),
            Func::Acos => a.acos(),
            Func::Atan => a.atan(),
            Func::Sinh => a.sinh(),
            Func::Cosh => a.cosh(),
            Func::Tanh => a.tanh(),
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            Func::Sqrt => a.sqrt(),
            Func::Abs => a.abs(),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
            Func::Round => a.round(),
        }
    }
}

/// OpCodes for the Stack-based Virtual Machine.
///
/// Scalars and arrays live in separate slot tables. Arrays never reach the
/// stack: they are only read element-wise or through a reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the scalar in the given slot.
    LoadScalar(usize),
    /// Pops an index, pushes that element of the array in the given slot.
    LoadElement(usize),
    /// Pushes the sum of the array in the given slot.
    Sum(usize),
    /// Pushes the product of the array in the given slot.
    Prod(usize),
    /// Pushes the length of the array in the given slot.
    Len(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Func),
    /// Pops top two values (b, a), pushes min(a, b).
    Min,
    /// Pops top two values (b, a), pushes max(a, b).
    Max,
    /// Pops top two values (b, a), pushes atan2(a, b).
    Atan2,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `scalars`: Scalar slot values (read-only).
/// - `arrays`: Array slot values (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        scalars: &[T],
        arrays: &[&[T]],
        stack: &mut Vec<T>,
    ) -> Result<T, EvalError> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => {
                    let v = T::from_f64(val).ok_or(EvalError::Bytecode("constant out of range"))?;
                    stack.push(v);
                }
                OpCode::LoadScalar(slot) => {
                    let v = scalars
                        .get(slot)
                        .ok_or(EvalError::Bytecode("unknown scalar slot"))?;
                    stack.push(*v);
                }
                OpCode::LoadElement(slot) => {
                    let array = array_slot(arrays, slot)?;
                    let raw = pop(stack)?.to_f64().unwrap_or(f64::NAN);
                    let index = raw.round();
                    if !(index >= 0.0 && (raw - index).abs() < 1e-9 && (index as usize) < array.len())
                    {
                        return Err(EvalError::IndexOutOfRange {
                            index: raw,
                            len: array.len(),
                        });
                    }
                    stack.push(array[index as usize]);
                }
                OpCode::Sum(slot) => {
                    let array = array_slot(arrays, slot)?;
                    stack.push(array.iter().fold(T::zero(), |acc, &v| acc + v));
                }
                OpCode::Prod(slot) => {
                    let array = array_slot(arrays, slot)?;
                    stack.push(array.iter().fold(T::one(), |acc, &v| acc * v));
                }
                OpCode::Len(slot) => {
                    let array = array_slot(arrays, slot)?;
                    let len = T::from_usize(array.len())
                        .ok_or(EvalError::Bytecode("array length out of range"))?;
                    stack.push(len);
                }
                OpCode::Add => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.powf(b));
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack)?;
                    stack.push(func.apply(a));
                }
                OpCode::Min => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.min(b));
                }
                OpCode::Max => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.max(b));
                }
                OpCode::Atan2 => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.atan2(b));
                }
            }
        }

        pop(stack)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, EvalError> {
    stack.pop().ok_or(EvalError::Bytecode("stack underflow"))
}

fn pop_pair<T>(stack: &mut Vec<T>) -> Result<(T, T), EvalError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

fn array_slot<'a, T>(arrays: &[&'a [T]], slot: usize) -> Result<&'a [T], EvalError> {
    arrays
        .get(slot)
        .copied()
        .ok_or(EvalError::Bytecode("unknown array slot"))
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Index(String, Box<Expr>),           // array element, e.g. N[d]
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // -
    Call(String, Vec<Expr>),            // functions like sin(x) or max(a, b)
}

/// Which call contract an equation is compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationKind {
    /// `g(x, d, O, N, L)`: scalar term, axis and scale; origin and size arrays.
    Gap,
    /// `f(x, N)`: coordinate and size arrays.
    Density,
}

impl EquationKind {
    fn scalar_names(self) -> &'static [&'static str] {
        match self {
            EquationKind::Gap => &["x", "d", "L"],
            EquationKind::Density => &[],
        }
    }

    fn array_names(self) -> &'static [&'static str] {
        match self {
            EquationKind::Gap => &["O", "N"],
            EquationKind::Density => &["x", "N"],
        }
    }
}

struct Preset {
    name: &'static str,
    params: &'static [&'static str],
    body: &'static str,
}

const GAP_PARAMS: &[&str] = &["x", "d", "O", "N", "L"];

// Built-in functions expanded inline before compilation.
const PRESETS: &[Preset] = &[
    Preset {
        name: "poisrnd",
        params: &["x"],
        body: "-x - 2.0",
    },
    Preset {
        name: "poissongap",
        params: GAP_PARAMS,
        body: "poisrnd(L * sin((pi / 2) * (x + sum(O)) / sum(N)))",
    },
    Preset {
        name: "sinegap",
        params: GAP_PARAMS,
        body: "L * sin((pi / 2) * (x + sum(O)) / sum(N))",
    },
    Preset {
        name: "sineburst",
        params: GAP_PARAMS,
        body: "L * sin((pi / 2) * (x + sum(O)) / sum(N)) \
               * sin((pi / 4) * N[d] * (x + sum(O)) / sum(N))^2",
    },
];

fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// Replaces preset calls by their bodies, with arguments substituted.
fn expand(expr: &Expr) -> Result<Expr, CompileError> {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => Ok(expr.clone()),
        Expr::Index(name, index) => Ok(Expr::Index(name.clone(), Box::new(expand(index)?))),
        Expr::Binary(left, op, right) => Ok(Expr::Binary(
            Box::new(expand(left)?),
            *op,
            Box::new(expand(right)?),
        )),
        Expr::Unary(op, operand) => Ok(Expr::Unary(*op, Box::new(expand(operand)?))),
        Expr::Call(name, args) => {
            let args = args.iter().map(expand).collect::<Result<Vec<_>, _>>()?;
            let Some(preset) = find_preset(name) else {
                return Ok(Expr::Call(name.clone(), args));
            };
            if args.len() != preset.params.len() {
                return Err(CompileError::Arity {
                    name: name.clone(),
                    expected: preset.params.len(),
                    actual: args.len(),
                });
            }
            let bindings: HashMap<&str, &Expr> =
                preset.params.iter().copied().zip(args.iter()).collect();
            let body = substitute(&parse(preset.body)?, &bindings)?;
            expand(&body)
        }
    }
}

fn substitute(expr: &Expr, bindings: &HashMap<&str, &Expr>) -> Result<Expr, CompileError> {
    match expr {
        Expr::Number(_) => Ok(expr.clone()),
        Expr::Variable(name) => Ok(bindings
            .get(name.as_str())
            .map(|arg| (*arg).clone())
            .unwrap_or_else(|| expr.clone())),
        Expr::Index(name, index) => {
            let index = Box::new(substitute(index, bindings)?);
            match bindings.get(name.as_str()) {
                Some(Expr::Variable(array)) => Ok(Expr::Index(array.clone(), index)),
                Some(_) => Err(CompileError::ExpectedArray(name.clone())),
                None => Ok(Expr::Index(name.clone(), index)),
            }
        }
        Expr::Binary(left, op, right) => Ok(Expr::Binary(
            Box::new(substitute(left, bindings)?),
            *op,
            Box::new(substitute(right, bindings)?),
        )),
        Expr::Unary(op, operand) => Ok(Expr::Unary(*op, Box::new(substitute(operand, bindings)?))),
        Expr::Call(name, args) => Ok(Expr::Call(
            name.clone(),
            args.iter()
                .map(|arg| substitute(arg, bindings))
                .collect::<Result<Vec<_>, _>>()?,
        )),
    }
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable names to scalar or array slots of the equation kind.
pub struct Compiler {
    pub scalar_map: HashMap<String, usize>,
    pub array_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(kind: EquationKind) -> Self {
        let scalar_map = kind
            .scalar_names()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let array_map = kind
            .array_names()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self {
            scalar_map,
            array_map,
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, CompileError> {
        let expanded = expand(expr)?;
        let mut ops = Vec::new();
        self.compile_recursive(&expanded, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), CompileError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&slot) = self.scalar_map.get(name) {
                    ops.push(OpCode::LoadScalar(slot));
                } else if self.array_map.contains_key(name) {
                    return Err(CompileError::ArrayAsScalar(name.clone()));
                } else if name == "pi" {
                    ops.push(OpCode::LoadConst(PI));
                } else {
                    return Err(CompileError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Index(name, index) => {
                let slot = self.array_slot(name)?;
                self.compile_recursive(index, ops)?;
                ops.push(OpCode::LoadElement(slot));
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                match op {
                    '+' => ops.push(OpCode::Add),
                    '-' => ops.push(OpCode::Sub),
                    '*' => ops.push(OpCode::Mul),
                    '/' => ops.push(OpCode::Div),
                    '^' => ops.push(OpCode::Pow),
                    _ => return Err(CompileError::Parse(format!("Unknown binary operator: {op}"))),
                }
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => return Err(CompileError::Parse(format!("Unknown unary operator: {op}"))),
                }
            }
            Expr::Call(func, args) => self.compile_call(func, args, ops)?,
        }
        Ok(())
    }

    fn compile_call(
        &self,
        func: &str,
        args: &[Expr],
        ops: &mut Vec<OpCode>,
    ) -> Result<(), CompileError> {
        let expect_args = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CompileError::Arity {
                    name: func.to_string(),
                    expected,
                    actual: args.len(),
                })
            }
        };

        match func {
            "sum" | "prod" | "len" => {
                expect_args(1)?;
                let slot = match &args[0] {
                    Expr::Variable(name) => self.array_slot(name)?,
                    _ => return Err(CompileError::ExpectedArray(format!("argument of {func}"))),
                };
                ops.push(match func {
                    "sum" => OpCode::Sum(slot),
                    "prod" => OpCode::Prod(slot),
                    _ => OpCode::Len(slot),
                });
            }
            "min" | "max" | "atan2" => {
                expect_args(2)?;
                self.compile_recursive(&args[0], ops)?;
                self.compile_recursive(&args[1], ops)?;
                ops.push(match func {
                    "min" => OpCode::Min,
                    "max" => OpCode::Max,
                    _ => OpCode::Atan2,
                });
            }
            _ => {
                let f = Func::from_name(func)
                    .ok_or_else(|| CompileError::UnknownFunction(func.to_string()))?;
                expect_args(1)?;
                self.compile_recursive(&args[0], ops)?;
                ops.push(OpCode::Call(f));
            }
        }
        Ok(())
    }

    fn array_slot(&self, name: &str) -> Result<usize, CompileError> {
        if let Some(&slot) = self.array_map.get(name) {
            Ok(slot)
        } else if self.scalar_map.contains_key(name) || name == "pi" {
            Err(CompileError::ExpectedArray(name.to_string()))
        } else {
            Err(CompileError::UnknownSymbol(name.to_string()))
        }
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, CompileError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(CompileError::Parse(format!(
            "Unexpected trailing token {token:?}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| CompileError::Parse(format!("Invalid number: {num_str}")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                _ => return Err(CompileError::Parse(format!("Unexpected character '{c}'"))),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        match self.consume() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(CompileError::Parse(format!("Expected {expected:?}, found {t:?}"))),
            None => Err(CompileError::Parse(format!("Expected {expected:?}, found end of input"))),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // Right-associative; the exponent may carry its own sign.
    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.consume();
                    let mut args = Vec::new();
                    if let Some(Token::RParen) = self.peek() {
                        self.consume();
                        return Ok(Expr::Call(name, args));
                    }
                    loop {
                        args.push(self.parse_expression()?);
                        match self.consume() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(CompileError::Parse("Expected ',' or ')'".into())),
                        }
                    }
                    Ok(Expr::Call(name, args))
                }
                Some(Token::LBracket) => {
                    self.consume();
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    Ok(Expr::Index(name, Box::new(index)))
                }
                _ => Ok(Expr::Variable(name)),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(t) => Err(CompileError::Parse(format!("Unexpected token {t:?}"))),
            None => Err(CompileError::Parse("Unexpected end of input".into())),
        }
    }
}

// --- Gap laws ---

/// The gap laws available by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetGapLaw {
    /// Sine-weighted Poisson jitter.
    #[serde(rename = "poissongap")]
    PoissonGap,
    #[serde(rename = "sinegap")]
    SineGap,
    /// Sine gap modulated by a squared sine burst along the line.
    #[serde(rename = "sineburst")]
    SineBurst,
}

impl PresetGapLaw {
    pub const ALL: [PresetGapLaw; 3] = [
        PresetGapLaw::PoissonGap,
        PresetGapLaw::SineGap,
        PresetGapLaw::SineBurst,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PresetGapLaw::PoissonGap => "poissongap",
            PresetGapLaw::SineGap => "sinegap",
            PresetGapLaw::SineBurst => "sineburst",
        }
    }

    /// Gap equation text calling this preset with the standard arguments.
    pub fn expression(self) -> &'static str {
        match self {
            PresetGapLaw::PoissonGap => "poissongap(x, d, O, N, L)",
            PresetGapLaw::SineGap => "sinegap(x, d, O, N, L)",
            PresetGapLaw::SineBurst => "sineburst(x, d, O, N, L)",
        }
    }
}

impl fmt::Display for PresetGapLaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetGapLaw {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetGapLaw::ALL
            .into_iter()
            .find(|law| law.name() == s)
            .ok_or_else(|| CompileError::UnknownPreset(s.to_string()))
    }
}

// Caps the Poisson draw loop for absurd rates; such steps overshoot any line.
const POISSON_MAX_DRAWS: u32 = 1_000_000;

/// A user gap law compiled to bytecode.
///
/// The equation value is offset by one, so a law returning zero advances by one
/// cell. A negative value `g` requests a quasi-random step instead: a Poisson
/// variate with rate `-(g + 1)` drawn from the law's own generator.
pub struct CompiledGapLaw {
    bytecode: Bytecode,
    stack: Vec<f64>,
    origin: Vec<f64>,
    sizes: Vec<f64>,
    rng: LowDiscrepancySequence,
}

impl CompiledGapLaw {
    /// Compiles a gap expression, or a bare preset name such as `sinegap`.
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let source = source.trim();
        let source = match source.parse::<PresetGapLaw>() {
            Ok(law) => law.expression(),
            Err(_) => source,
        };
        let expr = parse(source)?;
        let bytecode = Compiler::new(EquationKind::Gap).compile(&expr)?;

        // Step once so the Poisson draws never see a zero.
        let mut rng = LowDiscrepancySequence::new(NonZeroUsize::MIN);
        rng.advance();

        Ok(Self {
            bytecode,
            stack: Vec::with_capacity(64),
            origin: Vec::new(),
            sizes: Vec::new(),
            rng,
        })
    }

    pub fn preset(law: PresetGapLaw) -> Result<Self, CompileError> {
        Self::compile(law.expression())
    }

    /// Knuth's counting method, in log space so large rates cannot underflow.
    fn poisson(&mut self, rate: f64) -> f64 {
        let mut k = 0u32;
        let mut log_p = 0.0;
        while k < POISSON_MAX_DRAWS {
            log_p += self.rng.advance()[0].ln();
            k += 1;
            if log_p < -rate {
                break;
            }
        }
        k as f64
    }
}

impl GapEquation for CompiledGapLaw {
    fn step(&mut self, args: &GapArgs<'_>) -> Result<GapStep, EvalError> {
        let in_domain = args.theta() <= 1.0;

        self.origin.clear();
        self.origin.extend(args.origin.iter().map(|&v| v as f64));
        self.sizes.clear();
        self.sizes.extend(args.sizes.iter().map(|&v| v as f64));

        let scalars = [args.x, args.axis as f64, args.scale];
        let arrays: [&[f64]; 2] = [&self.origin, &self.sizes];
        let g = VM::execute(&self.bytecode, &scalars, &arrays, &mut self.stack)? + 1.0;
        if !g.is_finite() {
            return Err(EvalError::NonFinite(g));
        }

        let increment = if g >= 0.0 { g } else { self.poisson(-(g + 1.0)) };
        Ok(GapStep {
            increment,
            in_domain,
        })
    }
}

// --- Densities ---

#[derive(Default)]
struct DensityScratch {
    stack: Vec<f64>,
    point: Vec<f64>,
    sizes: Vec<f64>,
}

/// A user density compiled to bytecode.
pub struct CompiledDensity {
    bytecode: Bytecode,
    // Interior mutability for the VM buffers so evaluation takes `&self`.
    // Note: This makes the density !Sync.
    scratch: RefCell<DensityScratch>,
}

impl CompiledDensity {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let expr = parse(source)?;
        let bytecode = Compiler::new(EquationKind::Density).compile(&expr)?;
        Ok(Self {
            bytecode,
            scratch: RefCell::new(DensityScratch::default()),
        })
    }
}

impl DensityEquation for CompiledDensity {
    fn density(&self, point: &[usize], sizes: &[usize]) -> Result<f64, EvalError> {
        let mut scratch = self.scratch.borrow_mut();
        let DensityScratch {
            stack,
            point: point_buf,
            sizes: sizes_buf,
        } = &mut *scratch;

        point_buf.clear();
        point_buf.extend(point.iter().map(|&v| v as f64));
        sizes_buf.clear();
        sizes_buf.extend(sizes.iter().map(|&v| v as f64));

        let arrays = [point_buf.as_slice(), sizes_buf.as_slice()];
        let value = VM::execute(&self.bytecode, &[], &arrays, stack)?;
        if !value.is_finite() {
            return Err(EvalError::NonFinite(value));
        }
        if value < 0.0 {
            return Err(EvalError::NegativeDensity(value));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_scalar(source: &str) -> f64 {
        let expr = parse(source).expect("expression should parse");
        let code = Compiler::new(EquationKind::Density)
            .compile(&expr)
            .expect("expression should compile");
        let empty: [&[f64]; 2] = [&[], &[]];
        let mut stack = Vec::new();
        VM::execute(&code, &[], &empty, &mut stack).expect("expression should run")
    }

    fn gap_args<'a>(
        x: f64,
        axis: usize,
        origin: &'a [usize],
        sizes: &'a [usize],
        scale: f64,
    ) -> GapArgs<'a> {
        GapArgs {
            x,
            axis,
            origin,
            sizes,
            scale,
        }
    }

    fn assert_compile_err(source: &str, kind: EquationKind, needle: &str) {
        let result = parse(source).and_then(|expr| Compiler::new(kind).compile(&expr));
        let err = result.expect_err("expected compile error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn operator_precedence_and_associativity() {
        assert_eq!(eval_scalar("1 + 2 * 3 ^ 2"), 19.0);
        assert_eq!(eval_scalar("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_scalar("-2 ^ 2"), -4.0);
        assert_eq!(eval_scalar("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval_scalar("2 ^ -1"), 0.5);
        assert_eq!(eval_scalar("8 / 4 / 2"), 1.0);
        assert_eq!(eval_scalar("1.5e1 - 5"), 10.0);
    }

    #[test]
    fn functions_and_constants() {
        assert!((eval_scalar("sin(pi / 2)") - 1.0).abs() < 1e-15);
        assert_eq!(eval_scalar("max(2, 3) + min(2, 3)"), 5.0);
        assert_eq!(eval_scalar("sqrt(16) + abs(-1) + floor(2.7)"), 7.0);
        assert!((eval_scalar("ln(exp(2))") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn density_reads_coordinate_and_sizes() {
        let density = CompiledDensity::compile("x[0] * N[1] + x[1] + sum(x) + len(N) + prod(N)")
            .expect("density should compile");
        let value = density.density(&[2, 3], &[4, 5]).expect("density should evaluate");
        assert_eq!(value, 2.0 * 5.0 + 3.0 + 5.0 + 2.0 + 20.0);
    }

    #[test]
    fn gap_law_reads_all_arguments() {
        let mut law = CompiledGapLaw::compile("x + d + L + N[d] + sum(O)").expect("law should compile");
        let step = law
            .step(&gap_args(1.5, 1, &[3, 0], &[8, 16], 2.0))
            .expect("law should evaluate");
        // Offset by one: a law value v advances the term by v + 1.
        assert_eq!(step.increment, 1.5 + 1.0 + 2.0 + 16.0 + 3.0 + 1.0);
        assert!(step.in_domain);
    }

    #[test]
    fn gap_law_flags_inputs_outside_domain() {
        let mut law = CompiledGapLaw::compile("L").expect("law should compile");
        let inside = law.step(&gap_args(16.0, 0, &[0], &[16], 1.0)).expect("step");
        assert!(inside.in_domain);
        let outside = law.step(&gap_args(16.5, 0, &[0], &[16], 1.0)).expect("step");
        assert!(!outside.in_domain);
        assert_eq!(outside.increment, 2.0);
    }

    #[test]
    fn sine_presets_match_their_formulas() {
        let origin = [2, 0];
        let sizes = [8, 12];
        let args = gap_args(3.0, 1, &origin, &sizes, 4.0);
        let theta = (3.0 + 2.0) / 20.0;

        let mut sine = CompiledGapLaw::compile("sinegap").expect("bare preset name");
        let expected = 4.0 * (PI / 2.0 * theta).sin() + 1.0;
        let step = sine.step(&args).expect("sinegap");
        assert!((step.increment - expected).abs() < 1e-12);

        let mut burst =
            CompiledGapLaw::preset(PresetGapLaw::SineBurst).expect("sineburst should compile");
        let expected = 4.0 * (PI / 2.0 * theta).sin() * (PI / 4.0 * 12.0 * theta).sin().powi(2) + 1.0;
        let step = burst.step(&args).expect("sineburst");
        assert!((step.increment - expected).abs() < 1e-12);
    }

    #[test]
    fn poisson_preset_yields_positive_integer_steps() {
        let mut law = CompiledGapLaw::compile("poissongap(x, d, O, N, L)").expect("poissongap");
        let mut total = 0.0;
        for i in 0..200 {
            let x = (i % 16) as f64;
            let step = law.step(&gap_args(x, 0, &[0], &[16], 3.0)).expect("step");
            assert!(step.increment >= 1.0);
            assert_eq!(step.increment.fract(), 0.0);
            total += step.increment;
        }
        assert!(total > 200.0, "Poisson steps should average above one");
    }

    #[test]
    fn poisson_draws_are_reproducible() {
        let mut a = CompiledGapLaw::preset(PresetGapLaw::PoissonGap).expect("poissongap");
        let mut b = CompiledGapLaw::preset(PresetGapLaw::PoissonGap).expect("poissongap");
        for i in 0..50 {
            let args = gap_args(i as f64 * 0.25, 0, &[0], &[16], 2.0);
            assert_eq!(a.step(&args).expect("a"), b.step(&args).expect("b"));
        }
    }

    #[test]
    fn preset_names_round_trip() {
        for law in PresetGapLaw::ALL {
            assert_eq!(law.name().parse::<PresetGapLaw>().expect("known preset"), law);
            assert!(law.expression().starts_with(law.name()));
        }
        assert!("gauss".parse::<PresetGapLaw>().is_err());
    }

    #[test]
    fn compile_errors_are_reported() {
        assert_compile_err("y + 1", EquationKind::Gap, "Unknown variable: y");
        assert_compile_err("foo(x)", EquationKind::Gap, "Unknown function: foo");
        assert_compile_err("sin(x, L)", EquationKind::Gap, "expects 1 argument");
        assert_compile_err("sinegap(x, d)", EquationKind::Gap, "expects 5 argument");
        assert_compile_err("N + 1", EquationKind::Gap, "N is an array");
        assert_compile_err("x + 1", EquationKind::Density, "x is an array");
        assert_compile_err("L[0]", EquationKind::Gap, "L is not an array");
        assert_compile_err("sum(x + 1)", EquationKind::Density, "not an array");
        assert_compile_err("1 +", EquationKind::Gap, "Parse error");
        assert_compile_err("(1", EquationKind::Gap, "Parse error");
        assert_compile_err("1 $ 2", EquationKind::Gap, "Unexpected character");
        assert_compile_err("1 2", EquationKind::Gap, "trailing token");
    }

    #[test]
    fn evaluation_faults_are_reported() {
        let density = CompiledDensity::compile("N[5]").expect("compiles");
        let err = density.density(&[0], &[4]).expect_err("index should fault");
        assert!(matches!(err, EvalError::IndexOutOfRange { len: 1, .. }));

        let density = CompiledDensity::compile("x[0] - 1").expect("compiles");
        let err = density.density(&[0], &[4]).expect_err("negative should fault");
        assert_eq!(err, EvalError::NegativeDensity(-1.0));

        let density = CompiledDensity::compile("log(x[0])").expect("compiles");
        assert!(matches!(
            density.density(&[0], &[4]),
            Err(EvalError::NonFinite(_))
        ));

        let mut law = CompiledGapLaw::compile("1 / (x - x)").expect("compiles");
        assert!(matches!(
            law.step(&gap_args(1.0, 0, &[0], &[4], 1.0)),
            Err(EvalError::NonFinite(_))
        ));
    }
}
