//! Error types for grid arithmetic, equation handling and schedule generation.

use thiserror::Error;

/// Errors raised by grid construction and coordinate packing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Grid must have between 1 and {max} dimensions, got {dims}")]
    Dimensionality { dims: usize, max: usize },

    #[error("Invalid N{axis} grid size: sizes must be positive")]
    ZeroSize { axis: usize },

    #[error("Grid with sizes {sizes:?} has too many cells")]
    Overflow { sizes: Vec<usize> },

    #[error("Tuple length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Coordinate {value} along axis {axis} exceeds grid size {size}")]
    CoordinateOutOfRange {
        axis: usize,
        value: usize,
        size: usize,
    },

    #[error("Linear index {index} out of range for a grid of {total} cells")]
    IndexOutOfRange { index: usize, total: usize },
}

/// Errors raised while turning equation text into bytecode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown variable: {0}")]
    UnknownSymbol(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0} is an array and cannot be used as a scalar")]
    ArrayAsScalar(String),

    #[error("{0} is not an array")]
    ExpectedArray(String),

    #[error("Unknown preset gap law: {0}")]
    UnknownPreset(String),
}

/// Hard faults raised by an equation while it is being evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: f64, len: usize },

    #[error("Equation produced a non-finite value ({0})")]
    NonFinite(f64),

    #[error("Density must be non-negative, got {0}")]
    NegativeDensity(f64),

    #[error("Malformed bytecode: {0}")]
    Bytecode(&'static str),
}

/// Failures of the schedule generators themselves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("Sampling density must lie in (0,1), got {0}")]
    InvalidDensity(f64),

    #[error("Density {density} selects no points from a grid of {total} cells")]
    EmptyTarget { density: f64, total: usize },

    #[error("Density equation is zero over the whole grid")]
    DegenerateDensity,

    #[error("Sampling exhausted the grid after {produced} of {target} points")]
    Exhausted { produced: usize, target: usize },

    #[error("Gap equation never produced a well-behaved sequence in {iterations} iterations")]
    NoWellBehavedAttempt { iterations: usize },
}
