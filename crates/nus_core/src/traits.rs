use crate::error::EvalError;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::fmt::Debug;

/// A trait for types the equation VM can compute with.
/// Must support basic arithmetic, debug printing, and conversion to and from f64.
pub trait Scalar: Float + FromPrimitive + ToPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + ToPrimitive + Debug + 'static> Scalar for T {}

/// Inputs of one gap-equation call: the current term along a line, the line's
/// axis and origin, the grid sizes and the scale factor being calibrated.
#[derive(Debug, Clone, Copy)]
pub struct GapArgs<'a> {
    pub x: f64,
    pub axis: usize,
    pub origin: &'a [usize],
    pub sizes: &'a [usize],
    pub scale: f64,
}

impl GapArgs<'_> {
    /// Angular argument `(x + ΣO) / ΣN`; gap laws are defined for values up to 1.
    pub fn theta(&self) -> f64 {
        let origin: usize = self.origin.iter().sum();
        let sizes: usize = self.sizes.iter().sum();
        (self.x + origin as f64) / sizes as f64
    }
}

/// Result of one gap-equation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapStep {
    /// Additive increment applied to the current term.
    pub increment: f64,
    /// False when the inputs lay outside the equation's valid domain.
    pub in_domain: bool,
}

/// A gap law: produces the spacing between consecutive terms along a line.
///
/// Evaluators may carry state (the Poisson branch draws from its own sequence),
/// hence `&mut self`.
pub trait GapEquation {
    fn step(&mut self, args: &GapArgs<'_>) -> Result<GapStep, EvalError>;
}

/// A density over the grid, evaluated once per cell.
pub trait DensityEquation {
    fn density(&self, point: &[usize], sizes: &[usize]) -> Result<f64, EvalError>;
}

impl<F> GapEquation for F
where
    F: FnMut(&GapArgs<'_>) -> f64,
{
    fn step(&mut self, args: &GapArgs<'_>) -> Result<GapStep, EvalError> {
        Ok(GapStep {
            increment: self(args),
            in_domain: args.theta() <= 1.0,
        })
    }
}

impl<F> DensityEquation for F
where
    F: Fn(&[usize], &[usize]) -> f64,
{
    fn density(&self, point: &[usize], sizes: &[usize]) -> Result<f64, EvalError> {
        Ok(self(point, sizes))
    }
}
