use crate::error::{EvalError, SamplingError};
use crate::grid::{Grid, GridIndex};
use crate::traits::DensityEquation;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Limits shared by the density-driven samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    /// Generator draws allowed per requested point before giving up.
    pub max_draws_per_sample: usize,
    /// Draws discarded from the jittered sampler's generator before use.
    pub warmup_draws: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_draws_per_sample: 100_000,
            warmup_draws: 100,
        }
    }
}

impl SamplerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_draws_per_sample == 0 {
            bail!("max_draws_per_sample must be greater than zero.");
        }
        Ok(())
    }
}

/// Number of schedule points requested by `density` on `grid`.
///
/// The density must lie strictly inside (0,1) and select at least one cell.
pub fn target_count(grid: &Grid, density: f64) -> Result<usize, SamplingError> {
    if !(density > 0.0 && density < 1.0) {
        return Err(SamplingError::InvalidDensity(density));
    }
    let n = grid.target_count(density);
    if n == 0 {
        return Err(SamplingError::EmptyTarget {
            density,
            total: grid.total(),
        });
    }
    Ok(n)
}

/// Per-cell sampling weights, indexed by linear index.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityField {
    values: Vec<f64>,
}

impl DensityField {
    /// Evaluates `equation` once at every coordinate of `grid`.
    pub fn evaluate<E>(grid: &Grid, equation: &E) -> Result<Self>
    where
        E: DensityEquation + ?Sized,
    {
        let sizes = grid.sizes().as_slice();
        let mut coord = GridIndex::zeros(grid.dims());
        let mut values = Vec::with_capacity(grid.total());

        for index in 0..grid.total() {
            coord.unpack_from(index, grid.sizes())?;
            let value = equation
                .density(coord.as_slice(), sizes)
                .and_then(check_value)
                .with_context(|| format!("Density evaluation failed at coordinate ({coord})"))?;
            values.push(value);
        }

        Ok(Self { values })
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Cells that can ever be accepted.
    pub fn positive_count(&self) -> usize {
        self.values.iter().filter(|&&v| v > 0.0).count()
    }

    /// Scales the field so its largest value is 1.
    pub fn normalize_by_max(&mut self) -> Result<(), SamplingError> {
        let max = self.max();
        self.scale_by(max)
    }

    /// Scales the field so its values sum to 1.
    pub fn normalize_by_sum(&mut self) -> Result<(), SamplingError> {
        let sum = self.sum();
        self.scale_by(sum)
    }

    fn scale_by(&mut self, divisor: f64) -> Result<(), SamplingError> {
        if !(divisor > 0.0 && divisor.is_finite()) {
            return Err(SamplingError::DegenerateDensity);
        }
        self.values.iter_mut().for_each(|v| *v /= divisor);
        Ok(())
    }
}

// Closures bypass the interpreter's checks, so every value is screened here.
fn check_value(value: f64) -> Result<f64, EvalError> {
    if !value.is_finite() {
        Err(EvalError::NonFinite(value))
    } else if value < 0.0 {
        Err(EvalError::NegativeDensity(value))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::CompiledDensity;

    fn ramp(point: &[usize], _sizes: &[usize]) -> f64 {
        point[0] as f64 + 2.0 * point[1] as f64
    }

    fn signed(point: &[usize], _sizes: &[usize]) -> f64 {
        point[0] as f64 - 1.0
    }

    #[test]
    fn evaluates_every_cell_in_linear_order() {
        let grid = Grid::new(&[3, 2]).expect("grid");
        let field = DensityField::evaluate(&grid, &ramp).expect("field should evaluate");
        assert_eq!(field.values(), &[0.0, 1.0, 2.0, 2.0, 3.0, 4.0]);
        assert_eq!(field.positive_count(), 5);
        assert_eq!(field.max(), 4.0);
        assert_eq!(field.sum(), 12.0);
    }

    #[test]
    fn normalisation_by_max_and_sum() {
        let grid = Grid::new(&[3, 2]).expect("grid");
        let mut by_max = DensityField::evaluate(&grid, &ramp).expect("field");
        by_max.normalize_by_max().expect("normalize by max");
        assert_eq!(by_max.get(5), 1.0);
        assert_eq!(by_max.get(1), 0.25);

        let mut by_sum = DensityField::evaluate(&grid, &ramp).expect("field");
        by_sum.normalize_by_sum().expect("normalize by sum");
        assert!((by_sum.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_field_is_degenerate() {
        let mut field = DensityField::from_values(vec![0.0; 4]);
        assert_eq!(field.normalize_by_sum(), Err(SamplingError::DegenerateDensity));
        assert_eq!(field.normalize_by_max(), Err(SamplingError::DegenerateDensity));
    }

    #[test]
    fn negative_density_reports_coordinate() {
        let grid = Grid::new(&[4]).expect("grid");
        let err = DensityField::evaluate(&grid, &signed).expect_err("negative density");
        let message = format!("{err:#}");
        assert!(message.contains("coordinate (0)"), "got {message}");
        assert!(message.contains("non-negative"), "got {message}");
    }

    #[test]
    fn compiled_densities_plug_in() {
        let grid = Grid::new(&[4, 4]).expect("grid");
        let density = CompiledDensity::compile("exp(-(x[0] + x[1]) / 8)").expect("compile");
        let field = DensityField::evaluate(&grid, &density).expect("field");
        assert_eq!(field.len(), 16);
        assert_eq!(field.get(0), 1.0);
        assert!(field.get(15) < field.get(5));
    }

    #[test]
    fn target_count_validates_density() {
        let grid = Grid::new(&[16]).expect("grid");
        assert_eq!(target_count(&grid, 0.5), Ok(8));
        assert_eq!(target_count(&grid, 1.0), Err(SamplingError::InvalidDensity(1.0)));
        assert_eq!(target_count(&grid, 0.0), Err(SamplingError::InvalidDensity(0.0)));
        assert!(matches!(
            target_count(&grid, f64::NAN),
            Err(SamplingError::InvalidDensity(_))
        ));
        assert_eq!(
            target_count(&grid, 0.01),
            Err(SamplingError::EmptyTarget {
                density: 0.01,
                total: 16
            })
        );
    }
}
