//! Quasirandom rejection sampling.
//!
//! A (D+1)-stream low-discrepancy generator proposes a cell with its first D
//! streams and an acceptance level with the last one. The density is scaled
//! so its maximum is 1, making the acceptance test a plain comparison.

use crate::density::{target_count, DensityField, SamplerSettings};
use crate::error::SamplingError;
use crate::grid::Grid;
use crate::qrng::LowDiscrepancySequence;
use crate::traits::DensityEquation;
use crate::unique::UniqueIndexSet;
use anyhow::Result;
use log::info;
use std::num::NonZeroUsize;

pub fn generate_rejection_schedule<E>(
    grid: &Grid,
    density: f64,
    equation: &E,
    settings: SamplerSettings,
) -> Result<Vec<usize>>
where
    E: DensityEquation + ?Sized,
{
    settings.validate()?;
    let target = target_count(grid, density)?;
    let mut field = DensityField::evaluate(grid, equation)?;
    field.normalize_by_max()?;

    let reachable = field.positive_count();
    if reachable < target {
        return Err(SamplingError::Exhausted {
            produced: reachable,
            target,
        }
        .into());
    }

    let dims = grid.dims();
    // One stream per axis plus one for the acceptance test.
    let mut rng = LowDiscrepancySequence::new(NonZeroUsize::MIN.saturating_add(dims));
    let budget = settings.max_draws_per_sample.saturating_mul(target);
    let mut coord = vec![0usize; dims];
    let mut samples = UniqueIndexSet::new();
    let mut draws = 0usize;

    while samples.len() < target {
        if draws == budget {
            return Err(SamplingError::Exhausted {
                produced: samples.len(),
                target,
            }
            .into());
        }
        draws += 1;

        let u = rng.advance();
        for (axis, slot) in coord.iter_mut().enumerate() {
            *slot = (u[axis] * (grid.size(axis) - 1) as f64).round() as usize;
        }
        let accept = u[dims];
        let index = grid.pack(&coord)?;
        if accept <= field.get(index) {
            samples.insert(index);
        }
    }

    info!("rejection schedule: {target} points after {draws} draws");
    Ok(samples.into_sorted_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(_point: &[usize], _sizes: &[usize]) -> f64 {
        1.0
    }

    fn decaying(point: &[usize], _sizes: &[usize]) -> f64 {
        (-(point[0] as f64) / 8.0).exp()
    }

    fn ramp(point: &[usize], _sizes: &[usize]) -> f64 {
        1.0 + point[0] as f64
    }

    fn spike(point: &[usize], _sizes: &[usize]) -> f64 {
        if point[0] == 0 {
            1.0
        } else {
            1e-6
        }
    }

    fn two_cells(point: &[usize], _sizes: &[usize]) -> f64 {
        if point[0] < 2 {
            1.0
        } else {
            0.0
        }
    }

    #[test]
    fn uniform_density_on_a_line() {
        let grid = Grid::new(&[8]).expect("grid");
        let samples = generate_rejection_schedule(&grid, 0.5, &uniform, SamplerSettings::default())
            .expect("uniform sampling should succeed");
        assert_eq!(samples, vec![1, 2, 4, 5]);
    }

    #[test]
    fn decaying_density_favours_the_start() {
        let grid = Grid::new(&[64]).expect("grid");
        let samples = generate_rejection_schedule(&grid, 0.25, &decaying, SamplerSettings::default())
            .expect("sampling should succeed");
        assert_eq!(samples.len(), 16);
        assert!(samples.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(samples.iter().filter(|&&i| i < 32).count(), 15);
    }

    #[test]
    fn heavy_half_gets_more_samples_in_two_dimensions() {
        let grid = Grid::new(&[32, 32]).expect("grid");
        let samples = generate_rejection_schedule(&grid, 0.2, &ramp, SamplerSettings::default())
            .expect("sampling should succeed");
        assert_eq!(samples.len(), 205);
        assert!(samples.windows(2).all(|w| w[0] < w[1]));
        let heavy = samples
            .iter()
            .filter(|&&i| grid.unpack(i).expect("unpack")[0] >= 16)
            .count();
        assert_eq!(heavy, 151);
        assert!(heavy > samples.len() - heavy);
    }

    #[test]
    fn compiled_density_matches_closure() {
        let grid = Grid::new(&[64]).expect("grid");
        let compiled = crate::equation_engine::CompiledDensity::compile("exp(-x[0] / 8)")
            .expect("density should compile");
        let a = generate_rejection_schedule(&grid, 0.25, &compiled, SamplerSettings::default())
            .expect("compiled");
        let b = generate_rejection_schedule(&grid, 0.25, &decaying, SamplerSettings::default())
            .expect("closure");
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_positive_cells_is_exhaustion() {
        let grid = Grid::new(&[8]).expect("grid");
        let err = generate_rejection_schedule(&grid, 0.5, &two_cells, SamplerSettings::default())
            .expect_err("only two cells can ever be accepted");
        assert_eq!(
            err.downcast_ref::<SamplingError>(),
            Some(&SamplingError::Exhausted {
                produced: 2,
                target: 4
            })
        );
    }

    #[test]
    fn draw_budget_is_enforced() {
        let grid = Grid::new(&[8]).expect("grid");
        let settings = SamplerSettings {
            max_draws_per_sample: 1,
            ..SamplerSettings::default()
        };
        let err = generate_rejection_schedule(&grid, 0.5, &spike, settings)
            .expect_err("budget should run out");
        assert!(matches!(
            err.downcast_ref::<SamplingError>(),
            Some(SamplingError::Exhausted { target: 4, .. })
        ));
    }
}
