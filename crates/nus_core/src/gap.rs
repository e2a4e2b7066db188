//! Deterministic gap sequencing.
//!
//! Every 1-D line of the grid is walked with a gap law: the law gives the
//! spacing between consecutive terms, each term lands on the nearest cell.
//! The law's scale `L` is tuned by a damped multiplicative update until the
//! union of all lines holds close to the requested number of points.

use crate::density::target_count;
use crate::error::SamplingError;
use crate::grid::{Grid, GridIndex};
use crate::traits::{GapArgs, GapEquation};
use crate::unique::UniqueIndexSet;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapSettings {
    pub max_iterations: usize,
    /// Allowed count error as a fraction of the target, never below one point.
    pub tolerance: f64,
    /// Damping of the scale update `w *= 1 + gain * error / n`.
    pub gain: f64,
}

impl Default for GapSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 0.005,
            gain: 0.5,
        }
    }
}

impl GapSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("max_iterations must be greater than zero.");
        }
        if !(self.tolerance >= 0.0) {
            bail!("tolerance must be non-negative.");
        }
        if !(self.gain > 0.0 && self.gain < 1.0) {
            bail!("gain must lie in (0,1).");
        }
        Ok(())
    }
}

/// How the calibration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub iterations: usize,
    /// Scale `L` of the accepted attempt.
    pub scale: f64,
    pub count: usize,
    pub target: usize,
    /// `count - target` of the accepted attempt.
    pub error: i64,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GapSchedule {
    pub indices: Vec<usize>,
    pub report: CalibrationReport,
}

struct Line {
    axis: usize,
    index: usize,
    origin: GridIndex,
}

/// Every axis-parallel line of the grid, axis-major, starting where the
/// line's own coordinate is zero. Each line is walked once per attempt, so a
/// stateful law (Poisson gap) sees its draws in this order.
fn enumerate_lines(grid: &Grid) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    for axis in 0..grid.dims() {
        let stride = grid.stride(axis);
        let size = grid.size(axis);
        for index in 0..grid.total() {
            if (index / stride) % size == 0 {
                lines.push(Line {
                    axis,
                    index,
                    origin: grid.unpack(index)?,
                });
            }
        }
    }
    Ok(lines)
}

/// A walk that needs more terms than this per cell is treated as stalled.
const MAX_TERMS_PER_CELL: usize = 1024;

struct Attempt {
    indices: UniqueIndexSet,
    well_behaved: bool,
}

fn run_attempt<G>(grid: &Grid, lines: &[Line], law: &mut G, scale: f64) -> Result<Attempt>
where
    G: GapEquation + ?Sized,
{
    let mut indices = UniqueIndexSet::new();
    let sizes = grid.sizes().as_slice();

    for line in lines {
        let axis = line.axis;
        let stride = grid.stride(axis);
        let cells = grid.size(axis) - line.origin[axis];
        let length = cells as f64;
        let budget = MAX_TERMS_PER_CELL.saturating_mul(cells + 1);
        let mut terms = 0usize;
        let mut x = 0.0;

        loop {
            if terms == budget {
                warn!(
                    "gap walk on axis {axis} from ({}) took {terms} terms without leaving the line, L = {scale}",
                    line.origin
                );
                return Ok(Attempt {
                    indices,
                    well_behaved: false,
                });
            }
            terms += 1;

            let args = GapArgs {
                x,
                axis,
                origin: line.origin.as_slice(),
                sizes,
                scale,
            };
            let step = law.step(&args).with_context(|| {
                format!(
                    "Gap equation failed at x = {x}, axis {axis}, origin ({}), L = {scale}",
                    line.origin
                )
            })?;

            // Non-positive, NaN, or absorbed steps leave x where it is.
            let next = x + step.increment;
            if !(next > x) {
                return Ok(Attempt {
                    indices,
                    well_behaved: false,
                });
            }

            x = next;
            let position = x.round();
            if position >= 1.0 && position <= length {
                indices.insert(line.index + stride * (position as usize - 1));
            }
            if !step.in_domain {
                return Ok(Attempt {
                    indices,
                    well_behaved: false,
                });
            }
            if position > length {
                break;
            }
        }
    }

    Ok(Attempt {
        indices,
        well_behaved: true,
    })
}

/// Builds a gap-sequenced schedule of density `density` on `grid`.
///
/// Attempts that leave the law's domain count as a full grid, which pushes
/// the scale up. If the iteration cap is reached the closest well-behaved
/// attempt is returned with `converged == false`.
pub fn generate_gap_schedule<G>(
    grid: &Grid,
    density: f64,
    law: &mut G,
    settings: GapSettings,
) -> Result<GapSchedule>
where
    G: GapEquation + ?Sized,
{
    settings.validate()?;
    let target = target_count(grid, density)?;
    let tolerance = ((settings.tolerance * target as f64).round() as usize).max(1);
    let base_scale = 1.0 / density - 1.0;
    let lines = enumerate_lines(grid)?;

    let mut weight = 1.0;
    let mut best: Option<(Vec<usize>, CalibrationReport)> = None;

    for iteration in 1..=settings.max_iterations {
        let scale = base_scale * weight;
        let attempt = run_attempt(grid, &lines, law, scale)?;
        let count = if attempt.well_behaved {
            attempt.indices.len()
        } else {
            grid.total()
        };
        let error = count as i64 - target as i64;
        debug!(
            "gap calibration iteration {iteration}: L = {scale:.6}, count = {count}, error = {error}, well-behaved = {}",
            attempt.well_behaved
        );

        if attempt.well_behaved {
            let converged = (error.unsigned_abs() as usize) <= tolerance;
            let closer = best
                .as_ref()
                .map_or(true, |(_, report)| error.abs() < report.error.abs());
            if converged || closer {
                let report = CalibrationReport {
                    iterations: iteration,
                    scale,
                    count,
                    target,
                    error,
                    converged,
                };
                best = Some((attempt.indices.into_sorted_vec(), report));
            }
            if converged {
                break;
            }
        }

        weight *= 1.0 + settings.gain * error as f64 / target as f64;
    }

    let Some((indices, mut report)) = best else {
        return Err(SamplingError::NoWellBehavedAttempt {
            iterations: settings.max_iterations,
        }
        .into());
    };

    if report.converged {
        info!(
            "gap schedule: {} points (target {target}) after {} iterations, L = {:.6}",
            report.count, report.iterations, report.scale
        );
    } else {
        report.iterations = settings.max_iterations;
        warn!(
            "gap calibration hit {} iterations without converging; keeping {} points (target {target})",
            settings.max_iterations, report.count
        );
    }

    Ok(GapSchedule { indices, report })
}
