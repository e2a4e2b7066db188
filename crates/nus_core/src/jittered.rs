//! Quasirandom jittered-region sampling.
//!
//! The density is scaled to unit mass and the grid is carved into regions of
//! roughly `1/n` mass each. A region starts at the densest free cell and grows
//! greedily through its free neighbours; one cell is then drawn from it by
//! local rejection and the whole region is retired.

use crate::density::{target_count, DensityField, SamplerSettings};
use crate::error::SamplingError;
use crate::grid::Grid;
use crate::qrng::LowDiscrepancySequence;
use crate::traits::DensityEquation;
use crate::unique::UniqueIndexSet;
use anyhow::Result;
use log::info;
use std::num::NonZeroUsize;

/// Local rejection draws a member slot and an acceptance level.
const SLOT_AND_ACCEPT_STREAMS: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1);

/// Scratch state for growing one region at a time.
struct RegionBuilder<'a> {
    grid: &'a Grid,
    field: &'a DensityField,
    members: Vec<usize>,
    in_region: Vec<bool>,
    frontier: Vec<usize>,
    coord: Vec<usize>,
    centroid: Vec<f64>,
    mass: f64,
}

impl<'a> RegionBuilder<'a> {
    fn new(grid: &'a Grid, field: &'a DensityField) -> Self {
        Self {
            grid,
            field,
            members: Vec::new(),
            in_region: vec![false; grid.total()],
            frontier: Vec::new(),
            coord: vec![0; grid.dims()],
            centroid: vec![0.0; grid.dims()],
            mass: 0.0,
        }
    }

    fn clear(&mut self) {
        for &member in &self.members {
            self.in_region[member] = false;
        }
        self.members.clear();
        self.centroid.iter_mut().for_each(|c| *c = 0.0);
        self.mass = 0.0;
    }

    fn push(&mut self, index: usize) -> Result<()> {
        self.grid.unpack_into(index, &mut self.coord)?;
        self.in_region[index] = true;
        self.members.push(index);
        // Running mean over the members.
        let count = self.members.len() as f64;
        for (c, &x) in self.centroid.iter_mut().zip(&self.coord) {
            *c += (x as f64 - *c) / count;
        }
        self.mass += self.field.get(index);
        Ok(())
    }

    /// Free cells adjacent to the newest member, not already in the region.
    fn collect_frontier(&mut self, available: &[bool]) -> Result<()> {
        self.frontier.clear();
        let Some(&tip) = self.members.last() else {
            return Ok(());
        };
        self.grid.unpack_into(tip, &mut self.coord)?;
        self.grid.neighbors(tip, &self.coord, &mut self.frontier);
        let in_region = &self.in_region;
        self.frontier.retain(|&cell| available[cell] && !in_region[cell]);
        Ok(())
    }

    /// Densest frontier cell; ties go to the cell nearest the region centroid.
    fn best_candidate(&mut self) -> Result<Option<usize>> {
        let mut best: Option<(usize, f64, f64)> = None;
        for i in 0..self.frontier.len() {
            let cell = self.frontier[i];
            let p = self.field.get(cell);
            self.grid.unpack_into(cell, &mut self.coord)?;
            let distance: f64 = self
                .coord
                .iter()
                .zip(&self.centroid)
                .map(|(&x, &c)| {
                    let delta = x as f64 - c;
                    delta * delta
                })
                .sum();
            let better = match best {
                None => true,
                Some((_, best_p, best_distance)) => {
                    p > best_p || (p == best_p && distance < best_distance)
                }
            };
            if better {
                best = Some((cell, p, distance));
            }
        }
        Ok(best.map(|(cell, _, _)| cell))
    }

    /// Grows from `seed` while each addition brings the mass closer to `target`.
    fn grow(&mut self, seed: usize, available: &[bool], target: f64) -> Result<()> {
        self.clear();
        self.push(seed)?;
        loop {
            self.collect_frontier(available)?;
            let Some(candidate) = self.best_candidate()? else {
                break;
            };
            let p = self.field.get(candidate);
            // Equality stops growth.
            if (self.mass + p - target).abs() < (self.mass - target).abs() {
                self.push(candidate)?;
            } else {
                break;
            }
        }
        Ok(())
    }
}

fn densest_available(field: &DensityField, available: &[bool]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, &free) in available.iter().enumerate() {
        if free && best.map_or(true, |b| field.get(index) > field.get(b)) {
            best = Some(index);
        }
    }
    best
}

pub fn generate_jittered_schedule<E>(
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
    field.normalize_by_sum()?;

    let target_mass = 1.0 / target as f64;
    let mut available = vec![true; grid.total()];
    let mut rng = LowDiscrepancySequence::new(SLOT_AND_ACCEPT_STREAMS);
    for _ in 0..settings.warmup_draws {
        rng.advance();
    }

    let mut region = RegionBuilder::new(grid, &field);
    let mut samples = UniqueIndexSet::new();
    let mut retired = 0usize;

    for _ in 0..target {
        let exhausted = || SamplingError::Exhausted {
            produced: samples.len(),
            target,
        };

        let seed = densest_available(&field, &available).ok_or_else(exhausted)?;
        region.grow(seed, &available, target_mass)?;

        let members = &region.members;
        let peak = members
            .iter()
            .map(|&m| field.get(m))
            .fold(0.0, f64::max);

        let mut chosen = None;
        for _ in 0..settings.max_draws_per_sample {
            let u = rng.advance();
            let slot = ((u[0] * members.len() as f64) as usize).min(members.len() - 1);
            let candidate = members[slot];
            if u[1] * peak <= field.get(candidate) {
                chosen = Some(candidate);
                break;
            }
        }
        let chosen = chosen.ok_or_else(exhausted)?;

        for &member in members {
            available[member] = false;
        }
        retired += members.len();
        samples.insert(chosen);
    }

    info!(
        "jittered schedule: {target} points from regions covering {retired} of {} cells",
        grid.total()
    );
    Ok(samples.into_sorted_vec())
}
