//! One-call schedule generation from a serialisable request.

use crate::density::SamplerSettings;
use crate::equation_engine::{CompiledDensity, CompiledGapLaw};
use crate::gap::{generate_gap_schedule, CalibrationReport, GapSettings};
use crate::grid::Grid;
use crate::jittered::generate_jittered_schedule;
use crate::rejection::generate_rejection_schedule;
use crate::schedule::Schedule;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Deterministic gap sequencing driven by a gap law.
    GapSequence,
    /// Quasirandom rejection sampling of a density.
    Rejection,
    /// Quasirandom jittered-region sampling of a density.
    Jittered,
}

impl SamplingMethod {
    pub fn name(self) -> &'static str {
        match self {
            SamplingMethod::GapSequence => "gap_sequence",
            SamplingMethod::Rejection => "rejection",
            SamplingMethod::Jittered => "jittered",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SamplingMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gap_sequence" | "gap" => Ok(SamplingMethod::GapSequence),
            "rejection" => Ok(SamplingMethod::Rejection),
            "jittered" => Ok(SamplingMethod::Jittered),
            other => Err(anyhow!("Unknown sampling method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub method: SamplingMethod,
    pub sizes: Vec<usize>,
    pub density: f64,
    /// Gap law for [`SamplingMethod::GapSequence`], density otherwise.
    pub equation: String,
    #[serde(default)]
    pub gap: GapSettings,
    #[serde(default)]
    pub sampler: SamplerSettings,
}

impl ScheduleRequest {
    pub fn new(method: SamplingMethod, sizes: &[usize], density: f64, equation: &str) -> Self {
        Self {
            method,
            sizes: sizes.to_vec(),
            density,
            equation: equation.to_string(),
            gap: GapSettings::default(),
            sampler: SamplerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSchedule {
    pub schedule: Schedule,
    /// Present for gap sequencing only.
    pub report: Option<CalibrationReport>,
}

/// Validates `request`, compiles its equation and runs the chosen generator.
pub fn generate_schedule(request: &ScheduleRequest) -> Result<GeneratedSchedule> {
    let grid = Grid::new(&request.sizes)?;

    let (indices, report) = match request.method {
        SamplingMethod::GapSequence => {
            let mut law = CompiledGapLaw::compile(&request.equation)
                .with_context(|| format!("Failed to compile gap law '{}'", request.equation))?;
            let out = generate_gap_schedule(&grid, request.density, &mut law, request.gap)?;
            (out.indices, Some(out.report))
        }
        SamplingMethod::Rejection | SamplingMethod::Jittered => {
            let density = CompiledDensity::compile(&request.equation)
                .with_context(|| format!("Failed to compile density '{}'", request.equation))?;
            let indices = if request.method == SamplingMethod::Rejection {
                generate_rejection_schedule(&grid, request.density, &density, request.sampler)?
            } else {
                generate_jittered_schedule(&grid, request.density, &density, request.sampler)?
            };
            (indices, None)
        }
    };

    Ok(GeneratedSchedule {
        schedule: Schedule::new(&grid, indices),
        report,
    })
}
