//! The `nus_core` crate builds non-uniform sampling schedules for 1-3 dimensional
//! acquisition grids. Given grid sizes, a global density in (0,1) and a user
//! equation, it returns a sorted, duplicate-free set of grid points.
//!
//! Key components:
//! - **Grid**: `Grid`/`GridIndex` mixed-radix index arithmetic.
//! - **Qrng**: `LowDiscrepancySequence`, a deterministic multi-stream Halton generator.
//! - **Equation Engine**: A bytecode VM for user gap laws and densities, with preset gap laws.
//! - **Generators**: gap sequencing (`gap`), rejection sampling (`rejection`) and
//!   jittered-region sampling (`jittered`).
//! - **Request**: `ScheduleRequest` and `generate_schedule`, the single entry point.
pub mod density;
pub mod equation_engine;
pub mod error;
pub mod gap;
pub mod grid;
pub mod jittered;
pub mod qrng;
pub mod rejection;
pub mod request;
pub mod schedule;
pub mod traits;
pub mod unique;

pub use request::{generate_schedule, GeneratedSchedule, SamplingMethod, ScheduleRequest};
pub use schedule::Schedule;
