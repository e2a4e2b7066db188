//! WASM bindings for `nus_core`.
//!
//! Errors cross the boundary as JS strings; results are serialised with
//! `serde-wasm-bindgen`.

mod schedule;

pub use schedule::{generate_from_request, generate_schedule, schedule_coordinates, schedule_text};
