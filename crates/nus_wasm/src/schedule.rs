//! Schedule generation entry points.

use anyhow::Context;
use js_sys::Uint32Array;
use nus_core::gap::CalibrationReport;
use nus_core::request::{
    generate_schedule as core_generate_schedule, GeneratedSchedule, SamplingMethod,
    ScheduleRequest,
};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Serialised form of a generated schedule.
#[derive(Debug, Serialize)]
pub(crate) struct SchedulePayload {
    sizes: Vec<usize>,
    indices: Vec<usize>,
    coordinates: Vec<Vec<usize>>,
    report: Option<CalibrationReport>,
}

pub(crate) fn build_request(
    method: &str,
    density: f64,
    sizes: &[u32],
    equation: &str,
) -> Result<ScheduleRequest, String> {
    let method: SamplingMethod = method.parse().map_err(|e| format!("{e}"))?;
    let sizes: Vec<usize> = sizes.iter().map(|&n| n as usize).collect();
    Ok(ScheduleRequest::new(method, &sizes, density, equation))
}

pub(crate) fn run_request(request: &ScheduleRequest) -> Result<GeneratedSchedule, String> {
    core_generate_schedule(request)
        .with_context(|| format!("{} schedule generation failed", request.method))
        .map_err(|e| format!("{e:#}"))
}

pub(crate) fn indices_u32(indices: &[usize]) -> Result<Vec<u32>, String> {
    indices
        .iter()
        .map(|&i| u32::try_from(i).map_err(|_| format!("Index {i} does not fit in a Uint32Array")))
        .collect()
}

pub(crate) fn build_payload(generated: GeneratedSchedule) -> Result<SchedulePayload, String> {
    let coordinates = generated
        .schedule
        .coordinates()
        .map_err(|e| format!("{e}"))?
        .into_iter()
        .map(|coord| coord.into_vec())
        .collect();
    Ok(SchedulePayload {
        sizes: generated.schedule.sizes.into_vec(),
        indices: generated.schedule.indices,
        coordinates,
        report: generated.report,
    })
}

fn generate(
    method: &str,
    density: f64,
    sizes: &[u32],
    equation: &str,
) -> Result<GeneratedSchedule, JsValue> {
    console_error_panic_hook::set_once();
    let request = build_request(method, density, sizes, equation).map_err(|e| JsValue::from_str(&e))?;
    run_request(&request).map_err(|e| JsValue::from_str(&e))
}

/// Generates a schedule and returns its ascending linear indices.
#[wasm_bindgen]
pub fn generate_schedule(
    method: &str,
    density: f64,
    sizes: Vec<u32>,
    equation: &str,
) -> Result<Uint32Array, JsValue> {
    let generated = generate(method, density, &sizes, equation)?;
    let indices = indices_u32(&generated.schedule.indices).map_err(|e| JsValue::from_str(&e))?;
    Ok(Uint32Array::from(indices.as_slice()))
}

/// Generates a schedule and returns sizes, indices, coordinates and the
/// calibration report (gap sequencing only).
#[wasm_bindgen]
pub fn schedule_coordinates(
    method: &str,
    density: f64,
    sizes: Vec<u32>,
    equation: &str,
) -> Result<JsValue, JsValue> {
    let generated = generate(method, density, &sizes, equation)?;
    let payload = build_payload(generated).map_err(|e| JsValue::from_str(&e))?;
    to_value(&payload).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Generates a schedule in the text format: one line per sample.
#[wasm_bindgen]
pub fn schedule_text(
    method: &str,
    density: f64,
    sizes: Vec<u32>,
    equation: &str,
) -> Result<String, JsValue> {
    let generated = generate(method, density, &sizes, equation)?;
    Ok(generated.schedule.to_string())
}

/// Runs a full serialised `ScheduleRequest`, settings included.
#[wasm_bindgen]
pub fn generate_from_request(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let request: ScheduleRequest = from_value(request)
        .map_err(|e| JsValue::from_str(&format!("Invalid schedule request: {}", e)))?;
    let generated = run_request(&request).map_err(|e| JsValue::from_str(&e))?;
    let payload = build_payload(generated).map_err(|e| JsValue::from_str(&e))?;
    to_value(&payload).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}
