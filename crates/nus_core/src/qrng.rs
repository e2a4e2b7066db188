//! Multi-stream low-discrepancy number generator.
//!
//! Each stream walks a Van der Corput sequence in its own base. Bases are
//! pairwise coprime (2, 3, 5, 7, ...) so the streams together form a Halton
//! sequence over `[0,1)^n`. The generator is fully deterministic: two
//! generators with the same stream count always produce the same points.

use std::num::NonZeroUsize;

/// Number of base-b digits carried per stream.
pub const DIGITS: usize = 1000;

#[derive(Debug, Clone)]
pub struct LowDiscrepancySequence {
    bases: Vec<u32>,
    digits: Vec<Vec<u32>>,
    // Highest digit position that has ever been nonzero, per stream.
    top: Vec<usize>,
    values: Vec<f64>,
}

impl LowDiscrepancySequence {
    /// Builds a generator with `streams` independent streams.
    ///
    /// Digit 0 of every stream starts at 1, so the first call to
    /// [`advance`](Self::advance) is nonzero in every stream.
    pub fn new(streams: NonZeroUsize) -> Self {
        let streams = streams.get();
        let bases = coprime_bases(streams);
        let mut digits = vec![vec![0u32; DIGITS]; streams];
        for state in &mut digits {
            state[0] = 1;
        }
        Self {
            bases,
            digits,
            top: vec![0; streams],
            values: vec![0.0; streams],
        }
    }

    pub fn streams(&self) -> usize {
        self.bases.len()
    }

    pub fn bases(&self) -> &[u32] {
        &self.bases
    }

    /// The most recent point produced by [`advance`](Self::advance).
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Evaluates the current digit state, then steps every stream forward.
    pub fn advance(&mut self) -> &[f64] {
        for (i, value) in self.values.iter_mut().enumerate() {
            let base = self.bases[i] as f64;
            let mut weight = 1.0 / base;
            let mut sum = 0.0;
            for &digit in &self.digits[i][..=self.top[i]] {
                sum += digit as f64 * weight;
                weight /= base;
            }
            *value = sum;
        }

        for (i, state) in self.digits.iter_mut().enumerate() {
            let base = self.bases[i];
            for (k, digit) in state.iter_mut().enumerate() {
                *digit += 1;
                if *digit >= base {
                    *digit = 0;
                } else {
                    if k > self.top[i] {
                        self.top[i] = k;
                    }
                    break;
                }
            }
        }

        &self.values
    }
}

/// Returns `n` bases: 2, then the smallest integers coprime with all before.
fn coprime_bases(n: usize) -> Vec<u32> {
    let mut bases: Vec<u32> = Vec::with_capacity(n);
    let mut candidate = 2u32;
    while bases.len() < n {
        if bases.iter().all(|&b| gcd(b, candidate) == 1) {
            bases.push(candidate);
        }
        candidate += 1;
    }
    bases
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
