//! Multidimensional index arithmetic.
//!
//! A [`GridIndex`] is a plain tuple of unsigned integers. Depending on context it
//! holds grid sizes, a coordinate, or a growing list of linear indices. [`Grid`]
//! wraps a validated size tuple and offers the mixed-radix packing used by every
//! schedule generator: `i = Σ x[k] * stride(k)` with `stride(k) = Π_{j<k} N[j]`.

use crate::error::GridError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Largest number of grid axes supported by the generators.
pub const MAX_DIMS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridIndex {
    elems: Vec<usize>,
}

impl GridIndex {
    /// Allocates a tuple of `n` zeros.
    pub fn zeros(n: usize) -> Self {
        Self { elems: vec![0; n] }
    }

    pub fn from_vec(elems: Vec<usize>) -> Self {
        Self { elems }
    }

    pub fn fill(&mut self, value: usize) {
        self.elems.iter_mut().for_each(|e| *e = value);
    }

    pub fn get(&self, i: usize) -> Option<usize> {
        self.elems.get(i).copied()
    }

    pub fn set(&mut self, i: usize, value: usize) {
        self.elems[i] = value;
    }

    pub fn push(&mut self, value: usize) {
        self.elems.push(value);
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.elems
    }

    pub fn into_vec(self) -> Vec<usize> {
        self.elems
    }

    pub fn sum(&self) -> usize {
        self.elems.iter().sum()
    }

    pub fn product(&self) -> usize {
        self.elems.iter().product()
    }

    /// Linear stride along `dir` when this tuple holds grid sizes.
    pub fn stride(&self, dir: usize) -> usize {
        self.elems.iter().take(dir).product()
    }

    /// Zero-based position of the first nonzero element.
    ///
    /// Used on axis masks to detect the single free axis of a line.
    pub fn first_nonzero(&self) -> Option<usize> {
        self.elems.iter().position(|&e| e != 0)
    }

    /// Linear membership scan; lists searched this way are small.
    pub fn contains(&self, value: usize) -> bool {
        self.elems.contains(&value)
    }

    pub fn sort(&mut self) {
        self.elems.sort_unstable();
    }

    /// Sorts ascending and drops repeated values.
    pub fn sort_unique(&mut self) {
        self.elems.sort_unstable();
        self.elems.dedup();
    }

    /// Packs this coordinate into a linear index over `sizes`.
    pub fn pack(&self, sizes: &GridIndex) -> Result<usize, GridError> {
        pack_slice(&self.elems, &sizes.elems)
    }

    /// Unpacks `index` into a fresh coordinate over `sizes`.
    pub fn unpack(index: usize, sizes: &GridIndex) -> Result<Self, GridError> {
        let mut out = Self::zeros(sizes.len());
        out.unpack_from(index, sizes)?;
        Ok(out)
    }

    /// Unpacks `index` in place, reusing this tuple's storage.
    pub fn unpack_from(&mut self, index: usize, sizes: &GridIndex) -> Result<(), GridError> {
        unpack_slice(index, &sizes.elems, &mut self.elems)
    }
}

impl From<Vec<usize>> for GridIndex {
    fn from(elems: Vec<usize>) -> Self {
        Self { elems }
    }
}

impl From<&[usize]> for GridIndex {
    fn from(elems: &[usize]) -> Self {
        Self {
            elems: elems.to_vec(),
        }
    }
}

impl Index<usize> for GridIndex {
    type Output = usize;

    fn index(&self, i: usize) -> &usize {
        &self.elems[i]
    }
}

impl IndexMut<usize> for GridIndex {
    fn index_mut(&mut self, i: usize) -> &mut usize {
        &mut self.elems[i]
    }
}

impl fmt::Display for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.elems.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

fn pack_slice(coord: &[usize], sizes: &[usize]) -> Result<usize, GridError> {
    if coord.len() != sizes.len() {
        return Err(GridError::LengthMismatch {
            expected: sizes.len(),
            actual: coord.len(),
        });
    }
    let mut index = 0;
    let mut stride = 1;
    for (axis, (&value, &size)) in coord.iter().zip(sizes).enumerate() {
        if value >= size {
            return Err(GridError::CoordinateOutOfRange { axis, value, size });
        }
        index += value * stride;
        stride *= size;
    }
    Ok(index)
}

fn unpack_slice(index: usize, sizes: &[usize], out: &mut [usize]) -> Result<(), GridError> {
    if out.len() != sizes.len() {
        return Err(GridError::LengthMismatch {
            expected: sizes.len(),
            actual: out.len(),
        });
    }
    let total: usize = sizes.iter().product();
    if index >= total {
        return Err(GridError::IndexOutOfRange { index, total });
    }
    let mut rem = index;
    for (slot, &size) in out.iter_mut().zip(sizes) {
        *slot = rem % size;
        rem /= size;
    }
    Ok(())
}

/// A validated grid of 1 to [`MAX_DIMS`] positive axis sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    sizes: GridIndex,
    total: usize,
}

impl Grid {
    pub fn new(sizes: &[usize]) -> Result<Self, GridError> {
        if sizes.is_empty() || sizes.len() > MAX_DIMS {
            return Err(GridError::Dimensionality {
                dims: sizes.len(),
                max: MAX_DIMS,
            });
        }
        if let Some(axis) = sizes.iter().position(|&n| n == 0) {
            return Err(GridError::ZeroSize { axis: axis + 1 });
        }
        let total = sizes
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| GridError::Overflow {
                sizes: sizes.to_vec(),
            })?;
        Ok(Self {
            sizes: GridIndex::from(sizes),
            total,
        })
    }

    pub fn dims(&self) -> usize {
        self.sizes.len()
    }

    pub fn sizes(&self) -> &GridIndex {
        &self.sizes
    }

    pub fn size(&self, axis: usize) -> usize {
        self.sizes[axis]
    }

    /// Total number of cells.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn stride(&self, axis: usize) -> usize {
        self.sizes.stride(axis)
    }

    /// Number of points a schedule of density `density` holds on this grid.
    pub fn target_count(&self, density: f64) -> usize {
        (density * self.total as f64).round() as usize
    }

    pub fn pack(&self, coord: &[usize]) -> Result<usize, GridError> {
        pack_slice(coord, self.sizes.as_slice())
    }

    pub fn unpack(&self, index: usize) -> Result<GridIndex, GridError> {
        GridIndex::unpack(index, &self.sizes)
    }

    pub fn unpack_into(&self, index: usize, out: &mut [usize]) -> Result<(), GridError> {
        unpack_slice(index, self.sizes.as_slice(), out)
    }

    /// Appends the axis neighbours of `index` (previous then next, axis by axis).
    ///
    /// `coord` must hold the unpacked coordinate of `index`.
    pub fn neighbors(&self, index: usize, coord: &[usize], out: &mut Vec<usize>) {
        for axis in 0..self.dims() {
            let stride = self.stride(axis);
            if coord[axis] > 0 {
                out.push(index - stride);
            }
            if coord[axis] + 1 < self.sizes[axis] {
                out.push(index + stride);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, GridError>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn pack_unpack_round_trips_over_whole_grid() {
        for sizes in [vec![7], vec![3, 5], vec![2, 3, 4]] {
            let grid = Grid::new(&sizes).expect("grid should build");
            for index in 0..grid.total() {
                let coord = grid.unpack(index).expect("index should unpack");
                assert_eq!(coord.len(), sizes.len());
                let packed = coord.pack(grid.sizes()).expect("coordinate should pack");
                assert_eq!(packed, index, "round trip failed for sizes {sizes:?}");
            }
        }
    }

    #[test]
    fn pack_uses_mixed_radix_strides() {
        let sizes = GridIndex::from(vec![4, 3, 2]);
        assert_eq!(sizes.stride(0), 1);
        assert_eq!(sizes.stride(1), 4);
        assert_eq!(sizes.stride(2), 12);
        let coord = GridIndex::from(vec![3, 2, 1]);
        assert_eq!(coord.pack(&sizes).expect("pack"), 3 + 2 * 4 + 12);
    }

    #[test]
    fn pack_rejects_length_mismatch() {
        let sizes = GridIndex::from(vec![4, 4]);
        assert_err_contains(GridIndex::from(vec![1]).pack(&sizes), "length mismatch");
        let mut out = GridIndex::zeros(3);
        assert_err_contains(out.unpack_from(0, &sizes), "length mismatch");
    }

    #[test]
    fn pack_and_unpack_reject_out_of_range_values() {
        let grid = Grid::new(&[4, 2]).expect("grid");
        assert_err_contains(grid.pack(&[4, 0]), "exceeds grid size 4");
        assert_err_contains(grid.unpack(8), "out of range");
    }

    #[test]
    fn aggregates_and_search() {
        let mut t = GridIndex::zeros(3);
        assert_eq!(t.first_nonzero(), None);
        t.set(2, 5);
        t.push(1);
        assert_eq!(t.as_slice(), &[0, 0, 5, 1]);
        assert_eq!(t.first_nonzero(), Some(2));
        assert_eq!(t.sum(), 6);
        assert_eq!(t.product(), 0);
        assert!(t.contains(5));
        assert!(!t.contains(7));
        t.fill(2);
        assert_eq!(t.product(), 16);
    }

    #[test]
    fn sort_unique_removes_duplicates() {
        let mut t = GridIndex::from(vec![9, 3, 3, 1, 9, 0]);
        let mut sorted = t.clone();
        sorted.sort();
        assert_eq!(sorted.as_slice(), &[0, 1, 3, 3, 9, 9]);
        t.sort_unique();
        assert_eq!(t.as_slice(), &[0, 1, 3, 9]);
    }

    #[test]
    fn display_is_space_separated() {
        let t = GridIndex::from(vec![3, 0, 12]);
        assert_eq!(t.to_string(), "3 0 12");
    }

    #[test]
    fn grid_validates_geometry() {
        assert_err_contains(Grid::new(&[]), "between 1 and 3");
        assert_err_contains(Grid::new(&[2, 2, 2, 2]), "between 1 and 3");
        assert_err_contains(Grid::new(&[4, 0]), "N2");
        assert_err_contains(Grid::new(&[usize::MAX, 2]), "too many cells");
        let grid = Grid::new(&[8, 4]).expect("grid");
        assert_eq!(grid.total(), 32);
        assert_eq!(grid.target_count(0.25), 8);
    }

    #[test]
    fn neighbors_stay_inside_grid() {
        let grid = Grid::new(&[3, 3]).expect("grid");
        let mut out = Vec::new();
        grid.neighbors(0, &[0, 0], &mut out);
        assert_eq!(out, vec![1, 3]);
        out.clear();
        grid.neighbors(4, &[1, 1], &mut out);
        assert_eq!(out, vec![3, 5, 1, 7]);
        out.clear();
        grid.neighbors(8, &[2, 2], &mut out);
        assert_eq!(out, vec![7, 5]);
    }
}
