use crate::error::GridError;
use crate::grid::{Grid, GridIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// A finished sampling schedule: ascending, duplicate-free linear indices
/// over a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub sizes: GridIndex,
    pub indices: Vec<usize>,
}

impl Schedule {
    pub fn new(grid: &Grid, indices: Vec<usize>) -> Self {
        Self {
            sizes: grid.sizes().clone(),
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Fraction of the grid the schedule actually covers.
    pub fn achieved_density(&self) -> f64 {
        let total = self.sizes.product();
        if total == 0 {
            0.0
        } else {
            self.indices.len() as f64 / total as f64
        }
    }

    /// Unpacks every index into its grid coordinate, in schedule order.
    pub fn coordinates(&self) -> Result<Vec<GridIndex>, GridError> {
        self.indices
            .iter()
            .map(|&index| GridIndex::unpack(index, &self.sizes))
            .collect()
    }

    /// Writes one line per sample: the coordinate's integers separated by spaces.
    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let mut coord = GridIndex::zeros(self.sizes.len());
        for &index in &self.indices {
            coord
                .unpack_from(index, &self.sizes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(out, "{coord}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut coord = GridIndex::zeros(self.sizes.len());
        for &index in &self.indices {
            coord
                .unpack_from(index, &self.sizes)
                .map_err(|_| fmt::Error)?;
            writeln!(f, "{coord}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_format_lists_coordinates() {
        let grid = Grid::new(&[4, 4]).expect("grid");
        let schedule = Schedule::new(&grid, vec![3, 4, 10, 13]);
        assert_eq!(schedule.to_string(), "3 0\n0 1\n2 2\n1 3\n");

        let mut buffer = Vec::new();
        schedule.write_to(&mut buffer).expect("write should succeed");
        assert_eq!(String::from_utf8(buffer).expect("utf8"), schedule.to_string());
        assert_eq!(schedule.achieved_density(), 0.25);
    }

    #[test]
    fn coordinates_unpack_in_order() {
        let grid = Grid::new(&[2, 3, 2]).expect("grid");
        let schedule = Schedule::new(&grid, vec![0, 7, 11]);
        let coords: Vec<Vec<usize>> = schedule
            .coordinates()
            .expect("coordinates")
            .into_iter()
            .map(GridIndex::into_vec)
            .collect();
        assert_eq!(coords, vec![vec![0, 0, 0], vec![1, 0, 1], vec![1, 2, 1]]);
    }

    #[test]
    fn stale_index_is_an_error() {
        let grid = Grid::new(&[2, 2]).expect("grid");
        let schedule = Schedule::new(&grid, vec![1, 4]);
        assert!(schedule.coordinates().is_err());
        assert!(schedule.write_to(&mut Vec::new()).is_err());
    }

    #[test]
    fn serializes_as_sizes_and_indices() {
        let grid = Grid::new(&[8]).expect("grid");
        let schedule = Schedule::new(&grid, vec![1, 2, 4, 5]);
        let json = serde_json::to_string(&schedule).expect("serialize");
        assert_eq!(json, r#"{"sizes":[8],"indices":[1,2,4,5]}"#);
        let back: Schedule = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, schedule);
    }
}
