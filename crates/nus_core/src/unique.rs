//! Ordered set of linear indices.

use std::collections::BTreeSet;

/// Collects unique linear indices and hands them back in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueIndexSet {
    tree: BTreeSet<usize>,
}

impl UniqueIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning whether it was not already present.
    pub fn insert(&mut self, value: usize) -> bool {
        self.tree.insert(value)
    }

    /// Number of distinct values held.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn contains(&self, value: usize) -> bool {
        self.tree.contains(&value)
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.tree.iter().copied()
    }

    /// Flattens the set into an ascending vector.
    pub fn into_sorted_vec(self) -> Vec<usize> {
        self.tree.into_iter().collect()
    }
}

impl Extend<usize> for UniqueIndexSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        self.tree.extend(iter);
    }
}

impl FromIterator<usize> for UniqueIndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            tree: iter.into_iter().collect(),
        }
    }
}
