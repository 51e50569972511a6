//! Fixed-size bucket grid.

use super::types::RecordId;

/// A `rows × cols` table of optional record ids stored contiguously.
///
/// Rows are buckets, columns are slots within a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<RecordId>>,
}

impl Grid {
    /// Create an empty grid.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// Number of buckets.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Slots per bucket.
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn index(&self, bucket: usize, position: usize) -> usize {
        debug_assert!(bucket < self.rows && position < self.cols);
        bucket * self.cols + position
    }

    /// Occupant of a slot.
    pub fn get(&self, bucket: usize, position: usize) -> Option<RecordId> {
        self.cells[self.index(bucket, position)]
    }

    /// Put `id` into a slot, returning the previous occupant.
    pub fn set(&mut self, bucket: usize, position: usize, id: RecordId) -> Option<RecordId> {
        let idx = self.index(bucket, position);
        self.cells[idx].replace(id)
    }

    /// Empty a slot, returning its occupant.
    pub fn take(&mut self, bucket: usize, position: usize) -> Option<RecordId> {
        let idx = self.index(bucket, position);
        self.cells[idx].take()
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = None);
    }

    /// Occupied slots of one bucket as `(position, id)`.
    pub fn bucket(&self, bucket: usize) -> impl Iterator<Item = (usize, RecordId)> + '_ {
        let start = bucket * self.cols;
        self.cells[start..start + self.cols]
            .iter()
            .enumerate()
            .filter_map(|(position, cell)| cell.map(|id| (position, id)))
    }

    /// Every occupied slot as `(bucket, position, id)`.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, RecordId)> + '_ {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(idx, cell)| cell.map(|id| (idx / cols, idx % cols, id)))
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }
}
