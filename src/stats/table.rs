use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-size `(origin, sequence)` table of atomic counters.
///
/// Dimensions are set at construction and never change. Out-of-range
/// coordinates yield `None` instead of panicking.
#[derive(Debug)]
pub struct PairTable {
    rows: usize,
    cols: usize,
    cells: Box<[AtomicU64]>,
}

impl PairTable {
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        let cells = (0..rows.saturating_mul(cols))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { rows, cols, cells }
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (row as usize) < self.rows && (col as usize) < self.cols
    }

    fn cell(&self, row: u32, col: u32) -> Option<&AtomicU64> {
        if !self.contains(row, col) {
            return None;
        }
        self.cells.get(row as usize * self.cols + col as usize)
    }

    #[must_use]
    pub fn get(&self, row: u32, col: u32) -> Option<u64> {
        self.cell(row, col).map(|c| c.load(Ordering::Acquire))
    }

    /// Overwrite a cell. Returns `false` if out of range.
    pub fn store(&self, row: u32, col: u32, value: u64) -> bool {
        match self.cell(row, col) {
            Some(c) => {
                c.store(value, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Add to a cell, returning the previous value.
    pub fn add(&self, row: u32, col: u32, value: u64) -> Option<u64> {
        self.cell(row, col)
            .map(|c| c.fetch_add(value, Ordering::AcqRel))
    }

    /// Sum of every cell.
    #[must_use]
    pub fn sum(&self) -> u64 {
        self.cells
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .fold(0u64, u64::saturating_add)
    }

    /// Iterate `((row, col), value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = ((u32, u32), u64)> + '_ {
        let cols = self.cols.max(1);
        self.cells.iter().enumerate().map(move |(i, c)| {
            (
                ((i / cols) as u32, (i % cols) as u32),
                c.load(Ordering::Acquire),
            )
        })
    }
}
