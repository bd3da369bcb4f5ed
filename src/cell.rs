// Copyright 2024 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The cell record and its comparator.

use std::cmp::Ordering;
use std::ops::Deref;

use bytes::Bytes;

use crate::allocator::{SlabAllocator, Slice};
use crate::size::HeapSize;

/// Timestamp sentinel meaning "the newest version", used by first-on-row and
/// first-on-column sentinels so they sort before any real cell at that key.
pub const LATEST_TIMESTAMP: i64 = i64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CellType {
    /// Sorts before every other type at equal (row, family, qualifier, timestamp).
    /// Only used for sentinel construction; never stored in a live set.
    Minimum,
    DeleteFamily,
    DeleteColumn,
    Delete,
    Put,
    /// Sorts after every other type. Only used for sentinel construction.
    Maximum,
}

impl CellType {
    /// Deletes must sort before puts at equal timestamp so tombstones lead;
    /// `Minimum`/`Maximum` bracket everything for sentinel use.
    fn rank(self) -> u8 {
        match self {
            CellType::Minimum => 0,
            CellType::DeleteFamily => 1,
            CellType::DeleteColumn => 2,
            CellType::Delete => 3,
            CellType::Put => 4,
            CellType::Maximum => 5,
        }
    }

    pub fn is_delete(self) -> bool {
        matches!(
            self,
            CellType::Delete | CellType::DeleteColumn | CellType::DeleteFamily
        )
    }
}

/// Backing storage for a cell's value bytes: either its own `Bytes` buffer,
/// or a slice carved out of a slab allocator's chunk.
#[derive(Clone, Debug)]
pub enum CellBytes {
    Heap(Bytes),
    Slab(Slice),
}

impl Deref for CellBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            CellBytes::Heap(b) => b.as_ref(),
            CellBytes::Slab(s) => s.deref(),
        }
    }
}

impl From<Bytes> for CellBytes {
    fn from(b: Bytes) -> Self {
        CellBytes::Heap(b)
    }
}

/// An immutable cell record: `(row, family, qualifier, timestamp, type, mvcc) -> value`.
///
/// Ordering (see spec.md §3) is by `(row, family, qualifier)` ascending, then
/// timestamp descending, then type (deletes before puts), then mvcc
/// ascending. Equality follows the same fields — two cells with the same key
/// fields are the same element of a `CellSet` regardless of their value.
#[derive(Clone, Debug)]
pub struct Cell {
    row: Bytes,
    family: Bytes,
    qualifier: Bytes,
    timestamp: i64,
    cell_type: CellType,
    mvcc: u64,
    value: CellBytes,
}

impl Cell {
    pub fn new(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: i64,
        cell_type: CellType,
        mvcc: u64,
        value: impl Into<CellBytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            cell_type,
            mvcc,
            value: value.into(),
        }
    }

    /// A sentinel that sorts before any real cell at `row`: empty family and
    /// qualifier, `LATEST_TIMESTAMP`, `Minimum` type, zero mvcc.
    pub fn first_on_row(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            family: Bytes::new(),
            qualifier: Bytes::new(),
            timestamp: LATEST_TIMESTAMP,
            cell_type: CellType::Minimum,
            mvcc: 0,
            value: CellBytes::Heap(Bytes::new()),
        }
    }

    /// A sentinel that sorts before any real cell at `(row, family, qualifier)`.
    pub fn first_on_column(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp: LATEST_TIMESTAMP,
            cell_type: CellType::Minimum,
            mvcc: 0,
            value: CellBytes::Heap(Bytes::new()),
        }
    }

    pub fn row(&self) -> &Bytes {
        &self.row
    }

    pub fn family(&self) -> &Bytes {
        &self.family
    }

    pub fn qualifier(&self) -> &Bytes {
        &self.qualifier
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn mvcc(&self) -> u64 {
        self.mvcc
    }

    pub fn value(&self) -> &CellBytes {
        &self.value
    }

    /// True if `self` and `other` share the same (row, family, qualifier): the
    /// granularity `upsert` collapses over.
    pub fn same_column(&self, other: &Cell) -> bool {
        self.row == other.row && self.family == other.family && self.qualifier == other.qualifier
    }

    /// Returns a copy of this cell whose value is backed by `allocator`, or
    /// `self` unchanged if the value doesn't fit the allocator's configured
    /// maximum slab size.
    pub fn with_allocator(mut self, allocator: &SlabAllocator) -> Self {
        if let CellBytes::Heap(bytes) = &self.value {
            if let Some(slice) = allocator.allocate(bytes) {
                self.value = CellBytes::Slab(slice);
            }
        }
        self
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.family.cmp(&other.family))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            // timestamp sorts descending: newer first within the same column
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| self.cell_type.rank().cmp(&other.cell_type.rank()))
            .then_with(|| self.mvcc.cmp(&other.mvcc))
    }
}

impl HeapSize for Cell {
    fn heap_size(&self) -> usize {
        // Fixed fields (timestamp, type tag, mvcc) plus each variable-length
        // buffer's bytes and a small per-buffer slop for the `Bytes`/`Slice`
        // handle itself.
        const BUFFER_HANDLE_OVERHEAD: usize = 24;
        17 + 4 * BUFFER_HANDLE_OVERHEAD
            + self.row.len()
            + self.family.len()
            + self.qualifier.len()
            + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(row: &str, fam: &str, qual: &str, ts: i64, mvcc: u64, val: &str) -> Cell {
        Cell::new(
            Bytes::copy_from_slice(row.as_bytes()),
            Bytes::copy_from_slice(fam.as_bytes()),
            Bytes::copy_from_slice(qual.as_bytes()),
            ts,
            CellType::Put,
            mvcc,
            Bytes::copy_from_slice(val.as_bytes()),
        )
    }

    #[test]
    fn orders_by_row_then_family_then_qualifier() {
        let a = put("a", "f", "q", 1, 1, "v");
        let b = put("b", "f", "q", 1, 1, "v");
        assert!(a < b);
    }

    #[test]
    fn newer_timestamp_sorts_first() {
        let newer = put("r", "f", "q", 10, 1, "v");
        let older = put("r", "f", "q", 5, 1, "v");
        assert!(newer < older);
    }

    #[test]
    fn delete_sorts_before_put_at_equal_timestamp() {
        let delete = Cell::new(
            Bytes::from_static(b"r"),
            Bytes::from_static(b"f"),
            Bytes::from_static(b"q"),
            5,
            CellType::Delete,
            1,
            Bytes::new(),
        );
        let put = put("r", "f", "q", 5, 1, "v");
        assert!(delete < put);
    }

    #[test]
    fn mvcc_ascends_as_final_tiebreak() {
        let earlier_mvcc = put("r", "f", "q", 5, 1, "v");
        let later_mvcc = put("r", "f", "q", 5, 2, "v");
        assert!(earlier_mvcc < later_mvcc);
    }

    #[test]
    fn sentinel_sorts_before_any_real_cell_in_row() {
        let sentinel = Cell::first_on_row(Bytes::from_static(b"r"));
        let real = put("r", "f", "q", 5, 1, "v");
        assert!(sentinel < real);
    }

    #[test]
    fn equality_ignores_value_bytes() {
        let a = put("r", "f", "q", 5, 1, "a");
        let b = put("r", "f", "q", 5, 1, "b");
        assert_eq!(a, b);
    }
}
