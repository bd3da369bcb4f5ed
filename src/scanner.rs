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

//! MVCC-filtered forward and reverse scanning over `live ∪ snapshot`.
//!
//! A scanner can't hold a `crossbeam_skiplist::set::Entry` cursor across
//! calls — that entry borrows from the `CellSet` the scanner itself would
//! also need to own, which `Arc<CellSet>` plus a borrowed `Entry` can't
//! express without self-referential struct tricks. Instead each side's
//! position is a `Bound<Cell>` that gets handed back to `CellSet::ceiling`/
//! `floor` fresh on every step — a little more work per step, in exchange for
//! a scanner that's an ordinary owned struct.

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::allocator::SlabAllocator;
use crate::cell::Cell;
use crate::cell_set::CellSet;
use crate::time_range::TimeRangeQuery;

/// The interface a merge/region scanner drives a single memstore's
/// contribution through, mirroring spec.md §5's operation list.
pub trait KeyValueScanner {
    /// Repositions to the first visible cell at or after `key`. `key` is
    /// required — per spec.md §4.4, a `None` key closes the scanner and
    /// returns `false` rather than seeking to the start of the set.
    fn seek(&mut self, key: Option<&Cell>) -> bool;

    /// Like `seek`, but assumes the scanner is already positioned at or
    /// before `key` and only needs to move forward.
    fn reseek(&mut self, key: &Cell) -> bool;

    /// Returns the next visible cell without consuming it.
    fn peek(&self) -> Option<&Cell>;

    /// Consumes and returns the next visible cell, advancing the scanner.
    fn next(&mut self) -> Option<Cell>;

    /// Repositions to the last visible cell at or before `key`.
    fn backward_seek(&mut self, key: &Cell) -> bool;

    /// Repositions to the last visible cell of the row strictly before
    /// `current`'s row.
    fn seek_to_previous_row(&mut self, current: &Cell) -> bool;

    /// Repositions to the last visible cell of the last row in the set.
    fn seek_to_last_row(&mut self) -> bool;

    /// The read-point this scanner filters against; `u64::MAX` for a
    /// memstore-flush scanner that must see every mvcc (spec.md §5).
    fn sequence_id(&self) -> u64;

    /// True if this scanner could contribute a cell to `scan`, given the
    /// time range it was constructed over and TTL-style expiry.
    fn should_use_scanner(&self, scan: &TimeRangeQuery, oldest_unexpired_ts: i64) -> bool;

    fn close(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ScannerState {
    Fresh,
    Seeked,
    Exhausted,
    Closed,
}

/// Forward/reverse MVCC-filtered scanner over a `live` and a `snapshot` cell
/// set, merging the two on every step by taking whichever side's candidate
/// sorts first.
pub struct MemStoreScanner {
    read_point: u64,
    live: Arc<CellSet>,
    snap: Arc<CellSet>,
    live_allocator: Option<Arc<SlabAllocator>>,
    snap_allocator: Option<Arc<SlabAllocator>>,
    live_time_range: (i64, i64),
    snap_time_range: (i64, i64),
    live_bound: Option<Bound<Cell>>,
    snap_bound: Option<Bound<Cell>>,
    live_next: Option<Cell>,
    snap_next: Option<Cell>,
    the_next: Option<Cell>,
    last_emitted: Option<Cell>,
    /// Reverse-mode guard (spec.md §4.4's `stopIfNextRow`): while set, the
    /// MVCC-filtering walk in [`advance_forward`] stops instead of
    /// continuing past this row, so skipping invisible versions during a
    /// `seekToPreviousRow` can't silently cross into a row beyond the one
    /// being sought.
    stop_if_next_row: Option<Bytes>,
    state: ScannerState,
}

/// Walks `set` forward from `bound`, skipping cells whose mvcc postdates
/// `read_point`, and returns the first one that's visible. If `stop_row` is
/// set and the walk advances to a cell whose row sorts strictly after it,
/// stops and returns `None` instead of continuing into that row.
fn advance_forward(
    set: &CellSet,
    bound: &mut Option<Bound<Cell>>,
    read_point: u64,
    stop_row: Option<&Bytes>,
) -> Option<Cell> {
    loop {
        let current_bound = bound.take().unwrap_or(Bound::Unbounded);
        let candidate = set.ceiling_owned(current_bound)?;
        if let Some(stop_row) = stop_row {
            if candidate.row() > stop_row {
                *bound = Some(Bound::Excluded(candidate));
                return None;
            }
        }
        if candidate.mvcc() <= read_point {
            *bound = Some(Bound::Included(candidate.clone()));
            return Some(candidate);
        }
        *bound = Some(Bound::Excluded(candidate));
    }
}

impl MemStoreScanner {
    pub fn new(
        read_point: u64,
        live: Arc<CellSet>,
        snap: Arc<CellSet>,
        live_allocator: Option<Arc<SlabAllocator>>,
        snap_allocator: Option<Arc<SlabAllocator>>,
    ) -> Self {
        Self::with_time_ranges(
            read_point,
            live,
            snap,
            live_allocator,
            snap_allocator,
            (i64::MAX, i64::MIN),
            (i64::MAX, i64::MIN),
        )
    }

    /// Full constructor, used by [`crate::memstore::MemStore`] so
    /// `should_use_scanner` can prune using the generation's actual time
    /// range rather than an empty one.
    pub fn with_time_ranges(
        read_point: u64,
        live: Arc<CellSet>,
        snap: Arc<CellSet>,
        live_allocator: Option<Arc<SlabAllocator>>,
        snap_allocator: Option<Arc<SlabAllocator>>,
        live_time_range: (i64, i64),
        snap_time_range: (i64, i64),
    ) -> Self {
        if let Some(a) = &live_allocator {
            a.inc_scanner_count();
        }
        if let Some(a) = &snap_allocator {
            a.inc_scanner_count();
        }
        Self {
            read_point,
            live,
            snap,
            live_allocator,
            snap_allocator,
            live_time_range,
            snap_time_range,
            live_bound: None,
            snap_bound: None,
            live_next: None,
            snap_next: None,
            the_next: None,
            last_emitted: None,
            stop_if_next_row: None,
            state: ScannerState::Fresh,
        }
    }

    fn refill(&mut self) {
        let stop_row = self.stop_if_next_row.as_ref();
        if self.live_next.is_none() {
            self.live_next = advance_forward(&self.live, &mut self.live_bound, self.read_point, stop_row);
        }
        if self.snap_next.is_none() {
            self.snap_next = advance_forward(&self.snap, &mut self.snap_bound, self.read_point, stop_row);
        }
        self.the_next = crate::memstore::min_cell(self.live_next.clone(), self.snap_next.clone());
    }

    fn position_at(&mut self, bound: Bound<Cell>) -> bool {
        self.live_bound = Some(bound.clone());
        self.snap_bound = Some(bound);
        self.live_next = None;
        self.snap_next = None;
        self.refill();
        self.state = if self.the_next.is_some() {
            ScannerState::Seeked
        } else {
            ScannerState::Exhausted
        };
        self.the_next.is_some()
    }
}

impl KeyValueScanner for MemStoreScanner {
    fn seek(&mut self, key: Option<&Cell>) -> bool {
        let Some(key) = key else {
            self.close();
            return false;
        };
        self.position_at(Bound::Included(key.clone()))
    }

    fn reseek(&mut self, key: &Cell) -> bool {
        let resume_from = match (&self.last_emitted, Some(key)) {
            (Some(last), Some(k)) if last >= k => last.clone(),
            _ => key.clone(),
        };
        self.position_at(Bound::Included(resume_from))
    }

    fn peek(&self) -> Option<&Cell> {
        self.the_next.as_ref()
    }

    fn next(&mut self) -> Option<Cell> {
        let out = self.the_next.take()?;

        if self.live_next.as_ref() == Some(&out) {
            self.live_next = None;
        }
        if self.snap_next.as_ref() == Some(&out) {
            self.snap_next = None;
        }
        self.refill();

        self.last_emitted = Some(out.clone());
        if self.the_next.is_none() {
            self.state = ScannerState::Exhausted;
        }
        Some(out)
    }

    fn backward_seek(&mut self, key: &Cell) -> bool {
        // Each side's floor is its own best candidate at or before `key`;
        // feeding the winner of the two as a single shared bound would
        // discard the losing side's candidate whenever an MVCC-invisible
        // cell sits between it and the winner (see DESIGN.md). Seed each
        // side from its own floor instead and let the usual forward/MVCC
        // merge in `refill` pick the visible one that's actually closer.
        let live_floor = self.live.floor(Bound::Included(key));
        let snap_floor = self.snap.floor(Bound::Included(key));
        let live_has_floor = live_floor.is_some();
        let snap_has_floor = snap_floor.is_some();

        self.live_bound = live_floor.map(Bound::Included);
        self.snap_bound = snap_floor.map(Bound::Included);
        self.live_next = None;
        self.snap_next = None;

        if live_has_floor {
            self.live_next = advance_forward(&self.live, &mut self.live_bound, self.read_point, None);
        }
        if snap_has_floor {
            self.snap_next = advance_forward(&self.snap, &mut self.snap_bound, self.read_point, None);
        }
        self.the_next = crate::memstore::max_cell(self.live_next.clone(), self.snap_next.clone());

        self.state = if self.the_next.is_some() {
            ScannerState::Seeked
        } else {
            ScannerState::Exhausted
        };
        self.the_next.is_some()
    }

    fn seek_to_previous_row(&mut self, current: &Cell) -> bool {
        let row_start = Cell::first_on_row(current.row().clone());
        // headSet(rowStart) on both sides; the before-row candidate is the
        // larger (closer) of the two last elements, per spec.md §4.4.
        let candidate_live = self.live.floor(Bound::Excluded(&row_start));
        let candidate_snap = self.snap.floor(Bound::Excluded(&row_start));
        let candidate = crate::memstore::max_cell(candidate_live, candidate_snap);

        let Some(before_row) = candidate else {
            self.the_next = None;
            self.state = ScannerState::Exhausted;
            return false;
        };

        let prev_row = before_row.row().clone();
        self.stop_if_next_row = Some(prev_row.clone());
        let found = self.seek(Some(&Cell::first_on_row(prev_row.clone())));
        self.stop_if_next_row = None;

        if found && self.the_next.as_ref().map(|c| c.row()) == Some(&prev_row) {
            true
        } else {
            // Either every cell of `prev_row` was MVCC-invisible (the stop
            // guard made the seek come up empty) or it somehow landed past
            // `prev_row` anyway; either way, the real answer is one row
            // further back.
            self.seek_to_previous_row(&Cell::first_on_row(prev_row))
        }
    }

    fn seek_to_last_row(&mut self) -> bool {
        let candidate = crate::memstore::max_cell(self.live.last(), self.snap.last());
        match candidate {
            Some(last) => {
                let row = last.row().clone();
                self.seek(Some(&Cell::first_on_row(row)))
            }
            None => {
                self.the_next = None;
                self.state = ScannerState::Exhausted;
                false
            }
        }
    }

    fn sequence_id(&self) -> u64 {
        u64::MAX
    }

    fn should_use_scanner(&self, scan: &TimeRangeQuery, oldest_unexpired_ts: i64) -> bool {
        if self.state == ScannerState::Closed {
            return false;
        }
        let overlaps = |(min, max): (i64, i64)| min <= max && min <= scan.max && scan.min <= max;
        let newest = self.live_time_range.1.max(self.snap_time_range.1);
        (overlaps(self.live_time_range) || overlaps(self.snap_time_range)) && newest >= oldest_unexpired_ts
    }

    fn close(&mut self) {
        if self.state == ScannerState::Closed {
            return;
        }
        if let Some(a) = &self.live_allocator {
            a.dec_scanner_count();
        }
        if let Some(a) = &self.snap_allocator {
            a.dec_scanner_count();
        }
        self.state = ScannerState::Closed;
    }
}

impl Drop for MemStoreScanner {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cell::CellType;

    fn put(row: &str, ts: i64, mvcc: u64) -> Cell {
        Cell::new(
            Bytes::copy_from_slice(row.as_bytes()),
            Bytes::from_static(b"f"),
            Bytes::from_static(b"q"),
            ts,
            CellType::Put,
            mvcc,
            Bytes::from_static(b"v"),
        )
    }

    fn scanner(live: &CellSet, snap: &CellSet, read_point: u64) -> MemStoreScanner {
        MemStoreScanner::new(
            read_point,
            Arc::new(clone_set(live)),
            Arc::new(clone_set(snap)),
            None,
            None,
        )
    }

    fn clone_set(set: &CellSet) -> CellSet {
        let clone = CellSet::new();
        for entry in set.descending_iter() {
            clone.add(entry.value().clone());
        }
        clone
    }

    #[test]
    fn forward_scan_filters_by_mvcc() {
        let live = CellSet::new();
        live.add(put("r1", 1, 5));
        live.add(put("r1", 2, 15));
        let snap = CellSet::new();

        let mut s = scanner(&live, &snap, 10);
        assert!(s.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1")))));
        let first = s.next().unwrap();
        assert_eq!(first.mvcc(), 5);
        assert!(s.next().is_none());
    }

    #[test]
    fn seek_with_no_key_closes_and_returns_false() {
        let live = CellSet::new();
        live.add(put("r1", 1, 5));
        let snap = CellSet::new();

        let mut s = scanner(&live, &snap, 10);
        assert!(!s.seek(None));
        assert!(s.peek().is_none());
    }

    #[test]
    fn merges_live_and_snapshot_in_key_order() {
        let live = CellSet::new();
        live.add(put("r2", 1, 1));
        let snap = CellSet::new();
        snap.add(put("r1", 1, 1));

        let mut s = scanner(&live, &snap, 10);
        s.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1"))));
        assert_eq!(s.next().unwrap().row().as_ref(), b"r1");
        assert_eq!(s.next().unwrap().row().as_ref(), b"r2");
        assert!(s.next().is_none());
    }

    #[test]
    fn close_is_idempotent_and_releases_allocator_refcount() {
        let allocator = Arc::new(SlabAllocator::new(64, 64));
        allocator.inc_scanner_count();
        let live = Arc::new(CellSet::new());
        let snap = Arc::new(CellSet::new());

        let mut s = MemStoreScanner::new(10, live, snap, Some(allocator.clone()), None);
        assert_eq!(allocator.scanner_count(), 2);
        s.close();
        assert_eq!(allocator.scanner_count(), 1);
        s.close();
        assert_eq!(allocator.scanner_count(), 1);
    }

    #[test]
    fn sequence_id_is_max_for_flush_visibility() {
        let live = Arc::new(CellSet::new());
        let snap = Arc::new(CellSet::new());
        let s = MemStoreScanner::new(5, live, snap, None, None);
        assert_eq!(s.sequence_id(), u64::MAX);
    }
}
