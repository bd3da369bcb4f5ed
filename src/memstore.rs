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

//! The live write buffer: the set of cells accepting writes, a frozen
//! snapshot set awaiting flush, and the size/time-range bookkeeping that
//! goes with both. The `live`/`snapshot` split and its `arc_swap::ArcSwap`
//! pointer swap is modeled on `HummockReadVersion`'s staging/committed split
//! in `hummock/store/version.rs`: flush handoff there is also "swap a
//! reference, don't copy the data".

use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::allocator::SlabAllocator;
use crate::cell::Cell;
use crate::cell_set::CellSet;
use crate::clock::{Clock, SystemClock};
use crate::config::MemStoreConfig;
use crate::error::{MemStoreError, Result};
use crate::row_key_tracker::RowKeyTracker;
use crate::scanner::MemStoreScanner;
use crate::size::{HeapSize, DEEP_OVERHEAD, FIXED_OVERHEAD};
use crate::time_range::TimeRangeTracker;

/// One generation of `(cells, allocator, time range)`, swapped as a unit so a
/// scanner (or `snapshot()`) observing `live`/`snapshot` via a single atomic
/// load always sees a mutually consistent triple.
struct Generation {
    cells: Arc<CellSet>,
    allocator: Option<Arc<SlabAllocator>>,
    time_range: Arc<TimeRangeTracker>,
}

impl Generation {
    fn fresh(config: &MemStoreConfig) -> Self {
        Self {
            cells: Arc::new(CellSet::new()),
            allocator: config
                .use_slab_allocator
                .then(|| Arc::new(SlabAllocator::new(config.slab_chunk_size, config.slab_max_alloc_size))),
            time_range: Arc::new(TimeRangeTracker::new()),
        }
    }
}

/// Descriptor handed to the flusher by [`MemStore::snapshot`].
pub struct MemStoreSnapshot {
    pub id: i64,
    pub cell_count: usize,
    pub byte_size: u64,
    pub time_range_min: i64,
    pub time_range_max: i64,
    pub scanner: MemStoreScanner,
}

pub struct MemStore {
    config: MemStoreConfig,
    live: ArcSwap<Generation>,
    snapshot: ArcSwap<Generation>,
    heap_size: AtomicI64,
    snapshot_size: AtomicI64,
    snapshot_id: AtomicI64,
    time_of_oldest_edit: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl MemStore {
    pub fn new(config: MemStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MemStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            live: ArcSwap::from_pointee(Generation::fresh(&config)),
            snapshot: ArcSwap::from_pointee(Generation::fresh(&config)),
            heap_size: AtomicI64::new(DEEP_OVERHEAD as i64),
            snapshot_size: AtomicI64::new(0),
            snapshot_id: AtomicI64::new(-1),
            time_of_oldest_edit: AtomicI64::new(i64::MAX),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &MemStoreConfig {
        &self.config
    }

    pub fn cell_count(&self) -> usize {
        self.live.load().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.load().cells.is_empty()
    }

    pub fn heap_size(&self) -> i64 {
        self.heap_size.load(Ordering::Acquire)
    }

    pub fn time_of_oldest_edit(&self) -> i64 {
        self.time_of_oldest_edit.load(Ordering::Acquire)
    }

    /// Inserts `cell` into the live set, optionally cloning its value into the
    /// live allocator. Returns the change in `heapSize` (zero if an
    /// identical cell — same key fields and mvcc — was already present).
    pub fn add(&self, cell: Cell) -> i64 {
        self.store_cell(cell, false)
    }

    /// Same as [`Self::add`]; `cell`'s type tag marks it a tombstone. The
    /// core does not interpret tombstones against puts — that's the merge
    /// layer's job (spec.md §1 non-goals).
    pub fn delete(&self, cell: Cell) -> i64 {
        self.store_cell(cell, false)
    }

    fn store_cell(&self, cell: Cell, bypass_allocator: bool) -> i64 {
        let generation = self.live.load();
        let cell = if !bypass_allocator && self.config.use_slab_allocator {
            match &generation.allocator {
                Some(allocator) => cell.with_allocator(allocator),
                None => cell,
            }
        } else {
            cell
        };

        if !generation.cells.add(cell.clone()) {
            return 0;
        }

        generation.time_range.update(cell.timestamp());
        self.record_oldest_edit();

        let delta = FIXED_OVERHEAD as i64 + cell.heap_size() as i64;
        self.heap_size.fetch_add(delta, Ordering::AcqRel);
        delta
    }

    fn record_oldest_edit(&self) {
        if self.time_of_oldest_edit.load(Ordering::Acquire) == i64::MAX {
            let now = self.clock.now_millis();
            let _ = self.time_of_oldest_edit.compare_exchange(
                i64::MAX,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Inserts each of `cells` (bypassing the allocator — see spec.md §4.1's
    /// warning about slab thrash from hot counter workloads), then collapses
    /// older `Put` versions of the same column that are visible at
    /// `read_point` down to the single oldest one still needed by a live
    /// scanner. Returns the net change in `heapSize`.
    pub fn upsert(&self, cells: Vec<Cell>, read_point: u64) -> i64 {
        let mut total = 0i64;
        for cell in cells {
            total += self.store_cell(cell.clone(), true);
            total += self.collapse_column(&cell, read_point);
        }
        total
    }

    fn collapse_column(&self, cell: &Cell, read_point: u64) -> i64 {
        let generation = self.live.load();
        let sentinel = Cell::first_on_column(cell.row().clone(), cell.family().clone(), cell.qualifier().clone());

        let mut delta = 0i64;
        let mut kept_one = false;
        for candidate in generation.cells.tail_from(&sentinel) {
            if !candidate.same_column(cell) {
                break;
            }
            if candidate == *cell {
                continue;
            }
            if candidate.cell_type() != crate::cell::CellType::Put {
                continue;
            }
            if candidate.mvcc() > read_point {
                continue;
            }
            if !kept_one {
                kept_one = true;
                continue;
            }
            if generation.cells.remove(&candidate) {
                let removed = FIXED_OVERHEAD as i64 + candidate.heap_size() as i64;
                self.heap_size.fetch_sub(removed, Ordering::AcqRel);
                delta -= removed;
            }
        }
        delta
    }

    /// Removes `cell` from `snapshot` if present, and from `live` if present,
    /// subtracting its size from `heapSize` in the latter case. Because
    /// `Cell` equality includes the mvcc field, this only ever removes an
    /// exact (key, mvcc) match — a mismatched mvcc is a silent no-op, as
    /// spec.md §8 scenario 5 requires.
    pub fn rollback(&self, cell: &Cell) {
        self.snapshot.load().cells.remove(cell);

        let live = self.live.load();
        if live.cells.remove(cell) {
            let removed = FIXED_OVERHEAD as i64 + cell.heap_size() as i64;
            self.heap_size.fetch_sub(removed, Ordering::AcqRel);
        }
    }

    /// Freezes the live set aside as a snapshot for the flusher, in O(1) via
    /// a pointer swap. If a snapshot is already outstanding, logs a warning
    /// and returns a descriptor for the existing one without mutating state.
    pub fn snapshot(&self) -> MemStoreSnapshot {
        let outstanding = self.snapshot.load_full();
        if !outstanding.cells.is_empty() {
            tracing::warn!(
                snapshot_id = self.snapshot_id.load(Ordering::Acquire),
                "snapshot() called while a previous snapshot is still outstanding; \
                 returning the existing descriptor"
            );
            return self.snapshot_descriptor(&outstanding);
        }

        let id = self.clock.now_millis();
        let live = self.live.load_full();
        let frozen_size = (self.heap_size.load(Ordering::Acquire) - DEEP_OVERHEAD as i64).max(0);

        self.snapshot_id.store(id, Ordering::Release);
        self.snapshot_size.store(frozen_size, Ordering::Release);
        self.snapshot.store(live.clone());
        self.live.store(Arc::new(Generation::fresh(&self.config)));
        self.heap_size.store(DEEP_OVERHEAD as i64, Ordering::Release);
        self.time_of_oldest_edit.store(i64::MAX, Ordering::Release);

        self.snapshot_descriptor(&live)
    }

    fn snapshot_descriptor(&self, generation: &Arc<Generation>) -> MemStoreSnapshot {
        let scanner = MemStoreScanner::with_time_ranges(
            u64::MAX,
            Arc::new(CellSet::new()),
            generation.cells.clone(),
            None,
            generation.allocator.clone(),
            (i64::MAX, i64::MIN),
            (generation.time_range.min(), generation.time_range.max()),
        );
        MemStoreSnapshot {
            id: self.snapshot_id.load(Ordering::Acquire),
            cell_count: generation.cells.len(),
            byte_size: self.snapshot_size.load(Ordering::Acquire) as u64,
            time_range_min: generation.time_range.min(),
            time_range_max: generation.time_range.max(),
            scanner,
        }
    }

    /// Clears the outstanding snapshot once the flusher has persisted it.
    /// Fails if `id` doesn't match the currently outstanding snapshot id.
    pub fn clear_snapshot(&self, id: i64) -> Result<()> {
        let current = self.snapshot_id.load(Ordering::Acquire);
        if current != id {
            return Err(MemStoreError::SnapshotIdMismatch {
                expected: current,
                actual: id,
            });
        }

        if let Some(allocator) = &self.snapshot.load().allocator {
            allocator.close();
        }
        self.snapshot.store(Arc::new(Generation::fresh(&self.config)));
        self.snapshot_size.store(0, Ordering::Release);
        self.snapshot_id.store(-1, Ordering::Release);
        Ok(())
    }

    /// Bytes a flush should account for: the outstanding snapshot's frozen
    /// size, or the live set's current size if no flush is in progress.
    pub fn flushable_size(&self) -> u64 {
        if self.snapshot_id.load(Ordering::Acquire) >= 0 {
            self.snapshot_size.load(Ordering::Acquire) as u64
        } else {
            (self.heap_size.load(Ordering::Acquire) - DEEP_OVERHEAD as i64).max(0) as u64
        }
    }

    /// Opens a scanner over `live ∪ snapshot` frozen at `read_point`. The
    /// scanner captures the current `live`/`snapshot` references at
    /// construction time; a later `snapshot()` call does not affect it (see
    /// spec.md §9 "long scanner + flush blind spot").
    pub fn scanner(&self, read_point: u64) -> MemStoreScanner {
        let live = self.live.load_full();
        let snap = self.snapshot.load_full();
        MemStoreScanner::with_time_ranges(
            read_point,
            live.cells.clone(),
            snap.cells.clone(),
            live.allocator.clone(),
            snap.allocator.clone(),
            (live.time_range.min(), live.time_range.max()),
            (snap.time_range.min(), snap.time_range.max()),
        )
    }

    pub fn live_time_range(&self) -> (i64, i64) {
        let tr = &self.live.load().time_range;
        (tr.min(), tr.max())
    }

    pub fn snapshot_time_range(&self) -> (i64, i64) {
        let tr = &self.snapshot.load().time_range;
        (tr.min(), tr.max())
    }

    /// The smallest cell across `live ∪ snapshot` whose row sorts strictly
    /// after `cell`'s row, or the first cell overall if `cell` is `None`.
    pub fn next_row(&self, cell: Option<&Cell>) -> Option<Cell> {
        let live = self.live.load();
        let snap = self.snapshot.load();

        let start_bound = match cell {
            None => Bound::Unbounded,
            Some(c) => Bound::Included(Cell::first_on_row(c.row().clone())),
        };
        let mut current = min_cell(
            live.cells.ceiling_owned(start_bound.clone()),
            snap.cells.ceiling_owned(start_bound),
        )?;

        if let Some(c) = cell {
            while current.row() == c.row() {
                current = min_cell(
                    live.cells.ceiling_owned(Bound::Excluded(current.clone())),
                    snap.cells.ceiling_owned(Bound::Excluded(current.clone())),
                )?;
            }
        }
        Some(current)
    }

    /// Legacy row-addressing helper: forward-probes for `tracker`'s target
    /// row, then walks backwards a row at a time over `live`, then
    /// `snapshot`, pruning cells older than `oldest_unexpired_ts` along the
    /// way. See [`RowKeyTracker`] for the collaborator contract.
    pub fn row_key_at_or_before<T: RowKeyTracker>(&self, tracker: &mut T, oldest_unexpired_ts: i64) {
        let live = self.live.load();
        Self::walk_for_row_before(&live.cells, tracker, oldest_unexpired_ts);
        let snap = self.snapshot.load();
        Self::walk_for_row_before(&snap.cells, tracker, oldest_unexpired_ts);
    }

    fn walk_for_row_before<T: RowKeyTracker>(set: &CellSet, tracker: &mut T, oldest_unexpired_ts: i64) {
        let target = Cell::first_on_row(Bytes::copy_from_slice(tracker.target_row()));
        if let Some(candidate) = set.ceiling(Bound::Included(&target)) {
            if candidate.row().as_ref() == tracker.target_row() {
                tracker.update(candidate.row().clone());
                return;
            }
        }

        let mut upper_bound = target;
        loop {
            let mut walk = set.descending_from(Bound::Excluded(&upper_bound));
            let Some(first_entry) = walk.next() else {
                break;
            };
            let row = first_entry.value().row().clone();
            if !tracker.in_range(&row) || !tracker.is_better_candidate(&row) {
                break;
            }

            let mut found = false;
            let mut entry_opt = Some(first_entry);
            while let Some(entry) = entry_opt {
                let c = entry.value();
                if c.row() != &row {
                    break;
                }
                if c.timestamp() < oldest_unexpired_ts {
                    entry.remove();
                } else {
                    found = true;
                }
                entry_opt = walk.next();
            }

            if found {
                tracker.update(row);
                return;
            }
            upper_bound = Cell::first_on_row(row);
        }
    }
}

pub(crate) fn min_cell(a: Option<Cell>, b: Option<Cell>) -> Option<Cell> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x <= y { x } else { y }),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

/// Mirror of [`min_cell`] for merges that want the larger (closer) of the
/// two candidates — used when walking backwards, where "closer to the seek
/// point" means the greater element under `Cell`'s ordering.
pub(crate) fn max_cell(a: Option<Cell>, b: Option<Cell>) -> Option<Cell> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x >= y { x } else { y }),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cell::CellType;
    use crate::clock::FakeClock;

    fn cell(row: &str, ts: i64, mvcc: u64, val: &str, cell_type: CellType) -> Cell {
        Cell::new(
            Bytes::copy_from_slice(row.as_bytes()),
            Bytes::from_static(b"f"),
            Bytes::from_static(b"q"),
            ts,
            cell_type,
            mvcc,
            Bytes::copy_from_slice(val.as_bytes()),
        )
    }

    fn put(row: &str, ts: i64, mvcc: u64, val: &str) -> Cell {
        cell(row, ts, mvcc, val, CellType::Put)
    }

    fn memstore_with_clock(start: i64) -> (MemStore, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(start));
        let store = MemStore::with_clock(MemStoreConfig::default(), clock.clone());
        (store, clock)
    }

    #[test]
    fn scenario_1_simple_add_snapshot_clear() {
        let (store, _clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "v"));

        let snap = store.snapshot();
        assert_eq!(snap.cell_count, 1);
        assert!(snap.byte_size > 0);

        store.clear_snapshot(snap.id).unwrap();
        assert_eq!(store.heap_size(), DEEP_OVERHEAD as i64);
        assert_eq!(store.flushable_size(), 0);
    }

    #[test]
    fn scenario_2_upsert_collapses_older_versions() {
        use crate::scanner::KeyValueScanner;

        let (store, _clock) = memstore_with_clock(1000);
        let read_point = 100;

        store.upsert(vec![cell("r1", 10, 1, "a", CellType::Put)], read_point);
        store.upsert(vec![cell("r1", 11, 2, "b", CellType::Put)], read_point);

        let mut scanner = store.scanner(read_point);
        scanner.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1"))));
        assert_eq!(&scanner.next().unwrap().value()[..], b"b");
        assert_eq!(&scanner.next().unwrap().value()[..], b"a");
        assert!(scanner.next().is_none());

        store.upsert(vec![cell("r1", 12, 3, "c", CellType::Put)], read_point);
        let mut scanner = store.scanner(read_point);
        scanner.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1"))));
        assert_eq!(&scanner.next().unwrap().value()[..], b"c");
        assert_eq!(&scanner.next().unwrap().value()[..], b"b");
        assert!(scanner.next().is_none());
    }

    #[test]
    fn scenario_3_snapshot_isolation() {
        use crate::scanner::KeyValueScanner;

        let (store, _clock) = memstore_with_clock(1000);
        let mut long_lived = store.scanner(5);

        store.add(cell("r1", 1, 6, "x", CellType::Put));
        store.snapshot();
        store.add(cell("r1", 2, 7, "y", CellType::Put));

        long_lived.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1"))));
        assert!(long_lived.peek().is_none());

        let mut fresh = store.scanner(7);
        fresh.seek(Some(&Cell::first_on_row(Bytes::from_static(b"r1"))));
        let first = fresh.next().unwrap();
        assert_eq!(&first.value()[..], b"y");
        let second = fresh.next().unwrap();
        assert_eq!(&second.value()[..], b"x");
        assert!(fresh.next().is_none());
    }

    #[test]
    fn scenario_4_reverse_scan_across_rows() {
        use crate::scanner::KeyValueScanner;

        let (store, _clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "v"));
        store.add(put("r2", 1, 1, "v"));
        store.add(put("r3", 1, 1, "v"));

        let mut scanner = store.scanner(1);
        assert!(scanner.seek_to_last_row());
        assert_eq!(scanner.peek().unwrap().row().as_ref(), b"r3");

        assert!(scanner.seek_to_previous_row(&put("r3", 1, 1, "v")));
        assert_eq!(scanner.peek().unwrap().row().as_ref(), b"r2");

        assert!(scanner.seek_to_previous_row(&put("r2", 1, 1, "v")));
        assert_eq!(scanner.peek().unwrap().row().as_ref(), b"r1");

        assert!(!scanner.seek_to_previous_row(&put("r1", 1, 1, "v")));
    }

    #[test]
    fn scenario_5_rollback_requires_mvcc_match() {
        let (store, _clock) = memstore_with_clock(1000);
        store.add(cell("r1", 1, 5, "a", CellType::Put));

        store.rollback(&cell("r1", 1, 6, "a", CellType::Put));
        assert!(store.heap_size() > DEEP_OVERHEAD as i64);

        store.rollback(&cell("r1", 1, 5, "a", CellType::Put));
        assert_eq!(store.heap_size(), DEEP_OVERHEAD as i64);
    }

    #[test]
    fn add_of_identical_cell_is_a_noop() {
        let (store, _clock) = memstore_with_clock(1000);
        let delta = store.add(put("r1", 1, 1, "v"));
        assert!(delta > 0);
        let second = store.add(put("r1", 1, 1, "v"));
        assert_eq!(second, 0);
        assert_eq!(store.cell_count(), 1);
    }

    #[test]
    fn snapshot_on_empty_memstore_is_well_formed() {
        let (store, _clock) = memstore_with_clock(1000);
        let snap = store.snapshot();
        assert_eq!(snap.cell_count, 0);
        assert_eq!(snap.byte_size, 0);
        assert!(snap.id >= 0);
        assert_eq!(store.heap_size(), DEEP_OVERHEAD as i64);
    }

    #[test]
    fn snapshot_while_outstanding_does_not_mutate_state() {
        let (store, clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "v"));
        let first = store.snapshot();

        clock.advance(10);
        store.add(put("r2", 2, 2, "v"));
        let second = store.snapshot();

        assert_eq!(first.id, second.id);
        assert_eq!(second.cell_count, 1);
        // The new write landed in the fresh live set, untouched by the stale snapshot() call.
        assert_eq!(store.cell_count(), 1);
    }

    #[test]
    fn clear_snapshot_rejects_mismatched_id() {
        let (store, _clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "v"));
        let snap = store.snapshot();
        let err = store.clear_snapshot(snap.id + 1).unwrap_err();
        assert_eq!(
            err,
            MemStoreError::SnapshotIdMismatch {
                expected: snap.id,
                actual: snap.id + 1
            }
        );
    }

    #[test]
    fn next_row_skips_to_a_strictly_later_row() {
        let (store, _clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "a"));
        store.add(put("r1", 2, 2, "b"));
        store.add(put("r2", 1, 1, "c"));

        let first = store.next_row(None).unwrap();
        assert_eq!(first.row().as_ref(), b"r1");

        let next = store.next_row(Some(&first)).unwrap();
        assert_eq!(next.row().as_ref(), b"r2");

        assert!(store.next_row(Some(&next)).is_none());
    }

    struct VecTracker {
        target: Bytes,
        floor: Bytes,
        best: Option<Bytes>,
    }

    impl RowKeyTracker for VecTracker {
        fn target_row(&self) -> &[u8] {
            &self.target
        }

        fn in_range(&self, row: &[u8]) -> bool {
            row >= self.floor.as_ref()
        }

        fn is_better_candidate(&self, row: &[u8]) -> bool {
            self.best.as_deref().map(|b| row > b).unwrap_or(true)
        }

        fn update(&mut self, row: Bytes) {
            self.best = Some(row);
        }
    }

    #[test]
    fn row_key_at_or_before_walks_backwards_when_target_missing() {
        let (store, _clock) = memstore_with_clock(1000);
        store.add(put("r1", 1, 1, "a"));
        store.add(put("r3", 1, 1, "c"));

        let mut tracker = VecTracker {
            target: Bytes::from_static(b"r2"),
            floor: Bytes::from_static(b""),
            best: None,
        };
        store.row_key_at_or_before(&mut tracker, i64::MIN);
        assert_eq!(tracker.best.unwrap(), Bytes::from_static(b"r1"));
    }
}
