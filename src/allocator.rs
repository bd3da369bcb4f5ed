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

//! A chunked slab allocator for cell payload bytes.
//!
//! Mirrors the handle-plus-view idiom `BlockHolder` uses in
//! `hummock/block_cache.rs`: a `Slice` keeps its backing `Chunk` alive via
//! `Arc` and hands out a read-only view into it, so bytes are reachable for
//! exactly as long as something (a `Cell`, a scanner) holds the `Slice`.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// One fixed-capacity arena region. Bytes are carved out by an atomic bump
/// pointer (`used`); once written, a byte range is never touched again, so
/// concurrent readers never race with the writer that reserved it.
struct Chunk {
    data: UnsafeCell<Box<[u8]>>,
    used: AtomicUsize,
    capacity: usize,
}

// SAFETY: `data` is only ever written within the disjoint [used_before, used_after)
// range reserved by a successful `used.compare_exchange`, and only read back through
// ranges that have already been fully written. No two calls can reserve overlapping
// ranges, and the boxed slice is never resized or reallocated after construction.
unsafe impl Sync for Chunk {}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            used: AtomicUsize::new(0),
            capacity,
        }
    }

    fn try_carve(self: &Arc<Self>, bytes: &[u8]) -> Option<Slice> {
        let n = bytes.len();
        loop {
            let used = self.used.load(Ordering::Acquire);
            let end = used.checked_add(n)?;
            if end > self.capacity {
                return None;
            }
            if self
                .used
                .compare_exchange(used, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // SAFETY: [used, end) was just reserved exclusively by the CAS above.
                let dst = unsafe {
                    let ptr = (*self.data.get()).as_mut_ptr().add(used);
                    std::slice::from_raw_parts_mut(ptr, n)
                };
                dst.copy_from_slice(bytes);
                return Some(Slice {
                    chunk: self.clone(),
                    offset: used,
                    len: n,
                });
            }
        }
    }
}

/// A read-only view into a region of a [`Chunk`]. Cheap to clone (`Arc`
/// bump); keeps the chunk reachable for as long as any `Slice` into it is
/// reachable, which is what lets a scanner created before a flush keep
/// reading bytes that logically belong to the now-frozen snapshot set.
#[derive(Clone)]
pub struct Slice {
    chunk: Arc<Chunk>,
    offset: usize,
    len: usize,
}

impl Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: [offset, offset + len) was written exactly once by `try_carve`
        // before this `Slice` was constructed, and is never mutated afterwards.
        unsafe { &(*self.chunk.data.get())[self.offset..self.offset + self.len] }
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice").field("len", &self.len).finish()
    }
}

/// Chunked arena allocator, one per live/snapshot cell set.
///
/// `allocate` is called under the caller's read-lock (see spec.md §5);
/// `inc_scanner_count`/`dec_scanner_count` are atomic and may be called from
/// any thread without external synchronisation.
pub struct SlabAllocator {
    chunk_size: usize,
    max_alloc_size: usize,
    current: Mutex<Arc<Chunk>>,
    scanner_count: AtomicUsize,
    detached: AtomicBool,
}

impl SlabAllocator {
    pub fn new(chunk_size: usize, max_alloc_size: usize) -> Self {
        Self {
            chunk_size,
            max_alloc_size,
            current: Mutex::new(Arc::new(Chunk::new(chunk_size))),
            scanner_count: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    /// Copies `bytes` into the arena and returns a writable-at-allocation-time
    /// slice over the copy, or `None` if `bytes` exceeds `max_alloc_size` (the
    /// caller then keeps its own buffer).
    pub fn allocate(&self, bytes: &[u8]) -> Option<Slice> {
        if bytes.len() > self.max_alloc_size {
            return None;
        }
        loop {
            let current = self.current.lock().clone();
            if let Some(slice) = current.try_carve(bytes) {
                return Some(slice);
            }
            // The active chunk can't fit this request; replace it, but only if
            // nobody else beat us to it while we weren't holding the lock.
            let mut guard = self.current.lock();
            if Arc::ptr_eq(&guard, &current) {
                let capacity = self.chunk_size.max(bytes.len());
                *guard = Arc::new(Chunk::new(capacity));
            }
        }
    }

    pub fn inc_scanner_count(&self) {
        self.scanner_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_scanner_count(&self) {
        self.scanner_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn scanner_count(&self) -> usize {
        self.scanner_count.load(Ordering::Acquire)
    }

    /// Marks the allocator as detached from the `MemStore` (flush completed).
    /// Idempotent. Chunks become reclaimable once `scanner_count()` also
    /// reaches zero and the allocator itself is dropped.
    pub fn close(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// True once the allocator's chunks are no longer reachable by anything
    /// but the allocator itself and are safe to reclaim.
    pub fn is_reclaimable(&self) -> bool {
        self.is_detached() && self.scanner_count() == 0
    }
}
