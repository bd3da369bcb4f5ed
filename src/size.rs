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

//! Heap-size accounting shared by [`crate::cell::Cell`] and the allocator.
//!
//! Stands in for the workspace's `estimate_size` crate, whose source was not
//! part of the retrieval pack; the trait and constants below play the same
//! role without inventing a dependency on a crate this repo never actually saw.

/// Something whose resident heap footprint can be estimated for the
/// `heapSize` accumulator.
pub trait HeapSize {
    fn heap_size(&self) -> usize;
}

/// Per-entry bookkeeping overhead: the skip-list node (forward pointers,
/// atomic markers) plus the fixed fields of a [`crate::cell::Cell`] excluding
/// its variable-length byte buffers, which [`HeapSize::heap_size`] accounts
/// for separately.
pub const FIXED_OVERHEAD: usize = 64;

/// Footprint of an empty `MemStore`: the live `CellSet`, its allocator shell,
/// and the time-range tracker, all with nothing stored in them yet.
pub const DEEP_OVERHEAD: usize = 256;
