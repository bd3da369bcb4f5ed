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

//! An in-memory write buffer for a column-family LSM storage engine.
//!
//! A [`MemStore`] holds the cells written to one column family since its
//! last flush: a lock-free, MVCC-ordered [`CellSet`] for the still-mutable
//! `live` generation, an identical structure for a `snapshot` generation
//! frozen aside for an in-progress flush, and the size/time-range
//! bookkeeping a region needs to decide when to flush and which stores a
//! scan can skip. [`MemStoreScanner`] merges `live` and `snapshot` under a
//! single MVCC read point; [`SlabAllocator`] gives large cell values a
//! chunked arena home instead of one heap allocation each.

pub mod allocator;
pub mod cell;
pub mod cell_set;
pub mod clock;
pub mod config;
pub mod error;
pub mod memstore;
pub mod row_key_tracker;
pub mod scanner;
pub mod size;
pub mod time_range;

pub use allocator::{SlabAllocator, Slice};
pub use cell::{Cell, CellBytes, CellType, LATEST_TIMESTAMP};
pub use cell_set::{CellEntry, CellSet};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::MemStoreConfig;
pub use error::{MemStoreError, Result};
pub use memstore::{MemStore, MemStoreSnapshot};
pub use row_key_tracker::RowKeyTracker;
pub use scanner::{KeyValueScanner, MemStoreScanner};
pub use size::HeapSize;
pub use time_range::{TimeRangeQuery, TimeRangeTracker};
