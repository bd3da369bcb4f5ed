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

//! Tracks the `[min, max]` timestamp span of a cell set's contents.

use std::sync::atomic::{AtomicI64, Ordering};

/// A half-open-ish query range `[min, max]`, as passed by a scan request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRangeQuery {
    pub min: i64,
    pub max: i64,
}

impl TimeRangeQuery {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }
}

/// Concurrency-friendly `[min, max]` tracker, expanded on every insert via
/// `fetch_min`/`fetch_max`. Never shrinks — cell removal does not narrow it,
/// matching spec.md's invariant that it covers every timestamp ever inserted
/// into the set it is attached to.
#[derive(Debug)]
pub struct TimeRangeTracker {
    min: AtomicI64,
    max: AtomicI64,
}

impl Default for TimeRangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeRangeTracker {
    pub fn new() -> Self {
        Self {
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(i64::MIN),
        }
    }

    pub fn update(&self, timestamp: i64) {
        self.min.fetch_min(timestamp, Ordering::AcqRel);
        self.max.fetch_max(timestamp, Ordering::AcqRel);
    }

    pub fn min(&self) -> i64 {
        self.min.load(Ordering::Acquire)
    }

    pub fn max(&self) -> i64 {
        self.max.load(Ordering::Acquire)
    }

    /// An empty tracker reports `min > max`, which never overlaps any query.
    pub fn is_empty(&self) -> bool {
        self.min() > self.max()
    }

    pub fn overlaps(&self, query: &TimeRangeQuery) -> bool {
        !self.is_empty() && self.min() <= query.max && query.min <= self.max()
    }
}
