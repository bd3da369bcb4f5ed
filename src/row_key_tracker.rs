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

//! Collaborator contract for `getRowKeyAtOrBefore`, the legacy row-addressing
//! helper described in spec.md §4.3. The core does not know what "the target
//! table" or "a better candidate" mean on its own — those questions belong to
//! the admin/region collaborator driving the search — so this trait is the
//! seam between the two, the same way the enclosing store owns lock
//! discipline and the MVCC read-point allocator elsewhere in this crate.

use bytes::Bytes;

pub trait RowKeyTracker {
    /// The row to start the forward probe from.
    fn target_row(&self) -> &[u8];

    /// True if `row` is still within the table/range this search is scoped to.
    fn in_range(&self, row: &[u8]) -> bool;

    /// True if `row` would be a strictly better candidate than whatever this
    /// tracker currently holds (closer to, or equal to, the target row while
    /// still being at-or-before it).
    fn is_better_candidate(&self, row: &[u8]) -> bool;

    /// Records `row` as the new best candidate.
    fn update(&mut self, row: Bytes);
}
