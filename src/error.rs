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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemStoreError>;

/// Errors the core itself can raise. Everything else (allocation failure that
/// doesn't fit a slab, comparator misuse, memory exhaustion) is a programming
/// error and is not represented here; it aborts the process per spec.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum MemStoreError {
    #[error("clear_snapshot called with id {actual} but the outstanding snapshot id is {expected}")]
    SnapshotIdMismatch { expected: i64, actual: i64 },

    #[error("invalid memstore state: {0}")]
    InvalidState(String),
}
