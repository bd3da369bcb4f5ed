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

use serde::{Deserialize, Serialize};

/// Configuration the enclosing column-family store threads into a [`crate::MemStore`].
///
/// This mirrors the small `Serialize`/`Deserialize` option structs the teacher
/// crate passes around (`ReadOptions`, `WriteOptions`) rather than reaching
/// for a global/static configuration object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemStoreConfig {
    /// Enable the slab allocator for non-`upsert` writes.
    pub use_slab_allocator: bool,
    /// Size in bytes of each slab chunk.
    pub slab_chunk_size: usize,
    /// Cells whose value exceeds this size bypass the slab allocator and keep
    /// their own heap buffer.
    pub slab_max_alloc_size: usize,
}

impl Default for MemStoreConfig {
    fn default() -> Self {
        Self {
            use_slab_allocator: true,
            slab_chunk_size: 2 * 1024 * 1024,
            slab_max_alloc_size: 256 * 1024,
        }
    }
}
