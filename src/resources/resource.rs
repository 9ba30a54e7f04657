// Copyright 2024 Saptak Santra
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

use crate::shader_cache::ShaderCacheStats;
use crate::texture_cache::TextureCacheStats;

/// Snapshot of the resource manager
#[derive(Clone, Debug, Default)]
pub struct ResourceStats {
    pub ram_used: u64,
    pub max_ram_available: u64,
    /// Sessions minted since start or the last reset
    pub total_sessions: usize,
    pub loaded_assets: usize,
    pub pending_assets: usize,
    /// Loads applied at frame boundaries
    pub loads_applied: u64,
    pub evictions: u64,
    pub reloads: u64,
    /// Accessor calls that returned a resource
    pub cache_hits: u64,
    /// Accessor calls that returned nothing yet
    pub cache_misses: u64,
    pub shaders: ShaderCacheStats,
    pub textures: TextureCacheStats,
}

impl ResourceStats {
    pub fn cache_hit_ratio(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }

    /// Fraction of the RAM budget in use
    pub fn ram_utilization(&self) -> f32 {
        if self.max_ram_available == 0 {
            0.0
        } else {
            self.ram_used as f32 / self.max_ram_available as f32
        }
    }
}
