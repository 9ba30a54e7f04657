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

//! Resource manager configuration

use crate::error::{AssetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::System;

const GIB: u64 = 1024 * 1024 * 1024;

/// Memory kept free for the rest of the system on machines with 4 GiB or more
pub const RESERVED_SYSTEM_MEMORY: u64 = 2 * GIB;

/// Tunables for [`CustomResourceManager`](crate::resources::CustomResourceManager)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagerConfig {
    /// Worker threads performing blocking asset loads
    pub loader_threads: usize,
    /// Worker threads compiling shaders and pipelines.
    /// Zero compiles inline while retrieving at the end of a frame.
    pub shader_compiler_threads: usize,
    /// Fixed RAM budget in bytes, overrides the physical memory heuristic
    pub max_ram_override: Option<u64>,
    /// Fraction of the budget eviction shrinks usage down to
    pub eviction_target: f32,
    /// Re-queue loaded assets whose library copy changed since they were loaded
    pub check_stale_assets: bool,
    /// Frames a released GPU texture may wait in the pool before it is freed
    pub texture_pool_idle_frames: u64,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            loader_threads: 2,
            shader_compiler_threads: 1,
            max_ram_override: None,
            eviction_target: 0.8,
            check_stale_assets: false,
            texture_pool_idle_frames: 120,
        }
    }
}

impl ResourceManagerConfig {
    /// Parse a config from JSON, missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.eviction_target > 0.0 && self.eviction_target <= 1.0) {
            return Err(AssetError::ConfigError(format!(
                "eviction_target must be in (0, 1], got {}",
                self.eviction_target
            )));
        }
        Ok(())
    }

    /// RAM budget the manager evicts against
    pub fn max_ram_available(&self) -> u64 {
        match self.max_ram_override {
            Some(bytes) => bytes,
            None => {
                let mut system = System::new();
                system.refresh_memory();
                max_ram_for_physical_memory(system.total_memory())
            }
        }
    }
}

/// Half of physical memory on small machines, everything but 2 GiB otherwise
pub fn max_ram_for_physical_memory(physical: u64) -> u64 {
    if physical / 2 < RESERVED_SYSTEM_MEMORY {
        physical / 2
    } else {
        physical - RESERVED_SYSTEM_MEMORY
    }
}

/// Features of the host GPU backend that affect how pipelines are built
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCapabilities {
    pub early_z: bool,
    pub logic_op: bool,
    pub dual_source_blend: bool,
    /// Wide lines and large points without a geometry shader expansion pass
    pub native_wide_primitives: bool,
    pub geometry_shaders: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            early_z: true,
            logic_op: true,
            dual_source_blend: true,
            native_wide_primitives: false,
            geometry_shaders: true,
        }
    }
}
