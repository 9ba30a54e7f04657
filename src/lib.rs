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

//! Custom Assets - resource manager for user-authored renderer assets
//!
//! Loads materials, shaders, textures, meshes and render targets on worker
//! threads under a RAM budget, tracks dependencies between them and compiles
//! shader pipelines asynchronously.

pub mod assets;
pub mod config;
pub mod error;
pub mod gpu;
pub mod prelude;
pub mod profiling;
pub mod resources;
pub mod shader_cache;
pub mod texture_cache;

pub use assets::{AssetId, AssetType, CustomAsset, CustomAssetLibrary, SessionId};
pub use config::ResourceManagerConfig;
pub use error::{AssetError, Result};
pub use resources::{CustomResourceManager, LoadType, ResourceStats};
pub use shader_cache::CustomShaderCache;
pub use texture_cache::CustomTextureCache;
