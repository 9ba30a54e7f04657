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

pub mod asset_data;
pub mod manager;
pub mod material;
pub mod mesh;
pub mod resource;
pub mod texture;

pub use asset_data::{AssetData, AssetReloadHandle, LoadType};
pub use manager::CustomResourceManager;
pub use material::{MaterialResource, MaterialTexture};
pub use mesh::{MeshChunkResource, MeshResource};
pub use resource::ResourceStats;
pub use texture::{RenderTargetResource, TextureTimePair};
