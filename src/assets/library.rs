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

//! Asset library interface and an in-memory implementation

use super::data::*;
use super::{AssetId, AssetPayload, AssetType, LoadInfo};
use crate::error::{AssetError, Result};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

/// Source of decoded custom assets.
///
/// Called from loader worker threads, every method may block.
pub trait CustomAssetLibrary: Send + Sync {
    fn load_material(&self, asset_id: &AssetId) -> Result<(MaterialData, LoadInfo)>;

    fn load_raster_material(&self, asset_id: &AssetId) -> Result<(RasterMaterialData, LoadInfo)>;

    fn load_shader(&self, asset_id: &AssetId) -> Result<(ShaderData, LoadInfo)>;

    fn load_raster_shader(&self, asset_id: &AssetId) -> Result<(RasterShaderData, LoadInfo)>;

    fn load_texture(&self, asset_id: &AssetId) -> Result<(TextureData, LoadInfo)>;

    fn load_mesh(&self, asset_id: &AssetId) -> Result<(MeshData, LoadInfo)>;

    fn load_render_target(&self, asset_id: &AssetId) -> Result<(RenderTargetData, LoadInfo)>;

    /// Write time of the stored asset, None if unknown
    fn last_asset_write_time(&self, asset_id: &AssetId) -> Option<SystemTime>;
}

/// Payload stored in an [`InMemoryAssetLibrary`]
#[derive(Clone, Debug)]
pub enum StoredPayload {
    Material(MaterialData),
    RasterMaterial(RasterMaterialData),
    Shader(ShaderData),
    RasterShader(RasterShaderData),
    Texture(TextureData),
    Mesh(MeshData),
    RenderTarget(RenderTargetData),
}

impl StoredPayload {
    pub fn asset_type(&self) -> AssetType {
        match self {
            StoredPayload::Material(_) => AssetType::Material,
            StoredPayload::RasterMaterial(_) => AssetType::RasterMaterial,
            StoredPayload::Shader(_) => AssetType::Shader,
            StoredPayload::RasterShader(_) => AssetType::RasterShader,
            StoredPayload::Texture(_) => AssetType::Texture,
            StoredPayload::Mesh(_) => AssetType::Mesh,
            StoredPayload::RenderTarget(_) => AssetType::RenderTarget,
        }
    }
}

macro_rules! stored_payload_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoredPayload {
                fn from(data: $ty) -> Self {
                    StoredPayload::$variant(data)
                }
            }
        )*
    };
}

stored_payload_from! {
    Material => MaterialData,
    RasterMaterial => RasterMaterialData,
    Shader => ShaderData,
    RasterShader => RasterShaderData,
    Texture => TextureData,
    Mesh => MeshData,
    RenderTarget => RenderTargetData,
}

struct StoredAsset {
    payload: StoredPayload,
    write_time: SystemTime,
}

/// Thread-safe library keeping payloads in memory.
///
/// Counts loads per asset and can be told to fail specific ids, which makes it
/// the library of choice for tests and tools.
#[derive(Default)]
pub struct InMemoryAssetLibrary {
    assets: RwLock<AHashMap<AssetId, StoredAsset>>,
    load_counts: Mutex<AHashMap<AssetId, usize>>,
    failing: RwLock<AHashSet<AssetId>>,
}

impl InMemoryAssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an asset, bumping its write time
    pub fn insert(&self, asset_id: impl Into<AssetId>, payload: impl Into<StoredPayload>) {
        let asset_id = asset_id.into();
        let mut assets = self.assets.write();
        let write_time = next_write_time(assets.get(&asset_id).map(|a| a.write_time));
        assets.insert(
            asset_id,
            StoredAsset {
                payload: payload.into(),
                write_time,
            },
        );
    }

    pub fn remove(&self, asset_id: &AssetId) -> bool {
        self.assets.write().remove(asset_id).is_some()
    }

    /// Mark an asset as modified without changing it
    pub fn touch(&self, asset_id: &AssetId) {
        if let Some(asset) = self.assets.write().get_mut(asset_id) {
            asset.write_time = next_write_time(Some(asset.write_time));
        }
    }

    /// Make every load of `asset_id` fail until cleared
    pub fn set_failing(&self, asset_id: impl Into<AssetId>, failing: bool) {
        let asset_id = asset_id.into();
        let mut set = self.failing.write();
        if failing {
            set.insert(asset_id);
        } else {
            set.remove(&asset_id);
        }
    }

    /// Load attempts made for `asset_id`, failed ones included
    pub fn load_count(&self, asset_id: &AssetId) -> usize {
        self.load_counts.lock().get(asset_id).copied().unwrap_or(0)
    }

    pub fn total_load_count(&self) -> usize {
        self.load_counts.lock().values().sum()
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }

    fn load<D: AssetPayload + Clone>(
        &self,
        asset_id: &AssetId,
        extract: impl FnOnce(&StoredPayload) -> Option<&D>,
    ) -> Result<(D, LoadInfo)> {
        *self.load_counts.lock().entry(asset_id.clone()).or_insert(0) += 1;

        if self.failing.read().contains(asset_id) {
            return Err(AssetError::AssetLoadError(format!(
                "library refused to load '{asset_id}'"
            )));
        }

        let assets = self.assets.read();
        let stored = assets
            .get(asset_id)
            .ok_or_else(|| AssetError::AssetNotFound(asset_id.clone()))?;
        let data = extract(&stored.payload).ok_or_else(|| AssetError::AssetTypeMismatch {
            asset_id: asset_id.clone(),
            expected: D::ASSET_TYPE,
            found: stored.payload.asset_type(),
        })?;

        let info = LoadInfo {
            bytes_loaded: data.memory_size(),
            metadata_time: stored.write_time,
        };
        Ok((data.clone(), info))
    }
}

/// Write times strictly increase per asset, even within one clock tick
fn next_write_time(previous: Option<SystemTime>) -> SystemTime {
    let now = SystemTime::now();
    match previous {
        Some(previous) if now <= previous => previous + Duration::from_nanos(1),
        _ => now,
    }
}

impl CustomAssetLibrary for InMemoryAssetLibrary {
    fn load_material(&self, asset_id: &AssetId) -> Result<(MaterialData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::Material(d) => Some(d),
            _ => None,
        })
    }

    fn load_raster_material(&self, asset_id: &AssetId) -> Result<(RasterMaterialData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::RasterMaterial(d) => Some(d),
            _ => None,
        })
    }

    fn load_shader(&self, asset_id: &AssetId) -> Result<(ShaderData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::Shader(d) => Some(d),
            _ => None,
        })
    }

    fn load_raster_shader(&self, asset_id: &AssetId) -> Result<(RasterShaderData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::RasterShader(d) => Some(d),
            _ => None,
        })
    }

    fn load_texture(&self, asset_id: &AssetId) -> Result<(TextureData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::Texture(d) => Some(d),
            _ => None,
        })
    }

    fn load_mesh(&self, asset_id: &AssetId) -> Result<(MeshData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::Mesh(d) => Some(d),
            _ => None,
        })
    }

    fn load_render_target(&self, asset_id: &AssetId) -> Result<(RenderTargetData, LoadInfo)> {
        self.load(asset_id, |p| match p {
            StoredPayload::RenderTarget(d) => Some(d),
            _ => None,
        })
    }

    fn last_asset_write_time(&self, asset_id: &AssetId) -> Option<SystemTime> {
        self.assets.read().get(asset_id).map(|a| a.write_time)
    }
}
