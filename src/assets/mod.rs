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

// Custom asset module
//
// Provides the loadable asset layer:
// - Asset identity (AssetId / SessionId)
// - Worker-thread loading
// - Session-indexed LRU caching
// - Decoded payload types and the library interface

pub mod cache;
pub mod data;
pub mod library;
pub mod loader;
pub mod property;

pub use cache::LeastRecentlyUsedCache;
pub use data::*;
pub use library::{CustomAssetLibrary, InMemoryAssetLibrary};
pub use loader::AssetLoader;
pub use property::{PropertyValue, SHADER_PROPERTY_SLOT_SIZE};

use crate::error::{AssetError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Stable identifier of a logical custom asset
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Dense per-manager handle, minted once per AssetId and never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closed set of asset kinds the manager tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Material,
    RasterMaterial,
    Shader,
    RasterShader,
    Texture,
    Mesh,
    RenderTarget,
}

/// Result of a successful library load
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadInfo {
    /// Zero means nothing was loaded
    pub bytes_loaded: u64,
    /// Write time of the source the payload came from
    pub metadata_time: SystemTime,
}

/// Decoded payload of one asset kind
pub trait AssetPayload: Send + Sync + Sized + 'static {
    const ASSET_TYPE: AssetType;

    /// Blocking fetch of the decoded payload from a library
    fn load_from_library(
        library: &dyn CustomAssetLibrary,
        asset_id: &AssetId,
    ) -> Result<(Self, LoadInfo)>;

    /// Approximate memory size in bytes
    fn memory_size(&self) -> u64;

    /// Schema-level checks run once the payload is loaded
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Type-erased loadable asset, shared between the manager and loader workers
pub trait CustomAsset: Send + Sync + 'static {
    /// Blocking load, safe to call again after a failure
    fn load(&self) -> bool;

    /// Drop the payload
    fn unload(&self);

    fn asset_id(&self) -> &AssetId;

    fn session_id(&self) -> SessionId;

    fn asset_type(&self) -> AssetType;

    fn has_data(&self) -> bool;

    fn byte_size_in_memory(&self) -> u64;

    /// Metadata time of the last successful load
    fn last_loaded_time(&self) -> Option<SystemTime>;

    /// True when the library holds a newer copy than the one loaded
    fn is_stale(&self) -> bool;

    /// Why the loaded payload is invalid, if it is
    fn validation_error(&self) -> Option<AssetError>;

    /// Fresh unloaded copy with the same ids and library
    fn rebuild(&self) -> Arc<dyn CustomAsset>;

    fn as_any(&self) -> &dyn Any;
}

struct LoadedPayload<D> {
    data: Option<Arc<D>>,
    bytes_loaded: u64,
    metadata_time: Option<SystemTime>,
}

/// Library-backed asset holding a lazily loaded payload
pub struct LoadableAsset<D: AssetPayload> {
    asset_id: AssetId,
    session_id: SessionId,
    library: Arc<dyn CustomAssetLibrary>,
    payload: RwLock<LoadedPayload<D>>,
}

impl<D: AssetPayload> LoadableAsset<D> {
    pub fn new(
        library: Arc<dyn CustomAssetLibrary>,
        asset_id: AssetId,
        session_id: SessionId,
    ) -> Self {
        Self {
            asset_id,
            session_id,
            library,
            payload: RwLock::new(LoadedPayload {
                data: None,
                bytes_loaded: 0,
                metadata_time: None,
            }),
        }
    }

    /// Loaded payload, if any
    pub fn data(&self) -> Option<Arc<D>> {
        self.payload.read().data.clone()
    }

    pub fn library(&self) -> &Arc<dyn CustomAssetLibrary> {
        &self.library
    }
}

impl<D: AssetPayload> CustomAsset for LoadableAsset<D> {
    fn load(&self) -> bool {
        match D::load_from_library(self.library.as_ref(), &self.asset_id) {
            Ok((data, info)) if info.bytes_loaded > 0 => {
                let mut payload = self.payload.write();
                payload.data = Some(Arc::new(data));
                payload.bytes_loaded = info.bytes_loaded;
                payload.metadata_time = Some(info.metadata_time);
                true
            }
            Ok(_) => {
                tracing::debug!(asset = %self.asset_id, "library returned an empty payload");
                false
            }
            Err(err) => {
                tracing::warn!(asset = %self.asset_id, "failed to load {:?}: {err}", D::ASSET_TYPE);
                false
            }
        }
    }

    fn unload(&self) {
        let mut payload = self.payload.write();
        payload.data = None;
        payload.bytes_loaded = 0;
    }

    fn asset_id(&self) -> &AssetId {
        &self.asset_id
    }

    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn asset_type(&self) -> AssetType {
        D::ASSET_TYPE
    }

    fn has_data(&self) -> bool {
        self.payload.read().data.is_some()
    }

    fn byte_size_in_memory(&self) -> u64 {
        self.payload.read().bytes_loaded
    }

    fn last_loaded_time(&self) -> Option<SystemTime> {
        self.payload.read().metadata_time
    }

    fn is_stale(&self) -> bool {
        let Some(loaded) = self.last_loaded_time() else {
            return false;
        };
        self.library
            .last_asset_write_time(&self.asset_id)
            .is_some_and(|written| written > loaded)
    }

    fn validation_error(&self) -> Option<AssetError> {
        self.data()
            .and_then(|data| data.validate().err())
            .map(AssetError::InvalidAssetData)
    }

    fn rebuild(&self) -> Arc<dyn CustomAsset> {
        Arc::new(LoadableAsset::<D>::new(
            self.library.clone(),
            self.asset_id.clone(),
            self.session_id,
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<D: AssetPayload> fmt::Debug for LoadableAsset<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableAsset")
            .field("asset_id", &self.asset_id)
            .field("session_id", &self.session_id)
            .field("asset_type", &D::ASSET_TYPE)
            .field("loaded", &self.has_data())
            .finish()
    }
}
