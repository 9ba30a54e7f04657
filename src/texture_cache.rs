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

//! GPU textures of custom assets, pooled by configuration.
//!
//! Released textures keep their allocation and are handed to the next asset
//! asking for the same [`TextureConfig`]. A pooled texture is only reused once
//! nothing else holds a reference to it. Pooled textures not picked up within
//! the idle frame limit are freed, and each configuration keeps at most
//! [`MAX_POOLED_PER_CONFIG`] of them.

use crate::assets::{AssetId, TextureData};
use crate::gpu::{AbstractTexture, GpuBackend, TextureConfig};
use ahash::AHashMap;
use std::sync::Arc;

pub const MAX_POOLED_PER_CONFIG: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureCacheStats {
    pub allocations: u64,
    pub reuses: u64,
    pub allocation_failures: u64,
    /// Pooled textures freed for idling or overflowing their configuration
    pub pool_drops: u64,
}

struct PooledTexture {
    texture: Arc<dyn AbstractTexture>,
    released_frame: u64,
}

pub struct CustomTextureCache {
    backend: Arc<dyn GpuBackend>,
    by_id: AHashMap<AssetId, Arc<dyn AbstractTexture>>,
    pool: AHashMap<TextureConfig, Vec<PooledTexture>>,
    frame: u64,
    max_idle_frames: u64,
    stats: TextureCacheStats,
}

impl CustomTextureCache {
    pub fn new(backend: Arc<dyn GpuBackend>, max_idle_frames: u64) -> Self {
        Self {
            backend,
            by_id: AHashMap::new(),
            pool: AHashMap::new(),
            frame: 0,
            max_idle_frames,
            stats: TextureCacheStats::default(),
        }
    }

    /// Texture holding `data`, created and uploaded on first request
    pub fn get_texture_from_data(
        &mut self,
        asset_id: &AssetId,
        data: &TextureData,
    ) -> Option<Arc<dyn AbstractTexture>> {
        if let Some(texture) = self.by_id.get(asset_id) {
            return Some(texture.clone());
        }

        let texture = self.allocate(asset_id, &data.texture_config())?;
        for (layer, slice) in data.slices.iter().enumerate() {
            for (level, mip) in slice.levels.iter().enumerate() {
                texture.upload(level as u32, layer as u32, mip.width, mip.height, &mip.data);
            }
        }
        self.by_id.insert(asset_id.clone(), texture.clone());
        Some(texture)
    }

    /// Texture with `config` and undefined contents, for render targets
    pub fn get_texture_from_config(
        &mut self,
        asset_id: &AssetId,
        config: &TextureConfig,
    ) -> Option<Arc<dyn AbstractTexture>> {
        if let Some(texture) = self.by_id.get(asset_id) {
            return Some(texture.clone());
        }

        let texture = self.allocate(asset_id, config)?;
        self.by_id.insert(asset_id.clone(), texture.clone());
        Some(texture)
    }

    /// Move the texture of `asset_id` into the pool
    pub fn release_to_pool(&mut self, asset_id: &AssetId) {
        let Some(texture) = self.by_id.remove(asset_id) else {
            return;
        };
        let config = *texture.config();
        let pooled = self.pool.entry(config).or_default();
        if pooled.len() >= MAX_POOLED_PER_CONFIG {
            // Oldest release goes first.
            pooled.remove(0);
            self.stats.pool_drops += 1;
        }
        pooled.push(PooledTexture {
            texture,
            released_frame: self.frame,
        });
    }

    /// Advance the frame counter and free pooled textures idle for too long
    pub fn on_frame_end(&mut self) {
        self.frame += 1;
        let oldest_kept = self.frame.saturating_sub(self.max_idle_frames);
        let mut dropped = 0;
        self.pool.retain(|_, pooled| {
            let before = pooled.len();
            pooled.retain(|entry| entry.released_frame >= oldest_kept);
            dropped += before - pooled.len();
            !pooled.is_empty()
        });
        if dropped > 0 {
            self.stats.pool_drops += dropped as u64;
            tracing::trace!(dropped, "freed idle pooled custom textures");
        }
    }

    pub fn contains(&self, asset_id: &AssetId) -> bool {
        self.by_id.contains_key(asset_id)
    }

    /// Textures waiting in the pool
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> TextureCacheStats {
        self.stats
    }

    /// Forget every texture, pooled ones included
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.pool.clear();
    }

    fn allocate(
        &mut self,
        asset_id: &AssetId,
        config: &TextureConfig,
    ) -> Option<Arc<dyn AbstractTexture>> {
        if let Some(pooled) = self.pool.get_mut(config) {
            if let Some(index) = pooled
                .iter()
                .position(|entry| Arc::strong_count(&entry.texture) == 1)
            {
                self.stats.reuses += 1;
                return Some(pooled.remove(index).texture);
            }
        }

        match self.backend.create_texture(config, asset_id.as_str()) {
            Some(texture) => {
                self.stats.allocations += 1;
                Some(texture)
            }
            None => {
                tracing::warn!(asset = %asset_id, ?config, "failed to create custom texture");
                self.stats.allocation_failures += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{NullBackend, TextureFormat};

    #[test]
    fn test_memoized_by_asset_id() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 8);
        let data = TextureData::single_level(2, 2, vec![0; 16]);

        let a = cache.get_texture_from_data(&"a".into(), &data).unwrap();
        let b = cache.get_texture_from_data(&"a".into(), &data).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(backend.stats().textures, 1);
    }

    #[test]
    fn test_released_texture_is_reused_for_same_config() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 8);
        let config = TextureConfig::render_target(64, 64, TextureFormat::Rgba8);

        let first = cache.get_texture_from_config(&"rt1".into(), &config).unwrap();
        let first_ptr = Arc::as_ptr(&first);
        drop(first);
        cache.release_to_pool(&"rt1".into());
        assert_eq!(cache.pooled_count(), 1);

        let second = cache.get_texture_from_config(&"rt2".into(), &config).unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&second), first_ptr));
        assert_eq!(backend.stats().textures, 1);
        assert_eq!(cache.stats().reuses, 1);
        assert_eq!(cache.pooled_count(), 0);
    }

    #[test]
    fn test_pooled_texture_still_in_use_is_not_reused() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 8);
        let config = TextureConfig::render_target(8, 8, TextureFormat::Rgba8);

        let held = cache.get_texture_from_config(&"rt1".into(), &config).unwrap();
        cache.release_to_pool(&"rt1".into());
        let other = cache.get_texture_from_config(&"rt2".into(), &config).unwrap();
        assert!(!Arc::ptr_eq(&held, &other));
        assert_eq!(backend.stats().textures, 2);
    }

    #[test]
    fn test_different_config_allocates() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 8);
        let small = TextureConfig::render_target(8, 8, TextureFormat::Rgba8);
        let large = TextureConfig::render_target(16, 16, TextureFormat::Rgba8);

        cache.get_texture_from_config(&"a".into(), &small);
        cache.release_to_pool(&"a".into());
        cache.get_texture_from_config(&"b".into(), &large);
        assert_eq!(backend.stats().textures, 2);
        assert_eq!(cache.pooled_count(), 1);
    }

    #[test]
    fn test_pool_stays_bounded_per_config() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 8);
        let config = TextureConfig::render_target(8, 8, TextureFormat::Rgba8);

        // Hold every texture so none can be reused from the pool.
        let mut held = Vec::new();
        for i in 0..20 {
            let id = AssetId::from(format!("rt{i}"));
            held.push(cache.get_texture_from_config(&id, &config).unwrap());
            cache.release_to_pool(&id);
            assert!(cache.pooled_count() <= MAX_POOLED_PER_CONFIG);
        }
        assert_eq!(cache.pooled_count(), MAX_POOLED_PER_CONFIG);
        assert_eq!(cache.stats().pool_drops, 20 - MAX_POOLED_PER_CONFIG as u64);
    }

    #[test]
    fn test_idle_pooled_textures_are_freed() {
        let backend = Arc::new(NullBackend::new());
        let mut cache = CustomTextureCache::new(backend.clone(), 3);

        for i in 0..6u32 {
            let id = AssetId::from(format!("rt{i}"));
            let config = TextureConfig::render_target(8 + i, 8, TextureFormat::Rgba8);
            cache.get_texture_from_config(&id, &config);
            cache.release_to_pool(&id);
        }
        assert_eq!(cache.pooled_count(), 6);

        for _ in 0..3 {
            cache.on_frame_end();
        }
        assert_eq!(cache.pooled_count(), 6);
        cache.on_frame_end();
        assert_eq!(cache.pooled_count(), 0);
        assert_eq!(cache.stats().pool_drops, 6);
    }
}
