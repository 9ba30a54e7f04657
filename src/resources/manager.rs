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

//! Custom resource manager
//!
//! Owns every custom asset session, drives the loader once per frame
//! boundary and turns loaded payloads into renderer resources.

use crate::assets::{
    AssetId, AssetLoader, AssetPayload, AssetType, CustomAsset, CustomAssetLibrary,
    LeastRecentlyUsedCache, LoadableAsset, MaterialPayload, MeshData, RasterMaterialData,
    RenderTargetData, SessionId, ShaderPayload, TextureData, TextureSource,
};
use crate::config::ResourceManagerConfig;
use crate::error::Result;
use crate::gpu::{
    AbstractPipeline, AbstractShader, GpuBackend, NativeVertexFormat, PipelineUid,
    VertexDeclaration,
};
use crate::resources::asset_data::{AssetData, AssetReloadHandle, LoadType};
use crate::resources::material::{
    build_shader_parts, InternalMaterialResource, MaterialResource, MaterialTexture,
};
use crate::resources::mesh::{MeshChunkResource, MeshResource};
use crate::resources::resource::ResourceStats;
use crate::resources::texture::{InternalTextureResource, RenderTargetResource, TextureTimePair};
use crate::shader_cache::{CompileStatus, CustomShaderCache};
use crate::texture_cache::CustomTextureCache;
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::sync::Arc;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// What happened to an asset whose owners are being notified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
    /// Fresh payload became resident
    Loaded,
    /// Payload was dropped or queued for reload, inherited errors are stale
    Invalidated,
}

/// Central manager of custom assets.
///
/// Accessors return `None` until everything a resource needs is loaded and
/// compiled, arming the missing loads on the way. Calling them again on a
/// later frame eventually yields the resource.
pub struct CustomResourceManager {
    config: ResourceManagerConfig,
    backend: Arc<dyn GpuBackend>,

    // Indexed by session id
    asset_records: Vec<AssetData>,
    session_by_asset: AHashMap<AssetId, SessionId>,

    loaded_assets: LeastRecentlyUsedCache<Arc<dyn CustomAsset>>,
    pending_assets: LeastRecentlyUsedCache<Arc<dyn CustomAsset>>,
    reload_handle: AssetReloadHandle,
    loader: AssetLoader,

    ram_used: u64,
    max_ram_available: u64,

    materials: AHashMap<SessionId, InternalMaterialResource>,
    textures: AHashMap<SessionId, InternalTextureResource>,
    render_targets: AHashMap<SessionId, Arc<RenderTargetResource>>,
    meshes: AHashMap<SessionId, Arc<MeshResource>>,
    vertex_formats: AHashMap<VertexDeclaration, Arc<dyn NativeVertexFormat>>,

    shader_cache: CustomShaderCache,
    texture_cache: CustomTextureCache,

    // GPU objects of invalidated shaders, dropped once the frame is over
    retired_pipelines: Vec<Arc<dyn AbstractPipeline>>,
    retired_shaders: Vec<Arc<dyn AbstractShader>>,

    stats: ResourceStats,
}

impl CustomResourceManager {
    pub fn new(config: ResourceManagerConfig, backend: Arc<dyn GpuBackend>) -> Result<Self> {
        config.validate()?;

        let max_ram_available = config.max_ram_available();
        let mut loader = AssetLoader::new();
        loader.initialize(config.loader_threads)?;
        let shader_cache = CustomShaderCache::new(backend.clone(), config.shader_compiler_threads)?;
        let texture_cache =
            CustomTextureCache::new(backend.clone(), config.texture_pool_idle_frames);

        tracing::info!(
            backend = backend.name(),
            max_ram_available,
            loader_threads = config.loader_threads,
            "custom resource manager initialized"
        );

        Ok(Self {
            config,
            backend,
            asset_records: Vec::new(),
            session_by_asset: AHashMap::new(),
            loaded_assets: LeastRecentlyUsedCache::new(),
            pending_assets: LeastRecentlyUsedCache::new(),
            reload_handle: AssetReloadHandle::default(),
            loader,
            ram_used: 0,
            max_ram_available,
            materials: AHashMap::new(),
            textures: AHashMap::new(),
            render_targets: AHashMap::new(),
            meshes: AHashMap::new(),
            vertex_formats: AHashMap::new(),
            shader_cache,
            texture_cache,
            retired_pipelines: Vec::new(),
            retired_shaders: Vec::new(),
            stats: ResourceStats::default(),
        })
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    pub fn ram_used(&self) -> u64 {
        self.ram_used
    }

    pub fn max_ram_available(&self) -> u64 {
        self.max_ram_available
    }

    /// Handle other threads can use to request reloads
    pub fn reload_handle(&self) -> AssetReloadHandle {
        self.reload_handle.clone()
    }

    /// Queue `asset_id` for reload at the next frame boundary
    pub fn reload_asset(&self, asset_id: impl Into<AssetId>) {
        self.reload_handle.reload_asset(asset_id);
    }

    pub fn session_id(&self, asset_id: &AssetId) -> Option<SessionId> {
        self.session_by_asset.get(asset_id).copied()
    }

    pub fn asset_load_state(&self, asset_id: &AssetId) -> Option<LoadType> {
        self.record(asset_id).map(|r| r.load_type)
    }

    /// True when the asset or one of its dependencies failed validation
    pub fn asset_has_errors(&self, asset_id: &AssetId) -> bool {
        self.record(asset_id).is_some_and(|r| r.has_errors)
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            ram_used: self.ram_used,
            max_ram_available: self.max_ram_available,
            total_sessions: self.asset_records.len(),
            loaded_assets: self.loaded_assets.len(),
            pending_assets: self.pending_assets.len(),
            shaders: self.shader_cache.stats(),
            textures: self.texture_cache.stats(),
            ..self.stats.clone()
        }
    }

    // ------------------------------------------------------------------
    // Frame hooks
    // ------------------------------------------------------------------

    /// Frame boundary: apply reload requests, evict, hand pending loads to
    /// the workers and apply whatever they finished.
    pub fn on_xfb_triggered(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("custom_assets_xfb").entered();

        for asset_id in self.reload_handle.take_requests() {
            match self.session_by_asset.get(&asset_id) {
                Some(&session) => self.reload_session(session),
                None => tracing::trace!(asset = %asset_id, "reload requested for unknown asset"),
            }
        }

        if self.config.check_stale_assets {
            self.reload_stale_assets();
        }

        if self.ram_used > self.max_ram_available {
            self.evict_over_budget();
        }

        let completed = self.loader.load_assets(
            self.pending_assets.elements().map(|(_, asset)| asset),
            self.ram_used,
            self.max_ram_available,
        );

        let mut loaded = Vec::with_capacity(completed.len());
        for session in completed {
            if self.apply_completed_load(session) {
                loaded.push(session);
            }
        }
        for session in loaded {
            self.propagate_dependency_change(session, ChangeKind::Loaded);
        }
    }

    /// End of frame: collect compiled shaders and drop retired GPU objects
    pub fn on_frame_end(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("custom_assets_frame_end").entered();

        self.shader_cache.retrieve_async_shaders();
        self.texture_cache.on_frame_end();

        if !self.retired_pipelines.is_empty() || !self.retired_shaders.is_empty() {
            tracing::trace!(
                pipelines = self.retired_pipelines.len(),
                shaders = self.retired_shaders.len(),
                "dropping retired custom shader objects"
            );
            self.retired_pipelines.clear();
            self.retired_shaders.clear();
        }
    }

    /// Drop every session and cached GPU object.
    ///
    /// Loader workers are joined first, with `restart` they are spawned again.
    /// Session ids handed out before the reset are no longer valid.
    pub fn reset(&mut self, restart: bool) -> Result<()> {
        self.loader.reset(restart)?;
        self.shader_cache.reload();
        self.texture_cache.clear();

        self.asset_records.clear();
        self.session_by_asset.clear();
        self.loaded_assets.reset();
        self.pending_assets.reset();
        self.materials.clear();
        self.textures.clear();
        self.render_targets.clear();
        self.meshes.clear();
        self.vertex_formats.clear();
        self.retired_pipelines.clear();
        self.retired_shaders.clear();
        self.reload_handle.clear();
        self.ram_used = 0;
        self.stats = ResourceStats::default();

        tracing::debug!(restart, "custom resource manager reset");
        Ok(())
    }

    /// Stop the loader workers, no further loads complete afterwards
    pub fn shutdown(&mut self) {
        self.loader.shutdown();
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Material resource for drawing with `uid`, or `None` while anything in
    /// its chain is loading, compiling or broken
    pub fn get_material_from_asset<M: MaterialPayload>(
        &mut self,
        asset_id: &AssetId,
        uid: &PipelineUid,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<Arc<MaterialResource>> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("get_material_from_asset").entered();

        let result = self.get_or_create_asset::<M>(asset_id, library).and_then(|session| {
            let mut chain = Vec::new();
            self.finalize_material::<M>(session, library, &mut chain)?;
            self.touch_dependencies(session, &mut Vec::new());
            self.material_variant(session, uid, &mut Vec::new())
        });
        self.count_lookup(result.is_some());
        result
    }

    pub fn get_shader_data_from_asset<S: ShaderPayload>(
        &mut self,
        asset_id: &AssetId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<Arc<S>> {
        let result = self
            .get_or_create_asset::<S>(asset_id, library)
            .filter(|&session| self.finalize_leaf(session))
            .and_then(|session| self.asset_data::<S>(session));
        self.count_lookup(result.is_some());
        result
    }

    /// Loaded texture payload together with its load time
    pub fn get_texture_data_from_asset(
        &mut self,
        asset_id: &AssetId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<TextureTimePair> {
        let result = self
            .get_or_create_asset::<TextureData>(asset_id, library)
            .filter(|&session| self.finalize_leaf(session))
            .and_then(|session| self.texture_pair(session));
        self.count_lookup(result.is_some());
        result
    }

    pub fn get_render_target_from_asset(
        &mut self,
        asset_id: &AssetId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<Arc<RenderTargetResource>> {
        let result = self
            .get_or_create_asset::<RenderTargetData>(asset_id, library)
            .filter(|&session| self.finalize_leaf(session))
            .and_then(|session| self.render_target(session, asset_id));
        self.count_lookup(result.is_some());
        result
    }

    /// Mesh resource, its chunk materials are armed but resolved per draw
    pub fn get_mesh_from_asset(
        &mut self,
        asset_id: &AssetId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<Arc<MeshResource>> {
        let result = self
            .get_or_create_asset::<MeshData>(asset_id, library)
            .and_then(|session| self.finalize_mesh(session, library));
        self.count_lookup(result.is_some());
        result
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn record(&self, asset_id: &AssetId) -> Option<&AssetData> {
        let session = self.session_by_asset.get(asset_id)?;
        self.asset_records.get(session.index())
    }

    fn mint_session(&mut self, asset_id: &AssetId, asset_type: AssetType) -> SessionId {
        let session = SessionId::new(self.asset_records.len() as u64);
        self.asset_records
            .push(AssetData::new(asset_id.clone(), asset_type));
        self.session_by_asset.insert(asset_id.clone(), session);
        self.loaded_assets.prepare();
        self.pending_assets.prepare();
        tracing::trace!(asset = %asset_id, %session, ?asset_type, "minted custom asset session");
        session
    }

    /// Session of `asset_id`, creating the session and arming the load when
    /// needed. Touches the asset in whichever LRU currently holds it.
    fn get_or_create_asset<D: AssetPayload>(
        &mut self,
        asset_id: &AssetId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<SessionId> {
        let session = match self.session_by_asset.get(asset_id) {
            Some(&session) => session,
            None => self.mint_session(asset_id, D::ASSET_TYPE),
        };

        let record = &mut self.asset_records[session.index()];
        if record.asset_type != D::ASSET_TYPE {
            tracing::warn!(
                asset = %asset_id,
                expected = ?D::ASSET_TYPE,
                found = ?record.asset_type,
                "custom asset requested as the wrong type"
            );
            return None;
        }

        let existing = record.asset.clone();
        match existing {
            None => {
                let asset: Arc<dyn CustomAsset> =
                    Arc::new(LoadableAsset::<D>::new(library.clone(), asset_id.clone(), session));
                record.asset = Some(asset.clone());
                record.load_type = LoadType::PendingReload;
                self.pending_assets.put(session, asset);
            }
            Some(asset) if record.load_type == LoadType::PendingReload => {
                self.pending_assets.put(session, asset);
            }
            Some(asset) => self.loaded_assets.put(session, asset),
        }
        Some(session)
    }

    fn asset_data<D: AssetPayload>(&self, session: SessionId) -> Option<Arc<D>> {
        let asset = self.asset_records.get(session.index())?.asset.as_ref()?;
        asset.as_any().downcast_ref::<LoadableAsset<D>>()?.data()
    }

    fn touch_loaded(&mut self, session: SessionId) {
        if let Some(asset) = self.loaded_assets.erase(session) {
            self.loaded_assets.put(session, asset);
        }
    }

    fn count_lookup(&mut self, hit: bool) {
        if hit {
            self.stats.cache_hits += 1;
        } else {
            self.stats.cache_misses += 1;
        }
    }

    // ------------------------------------------------------------------
    // Loading, reloading and eviction
    // ------------------------------------------------------------------

    /// Move a finished load into the loaded set. Returns false for loads
    /// that went stale while the worker was busy.
    fn apply_completed_load(&mut self, session: SessionId) -> bool {
        let Some(record) = self.asset_records.get_mut(session.index()) else {
            return false;
        };
        if record.load_type != LoadType::PendingReload {
            return false;
        }
        let Some(asset) = record.asset.clone() else {
            return false;
        };
        // A reload or eviction replaced the object the worker filled in.
        if !asset.has_data() {
            return false;
        }

        record.load_type = LoadType::LoadFinished;
        self.pending_assets.erase(session);
        self.loaded_assets.put(session, asset.clone());
        self.ram_used += asset.byte_size_in_memory();
        self.stats.loads_applied += 1;

        if let Some(error) = asset.validation_error() {
            self.set_own_error(session, &error.to_string());
        }
        true
    }

    /// Replace the asset object of `session` with an empty one queued for load
    fn reload_session(&mut self, session: SessionId) {
        let record = &mut self.asset_records[session.index()];
        let Some(old) = record.asset.take() else {
            return;
        };
        let asset = old.rebuild();
        record.asset = Some(asset.clone());
        record.load_type = LoadType::PendingReload;
        record.clear_errors();

        if let Some(previous) = self.loaded_assets.erase(session) {
            self.ram_used = self.ram_used.saturating_sub(previous.byte_size_in_memory());
        }
        self.pending_assets.put(session, asset);
        self.stats.reloads += 1;
        tracing::debug!(asset = %old.asset_id(), %session, "custom asset queued for reload");

        self.invalidate_internal(session);
        self.propagate_dependency_change(session, ChangeKind::Invalidated);
    }

    fn reload_stale_assets(&mut self) {
        let stale: Vec<SessionId> = self
            .loaded_assets
            .elements()
            .filter(|(_, asset)| asset.is_stale())
            .map(|(session, _)| session)
            .collect();
        for session in stale {
            self.reload_session(session);
        }
    }

    /// Unload least recently used assets until usage drops to the eviction target
    fn evict_over_budget(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("evict_custom_assets").entered();

        let target =
            (self.max_ram_available as f64 * f64::from(self.config.eviction_target)) as u64;
        loop {
            while self.ram_used > target {
                let Some((session, asset)) = self.loaded_assets.pop() else {
                    break;
                };
                self.ram_used = self.ram_used.saturating_sub(asset.byte_size_in_memory());
                self.release_asset(session, asset);
            }

            // Sizes can drift from what was added at load time.
            self.ram_used = self
                .loaded_assets
                .elements()
                .map(|(_, asset)| asset.byte_size_in_memory())
                .sum();
            if self.ram_used <= target || self.loaded_assets.is_empty() {
                break;
            }
        }
    }

    fn release_asset(&mut self, session: SessionId, asset: Arc<dyn CustomAsset>) {
        asset.unload();
        let record = &mut self.asset_records[session.index()];
        record.asset = None;
        record.load_type = LoadType::Unloaded;
        record.clear_errors();
        self.pending_assets.erase(session);
        self.stats.evictions += 1;
        tracing::debug!(asset = %asset.asset_id(), %session, "evicted custom asset");

        self.invalidate_internal(session);
        self.propagate_dependency_change(session, ChangeKind::Invalidated);
    }

    // ------------------------------------------------------------------
    // Dependency graph
    // ------------------------------------------------------------------

    /// Walk the owners of `session` transitively, knocking finalized owners
    /// back to `DependenciesChanged`
    fn propagate_dependency_change(&mut self, session: SessionId, kind: ChangeKind) {
        let mut visited = AHashSet::new();
        visited.insert(session);
        let mut stack = vec![session];
        let mut cleared = Vec::new();

        while let Some(current) = stack.pop() {
            let owners: Vec<SessionId> = self.asset_records[current.index()]
                .asset_owners
                .iter()
                .copied()
                .collect();
            for owner in owners {
                if !visited.insert(owner) {
                    continue;
                }
                let record = &mut self.asset_records[owner.index()];
                let inherited_errors = kind == ChangeKind::Invalidated
                    && record.has_errors
                    && !record.own_errors;
                if inherited_errors {
                    record.has_errors = false;
                    cleared.push(owner);
                }
                let was_finalized = record.load_type == LoadType::LoadFinalyzed;
                if was_finalized {
                    record.load_type = LoadType::DependenciesChanged;
                }
                if was_finalized || inherited_errors {
                    self.invalidate_internal(owner);
                    stack.push(owner);
                }
            }
        }

        // Owners keep errors still reachable through their other dependencies.
        for owner in cleared {
            let record = &self.asset_records[owner.index()];
            let inherits = record
                .asset_dependencies
                .iter()
                .any(|dependency| self.asset_records[dependency.index()].has_errors);
            if inherits && !record.has_errors {
                self.asset_records[owner.index()].has_errors = true;
                self.mark_errors(owner);
            }
        }
    }

    /// Record that `owner` is built from `dependency`, inheriting its errors
    fn add_owner(&mut self, dependency: SessionId, owner: SessionId) {
        let record = &mut self.asset_records[dependency.index()];
        record.asset_owners.insert(owner);
        let inherited = record.has_errors;
        let owner_record = &mut self.asset_records[owner.index()];
        owner_record.asset_dependencies.insert(dependency);
        if inherited && !owner_record.has_errors {
            owner_record.has_errors = true;
            self.invalidate_internal(owner);
            self.mark_errors(owner);
        }
    }

    /// Forget the edges `owner` was last finalized with, its payload may
    /// reference different assets now
    fn clear_dependencies(&mut self, owner: SessionId) {
        let dependencies =
            std::mem::take(&mut self.asset_records[owner.index()].asset_dependencies);
        for dependency in dependencies {
            self.asset_records[dependency.index()]
                .asset_owners
                .remove(&owner);
        }
    }

    fn set_own_error(&mut self, session: SessionId, error: &str) {
        let record = &mut self.asset_records[session.index()];
        tracing::warn!(asset = %record.asset_id, %session, error, "custom asset is invalid");
        record.own_errors = true;
        record.has_errors = true;
        self.invalidate_internal(session);
        self.mark_errors(session);
    }

    /// Flag every transitive owner of `session` as errored
    fn mark_errors(&mut self, session: SessionId) {
        let mut stack = vec![session];
        while let Some(current) = stack.pop() {
            let owners: Vec<SessionId> = self.asset_records[current.index()]
                .asset_owners
                .iter()
                .copied()
                .collect();
            for owner in owners {
                let record = &mut self.asset_records[owner.index()];
                if record.has_errors {
                    continue;
                }
                record.has_errors = true;
                tracing::debug!(asset = %record.asset_id, "custom asset inherits dependency error");
                self.invalidate_internal(owner);
                stack.push(owner);
            }
        }
    }

    /// Drop the derived resources of `session`
    fn invalidate_internal(&mut self, session: SessionId) {
        let record = &self.asset_records[session.index()];
        let asset_id = record.asset_id.clone();
        match record.asset_type {
            AssetType::Material | AssetType::RasterMaterial => {
                self.materials.remove(&session);
            }
            AssetType::Shader | AssetType::RasterShader => {
                self.retired_pipelines
                    .extend(self.shader_cache.take_pipeline_resource(&asset_id));
                self.retired_shaders
                    .extend(self.shader_cache.take_pixel_shader_resource(&asset_id));
                self.retired_shaders
                    .extend(self.shader_cache.take_vertex_shader_resource(&asset_id));
                self.retired_shaders
                    .extend(self.shader_cache.take_geometry_shader_resource(&asset_id));
            }
            AssetType::Texture => {
                self.textures.remove(&session);
                self.texture_cache.release_to_pool(&asset_id);
            }
            AssetType::RenderTarget => {
                self.render_targets.remove(&session);
                self.texture_cache.release_to_pool(&asset_id);
            }
            AssetType::Mesh => {
                self.meshes.remove(&session);
            }
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Promote a dependency-free asset to `LoadFinalyzed` once its data is resident
    fn finalize_leaf(&mut self, session: SessionId) -> bool {
        let record = &mut self.asset_records[session.index()];
        if record.has_errors {
            return false;
        }
        match record.load_type {
            LoadType::LoadFinalyzed => true,
            LoadType::LoadFinished | LoadType::DependenciesChanged => {
                if record.asset.as_ref().is_some_and(|a| a.has_data()) {
                    record.load_type = LoadType::LoadFinalyzed;
                    true
                } else {
                    false
                }
            }
            LoadType::PendingReload | LoadType::Unloaded => false,
        }
    }

    /// Build the internal resource of a material once its shader, textures
    /// and chained materials are all usable. Every missing dependency is
    /// armed in the same call.
    fn finalize_material<M: MaterialPayload>(
        &mut self,
        session: SessionId,
        library: &Arc<dyn CustomAssetLibrary>,
        chain: &mut Vec<SessionId>,
    ) -> Option<()> {
        if chain.contains(&session) {
            self.set_own_error(session, "material chain loops back on itself");
            return None;
        }

        let record = &self.asset_records[session.index()];
        if record.has_errors {
            return None;
        }
        match record.load_type {
            LoadType::LoadFinalyzed if self.materials.contains_key(&session) => return Some(()),
            LoadType::LoadFinished | LoadType::DependenciesChanged | LoadType::LoadFinalyzed => {}
            LoadType::PendingReload | LoadType::Unloaded => return None,
        }
        let material = self.asset_data::<M>(session)?;
        self.clear_dependencies(session);

        let mut ready = true;
        let mut dependencies = SmallVec::<[SessionId; 8]>::new();

        let Some(shader_session) =
            self.get_or_create_asset::<M::Shader>(material.shader_asset(), library)
        else {
            self.set_own_error(session, "shader asset has the wrong type");
            return None;
        };
        self.add_owner(shader_session, session);
        dependencies.push(shader_session);
        ready &= self.finalize_leaf(shader_session);

        for binding in material.textures() {
            let dependency = match binding.source {
                TextureSource::Texture => {
                    self.get_or_create_asset::<TextureData>(&binding.asset, library)
                }
                TextureSource::RenderTarget => {
                    self.get_or_create_asset::<RenderTargetData>(&binding.asset, library)
                }
            };
            let Some(dependency) = dependency else {
                self.set_own_error(session, "texture binding refers to an asset of the wrong type");
                return None;
            };
            self.add_owner(dependency, session);
            dependencies.push(dependency);
            ready &= self.finalize_leaf(dependency);
        }

        let mut next_material = None;
        if let Some(next) = material.next_material() {
            let Some(next_session) = self.get_or_create_asset::<M>(next, library) else {
                self.set_own_error(session, "next material has the wrong type");
                return None;
            };
            self.add_owner(next_session, session);
            next_material = Some(next_session);
            chain.push(session);
            ready &= self
                .finalize_material::<M>(next_session, library, chain)
                .is_some();
            chain.pop();
        }

        if !ready || self.asset_records[session.index()].has_errors {
            return None;
        }

        let shader = self.asset_data::<M::Shader>(shader_session)?;
        let parts = match build_shader_parts(
            &*material,
            &*shader,
            material.shader_asset(),
            shader_session,
        ) {
            Ok(parts) => parts,
            Err(error) => {
                self.set_own_error(session, &error);
                return None;
            }
        };

        let mut textures = Vec::with_capacity(material.textures().len());
        for (binding, &dependency) in material.textures().iter().zip(&dependencies[1..]) {
            let (texture, sampler) = match binding.source {
                TextureSource::Texture => {
                    let data = self.asset_data::<TextureData>(dependency)?;
                    let texture = self.texture_cache.get_texture_from_data(&binding.asset, &data)?;
                    (texture, data.sampler)
                }
                TextureSource::RenderTarget => {
                    let data = self.asset_data::<RenderTargetData>(dependency)?;
                    let texture = self
                        .texture_cache
                        .get_texture_from_config(&binding.asset, &data.texture_config())?;
                    (texture, data.sampler)
                }
            };
            textures.push(MaterialTexture {
                sampler_name: binding.sampler_name.clone(),
                asset_id: binding.asset.clone(),
                texture,
                sampler: binding.sampler_override.unwrap_or(sampler),
            });
        }
        if let Some(next) = next_material {
            dependencies.push(next);
        }

        self.materials.insert(
            session,
            InternalMaterialResource {
                shader: parts.shader,
                pixel_uniforms: parts.pixel_uniforms,
                vertex_uniforms: parts.vertex_uniforms,
                textures,
                render_state: material.render_state(),
                next_material,
                dependencies,
                variants: AHashMap::new(),
            },
        );
        self.asset_records[session.index()].load_type = LoadType::LoadFinalyzed;
        tracing::trace!(asset = %self.asset_records[session.index()].asset_id, "custom material finalized");
        Some(())
    }

    /// Keep everything a finalized material draws with at the front of the LRU
    fn touch_dependencies(&mut self, session: SessionId, visited: &mut Vec<SessionId>) {
        if visited.contains(&session) {
            return;
        }
        visited.push(session);
        let Some(internal) = self.materials.get(&session) else {
            return;
        };
        let dependencies = internal.dependencies.clone();
        let next = internal.next_material;
        for dependency in dependencies {
            self.touch_loaded(dependency);
        }
        if let Some(next) = next {
            self.touch_dependencies(next, visited);
        }
    }

    /// Per pipeline uid resource of a finalized material, requesting the
    /// pipelines of the whole chain in one pass
    fn material_variant(
        &mut self,
        session: SessionId,
        uid: &PipelineUid,
        visited: &mut Vec<SessionId>,
    ) -> Option<Arc<MaterialResource>> {
        if visited.contains(&session) {
            return None;
        }
        visited.push(session);

        let internal = self.materials.get(&session)?;
        if let Some(variant) = internal.variants.get(uid) {
            return Some(variant.clone());
        }
        let pipeline_uid = internal.pipeline_uid(uid);
        let shader = internal.shader.clone();
        let next_material = internal.next_material;

        let status = self.shader_cache.get_pipeline_async(&pipeline_uid, &shader);
        let next_pass = match next_material {
            Some(next) => Some(self.material_variant(next, uid, visited)?),
            None => None,
        };
        // Failed compiles stay failed until the shader reloads or the cache is reloaded.
        let CompileStatus::Ready(pipeline) = status else {
            return None;
        };

        let internal = self.materials.get_mut(&session)?;
        let variant = Arc::new(internal.build_variant(pipeline, next_pass));
        internal.variants.insert(*uid, variant.clone());
        Some(variant)
    }

    fn texture_pair(&mut self, session: SessionId) -> Option<TextureTimePair> {
        if let Some(internal) = self.textures.get(&session) {
            return Some(internal.pair.clone());
        }
        let data = self.asset_data::<TextureData>(session)?;
        let time = self.asset_records[session.index()]
            .asset
            .as_ref()?
            .last_loaded_time()?;
        let pair = TextureTimePair { data, time };
        self.textures
            .insert(session, InternalTextureResource { pair: pair.clone() });
        Some(pair)
    }

    fn render_target(
        &mut self,
        session: SessionId,
        asset_id: &AssetId,
    ) -> Option<Arc<RenderTargetResource>> {
        if let Some(resource) = self.render_targets.get(&session) {
            return Some(resource.clone());
        }
        let data = self.asset_data::<RenderTargetData>(session)?;
        let texture = self
            .texture_cache
            .get_texture_from_config(asset_id, &data.texture_config())?;
        let resource = Arc::new(RenderTargetResource { data, texture });
        self.render_targets.insert(session, resource.clone());
        Some(resource)
    }

    fn finalize_mesh(
        &mut self,
        session: SessionId,
        library: &Arc<dyn CustomAssetLibrary>,
    ) -> Option<Arc<MeshResource>> {
        let record = &self.asset_records[session.index()];
        if record.has_errors {
            return None;
        }
        match record.load_type {
            LoadType::LoadFinalyzed => {
                if let Some(mesh) = self.meshes.get(&session) {
                    return Some(mesh.clone());
                }
            }
            LoadType::LoadFinished | LoadType::DependenciesChanged => {}
            LoadType::PendingReload | LoadType::Unloaded => return None,
        }
        let data = self.asset_data::<MeshData>(session)?;
        self.clear_dependencies(session);

        let mut chunks = Vec::with_capacity(data.chunks.len());
        for (chunk_index, chunk) in data.chunks.iter().enumerate() {
            let vertex_format = self.native_vertex_format(&chunk.vertex_declaration)?;
            let material = data.material_assets.get(&chunk.material_name).cloned();
            if let Some(material_id) = &material {
                if let Some(material_session) =
                    self.get_or_create_asset::<RasterMaterialData>(material_id, library)
                {
                    self.add_owner(material_session, session);
                }
            }
            chunks.push(MeshChunkResource {
                chunk_index,
                vertex_format,
                primitive: chunk.primitive,
                vertex_count: chunk.vertex_count(),
                index_count: chunk.indices.len(),
                material,
            });
        }
        // A chunk material may already carry errors.
        if self.asset_records[session.index()].has_errors {
            return None;
        }

        let mesh = Arc::new(MeshResource { data, chunks });
        self.meshes.insert(session, mesh.clone());
        self.asset_records[session.index()].load_type = LoadType::LoadFinalyzed;
        Some(mesh)
    }

    fn native_vertex_format(
        &mut self,
        declaration: &VertexDeclaration,
    ) -> Option<Arc<dyn NativeVertexFormat>> {
        if let Some(format) = self.vertex_formats.get(declaration) {
            return Some(format.clone());
        }
        let format = self.backend.create_native_vertex_format(declaration)?;
        self.vertex_formats
            .insert(declaration.clone(), format.clone());
        Some(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{InMemoryAssetLibrary, MaterialData, ShaderData};
    use crate::gpu::NullBackend;

    fn manager(max_ram: u64) -> CustomResourceManager {
        let config = ResourceManagerConfig {
            loader_threads: 0,
            shader_compiler_threads: 0,
            max_ram_override: Some(max_ram),
            ..Default::default()
        };
        CustomResourceManager::new(config, Arc::new(NullBackend::new())).unwrap()
    }

    /// Load every pending asset on the calling thread and apply it
    fn load_pending_inline(manager: &mut CustomResourceManager) {
        let pending: Vec<(SessionId, Arc<dyn CustomAsset>)> = manager
            .pending_assets
            .elements()
            .map(|(session, asset)| (session, asset.clone()))
            .collect();
        for (session, asset) in pending {
            assert!(asset.load());
            manager.apply_completed_load(session);
        }
    }

    fn texture(bytes: usize) -> TextureData {
        TextureData::single_level(1, (bytes / 4) as u32, vec![0; bytes])
    }

    #[test]
    fn test_single_session_per_asset() {
        let library = InMemoryAssetLibrary::default();
        library.insert("tex", texture(64));
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
        let mut manager = manager(1 << 20);

        let id = AssetId::from("tex");
        let first = manager.get_or_create_asset::<TextureData>(&id, &library);
        let second = manager.get_or_create_asset::<TextureData>(&id, &library);
        assert_eq!(first, second);
        assert_eq!(manager.asset_records.len(), 1);
        assert_eq!(manager.pending_assets.len(), 1);
        assert_eq!(manager.asset_load_state(&id), Some(LoadType::PendingReload));
    }

    #[test]
    fn test_wrong_type_request_is_rejected() {
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(InMemoryAssetLibrary::default());
        let mut manager = manager(1 << 20);

        let id = AssetId::from("thing");
        assert!(manager.get_or_create_asset::<TextureData>(&id, &library).is_some());
        assert!(manager.get_or_create_asset::<MeshData>(&id, &library).is_none());
    }

    #[test]
    fn test_completed_load_moves_to_loaded_set() {
        let library = InMemoryAssetLibrary::default();
        library.insert("tex", texture(128));
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
        let mut manager = manager(1 << 20);

        let id = AssetId::from("tex");
        assert!(manager.get_texture_data_from_asset(&id, &library).is_none());
        load_pending_inline(&mut manager);

        assert_eq!(manager.ram_used(), 128);
        assert_eq!(manager.loaded_assets.len(), 1);
        assert!(manager.pending_assets.is_empty());
        assert_eq!(manager.asset_load_state(&id), Some(LoadType::LoadFinished));

        let pair = manager.get_texture_data_from_asset(&id, &library).unwrap();
        assert_eq!(pair.data.slices[0].levels[0].data.len(), 128);
        assert_eq!(manager.asset_load_state(&id), Some(LoadType::LoadFinalyzed));
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let library = InMemoryAssetLibrary::default();
        library.insert("tex", texture(32));
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
        let mut manager = manager(1 << 20);

        let id = AssetId::from("tex");
        let session = manager.get_or_create_asset::<TextureData>(&id, &library).unwrap();
        let original = manager.pending_assets.get(session).unwrap().clone();
        assert!(original.load());
        manager.apply_completed_load(session);

        // Reload swaps in an empty object, a late completion of it is skipped.
        manager.reload_session(session);
        assert!(!manager.apply_completed_load(session));
        assert_eq!(manager.ram_used(), 0);
        assert_eq!(manager.asset_load_state(&id), Some(LoadType::PendingReload));
    }

    #[test]
    fn test_eviction_converges() {
        let budget = 4096u64;
        let library = InMemoryAssetLibrary::default();
        let mut state = 0x2545_f491_4f6c_dd1du64;
        for i in 0..64 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let bytes = 4 * (1 + (state % 256) as usize);
            library.insert(format!("tex{i}"), texture(bytes));
        }
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
        let mut manager = manager(budget);

        for i in 0..64 {
            let id = AssetId::from(format!("tex{i}"));
            manager.get_or_create_asset::<TextureData>(&id, &library);
        }
        load_pending_inline(&mut manager);
        assert!(manager.ram_used() > budget);

        manager.evict_over_budget();
        let target = (budget as f64 * 0.8) as u64;
        assert!(manager.ram_used() <= target || manager.loaded_assets.is_empty());
        assert!(manager.stats().evictions > 0);

        let resident: u64 = manager
            .loaded_assets
            .elements()
            .map(|(_, asset)| asset.byte_size_in_memory())
            .sum();
        assert_eq!(resident, manager.ram_used());
    }

    #[test]
    fn test_eviction_drops_least_recent_first() {
        let library = InMemoryAssetLibrary::default();
        for name in ["a", "b", "c"] {
            library.insert(name, texture(400));
        }
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
        let mut manager = manager(1000);

        for name in ["a", "b", "c"] {
            manager.get_or_create_asset::<TextureData>(&AssetId::from(name), &library);
        }
        load_pending_inline(&mut manager);
        // Touch "c" then "a" so "b" becomes the oldest.
        for name in ["c", "a"] {
            manager.get_or_create_asset::<TextureData>(&AssetId::from(name), &library);
        }

        manager.evict_over_budget();
        assert_eq!(
            manager.asset_load_state(&AssetId::from("b")),
            Some(LoadType::Unloaded)
        );
        assert!(manager.asset_load_state(&AssetId::from("a")).unwrap().is_loaded());
        assert_eq!(manager.ram_used(), 400);
    }

    #[test]
    fn test_sibling_reload_keeps_inherited_errors() {
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(InMemoryAssetLibrary::default());
        let mut manager = manager(1 << 20);

        let shader = manager
            .get_or_create_asset::<ShaderData>(&AssetId::from("shader"), &library)
            .unwrap();
        let texture = manager
            .get_or_create_asset::<TextureData>(&AssetId::from("tex"), &library)
            .unwrap();
        let material = manager
            .get_or_create_asset::<MaterialData>(&AssetId::from("material"), &library)
            .unwrap();
        let mesh = manager
            .get_or_create_asset::<MeshData>(&AssetId::from("mesh"), &library)
            .unwrap();
        manager.add_owner(shader, material);
        manager.add_owner(texture, material);
        manager.add_owner(material, mesh);

        manager.set_own_error(shader, "pixel shader source is empty");
        assert!(manager.asset_has_errors(&AssetId::from("material")));
        assert!(manager.asset_has_errors(&AssetId::from("mesh")));

        // The shader is still broken, so the texture reload changes nothing.
        manager.reload_session(texture);
        assert!(!manager.asset_has_errors(&AssetId::from("tex")));
        assert!(manager.asset_has_errors(&AssetId::from("material")));
        assert!(manager.asset_has_errors(&AssetId::from("mesh")));

        manager.reload_session(shader);
        assert!(!manager.asset_has_errors(&AssetId::from("material")));
        assert!(!manager.asset_has_errors(&AssetId::from("mesh")));
    }

    #[test]
    fn test_refinalize_drops_stale_dependency_edges() {
        let library: Arc<dyn CustomAssetLibrary> = Arc::new(InMemoryAssetLibrary::default());
        let mut manager = manager(1 << 20);

        let old_texture = manager
            .get_or_create_asset::<TextureData>(&AssetId::from("old"), &library)
            .unwrap();
        let material = manager
            .get_or_create_asset::<MaterialData>(&AssetId::from("material"), &library)
            .unwrap();
        manager.add_owner(old_texture, material);

        manager.clear_dependencies(material);
        assert!(manager.asset_records[old_texture.index()].asset_owners.is_empty());
        assert!(manager.asset_records[material.index()].asset_dependencies.is_empty());

        // Errors of assets no longer referenced stay put.
        manager.set_own_error(old_texture, "texture has no levels");
        assert!(!manager.asset_has_errors(&AssetId::from("material")));
    }
}
