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

// Custom shader cache
//
// Compiled shaders and pipelines for custom materials:
// - Entries are namespaced by the shader asset id so they can be taken out
//   and destroyed together when the shader changes
// - Compilation is asynchronous and polled, never waited on
// - A failed compile stays failed until its namespace is taken or the cache is reloaded

pub mod async_compiler;
pub mod shadergen;

pub use async_compiler::{AsyncShaderCompiler, AsyncWorkItem};

use crate::assets::{AssetId, SessionId, ShaderSampler};
use crate::error::Result;
use crate::gpu::{
    AbstractPipeline, AbstractShader, BackendCapabilities, GpuBackend, PipelineConfig,
    PipelineUid, PrimitiveType, ShaderStage,
};
use ahash::AHashMap;
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// State of an asynchronously compiled object
#[derive(Clone, Debug)]
pub enum CompileStatus<T> {
    Pending,
    Ready(T),
    Failed,
}

impl<T> CompileStatus<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, CompileStatus::Pending)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            CompileStatus::Ready(value) => Some(value),
            _ => None,
        }
    }
}

type Slot<T> = Arc<RwLock<CompileStatus<Arc<T>>>>;

fn pending_slot<T: ?Sized>() -> Slot<T> {
    Arc::new(RwLock::new(CompileStatus::Pending))
}

/// Identity of a custom shader permutation.
///
/// Two materials using the same shader asset share compiled code only when
/// they bind the same set of samplers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CustomShaderId {
    pub shader_session: SessionId,
    pub sampler_hash: u64,
}

impl CustomShaderId {
    /// `bound[i]` says whether `samplers[i]` has a texture bound
    pub fn new(shader_session: SessionId, samplers: &[ShaderSampler], bound: &[bool]) -> Self {
        let mut hasher = FxHasher::default();
        for (sampler, is_bound) in samplers.iter().zip(bound) {
            sampler.name.hash(&mut hasher);
            is_bound.hash(&mut hasher);
        }
        Self {
            shader_session,
            sampler_hash: hasher.finish(),
        }
    }
}

/// Custom shader code of one material permutation, as handed to [`CustomShaderCache::get_pipeline_async`]
#[derive(Clone, Debug)]
pub struct CustomShaderInstance {
    /// Namespace of every object compiled for this instance
    pub asset_id: AssetId,
    pub shader_id: CustomShaderId,
    pub pixel_source: Arc<str>,
    /// None keeps the emulated vertex stage
    pub vertex_source: Option<Arc<str>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PixelShaderKey {
    shader: CustomShaderId,
    pixel_shader: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct VertexShaderKey {
    shader: CustomShaderId,
    vertex_shader: u64,
    vertex_format: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: CustomShaderId,
    uid: PipelineUid,
}

type Namespaced<K, T> = AHashMap<AssetId, AHashMap<K, Slot<T>>>;

/// Counters published by retrieved work items
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderCacheStats {
    pub shaders_compiled: u64,
    pub pipelines_compiled: u64,
    pub failures: u64,
}

struct ShaderWorkItem {
    stage: ShaderStage,
    name: String,
    source: String,
    slot: Slot<dyn AbstractShader>,
    result: Option<Arc<dyn AbstractShader>>,
}

impl AsyncWorkItem<ShaderCacheStats> for ShaderWorkItem {
    fn compile(&mut self, backend: &dyn GpuBackend) {
        self.result = backend.create_shader_from_source(self.stage, &self.source, &self.name);
    }

    fn retrieve(
        self: Box<Self>,
        stats: &mut ShaderCacheStats,
    ) -> Option<Box<dyn AsyncWorkItem<ShaderCacheStats>>> {
        let item = *self;
        let status = match item.result {
            Some(shader) => {
                stats.shaders_compiled += 1;
                CompileStatus::Ready(shader)
            }
            None => {
                tracing::warn!(shader = %item.name, stage = ?item.stage, "custom shader failed to compile");
                stats.failures += 1;
                CompileStatus::Failed
            }
        };
        *item.slot.write() = status;
        None
    }
}

struct PipelineWorkItem {
    name: String,
    uid: PipelineUid,
    vertex: Slot<dyn AbstractShader>,
    pixel: Slot<dyn AbstractShader>,
    geometry: Option<Slot<dyn AbstractShader>>,
    slot: Slot<dyn AbstractPipeline>,
    /// None while a stage is still compiling
    result: Option<CompileStatus<Arc<dyn AbstractPipeline>>>,
}

impl AsyncWorkItem<ShaderCacheStats> for PipelineWorkItem {
    fn compile(&mut self, backend: &dyn GpuBackend) {
        let vertex = self.vertex.read().clone();
        let pixel = self.pixel.read().clone();
        let geometry = self.geometry.as_ref().map(|g| g.read().clone());

        let stages = [Some(&vertex), Some(&pixel), geometry.as_ref()];
        if stages.iter().flatten().any(|s| matches!(s, CompileStatus::Failed)) {
            self.result = Some(CompileStatus::Failed);
            return;
        }
        if stages.iter().flatten().any(|s| s.is_pending()) {
            return;
        }

        let (CompileStatus::Ready(vertex), CompileStatus::Ready(pixel)) = (vertex, pixel) else {
            return;
        };
        let geometry = geometry.and_then(CompileStatus::ready);
        let config = PipelineConfig {
            uid: &self.uid,
            vertex_shader: vertex.as_ref(),
            pixel_shader: pixel.as_ref(),
            geometry_shader: geometry.as_deref(),
        };
        self.result = Some(match backend.create_pipeline(&config) {
            Some(pipeline) => CompileStatus::Ready(pipeline),
            None => CompileStatus::Failed,
        });
    }

    fn retrieve(
        self: Box<Self>,
        stats: &mut ShaderCacheStats,
    ) -> Option<Box<dyn AsyncWorkItem<ShaderCacheStats>>> {
        let Some(status) = self.result.clone() else {
            return Some(self);
        };
        if matches!(status, CompileStatus::Ready(_)) {
            stats.pipelines_compiled += 1;
        } else {
            tracing::warn!(pipeline = %self.name, "custom pipeline failed to compile");
            stats.failures += 1;
        }
        *self.slot.write() = status;
        None
    }
}

/// Asynchronously compiled shaders and pipelines of custom materials
pub struct CustomShaderCache {
    backend: Arc<dyn GpuBackend>,
    capabilities: BackendCapabilities,
    compiler: AsyncShaderCompiler<ShaderCacheStats>,
    pixel_shaders: Namespaced<PixelShaderKey, dyn AbstractShader>,
    vertex_shaders: Namespaced<VertexShaderKey, dyn AbstractShader>,
    geometry_shaders: Namespaced<PrimitiveType, dyn AbstractShader>,
    pipelines: Namespaced<PipelineKey, dyn AbstractPipeline>,
    stats: ShaderCacheStats,
}

impl CustomShaderCache {
    pub fn new(backend: Arc<dyn GpuBackend>, compiler_threads: usize) -> Result<Self> {
        let compiler = AsyncShaderCompiler::new(backend.clone(), compiler_threads)?;
        Ok(Self {
            capabilities: backend.capabilities(),
            backend,
            compiler,
            pixel_shaders: AHashMap::new(),
            vertex_shaders: AHashMap::new(),
            geometry_shaders: AHashMap::new(),
            pipelines: AHashMap::new(),
            stats: ShaderCacheStats::default(),
        })
    }

    /// Pipeline for `uid` running the custom shader, compiling it on first request
    pub fn get_pipeline_async(
        &mut self,
        uid: &PipelineUid,
        shader: &CustomShaderInstance,
    ) -> CompileStatus<Arc<dyn AbstractPipeline>> {
        let key = PipelineKey {
            shader: shader.shader_id,
            uid: *uid,
        };
        if let Some(slot) = self.pipelines.get(&shader.asset_id).and_then(|m| m.get(&key)) {
            return slot.read().clone();
        }

        let pixel = self.pixel_shader_slot(uid, shader);
        let vertex = self.vertex_shader_slot(uid, shader);
        let geometry = uid
            .needs_geometry_shader(&self.capabilities)
            .then(|| self.geometry_shader_slot(uid.primitive, &shader.asset_id));

        let slot = pending_slot();
        self.pipelines
            .entry(shader.asset_id.clone())
            .or_default()
            .insert(key, slot.clone());
        self.compiler.queue_work_item(Box::new(PipelineWorkItem {
            name: format!("{} pipeline", shader.asset_id),
            uid: uid.with_backend_workarounds(&self.capabilities),
            vertex,
            pixel,
            geometry,
            slot,
            result: None,
        }));

        CompileStatus::Pending
    }

    fn pixel_shader_slot(
        &mut self,
        uid: &PipelineUid,
        shader: &CustomShaderInstance,
    ) -> Slot<dyn AbstractShader> {
        let key = PixelShaderKey {
            shader: shader.shader_id,
            pixel_shader: uid.pixel_shader,
        };
        let entries = self.pixel_shaders.entry(shader.asset_id.clone()).or_default();
        if let Some(slot) = entries.get(&key) {
            return slot.clone();
        }
        let slot = pending_slot();
        entries.insert(key, slot.clone());
        queue_shader(
            &self.compiler,
            ShaderStage::Pixel,
            format!("{} pixel shader", shader.asset_id),
            shader.pixel_source.to_string(),
            slot.clone(),
        );
        slot
    }

    fn vertex_shader_slot(
        &mut self,
        uid: &PipelineUid,
        shader: &CustomShaderInstance,
    ) -> Slot<dyn AbstractShader> {
        let key = VertexShaderKey {
            shader: shader.shader_id,
            vertex_shader: uid.vertex_shader,
            vertex_format: uid.vertex_format,
        };
        let entries = self.vertex_shaders.entry(shader.asset_id.clone()).or_default();
        if let Some(slot) = entries.get(&key) {
            return slot.clone();
        }
        let slot = pending_slot();
        entries.insert(key, slot.clone());
        let source = match &shader.vertex_source {
            Some(source) => source.to_string(),
            None => shadergen::emulated_vertex_source(uid),
        };
        queue_shader(
            &self.compiler,
            ShaderStage::Vertex,
            format!("{} vertex shader", shader.asset_id),
            source,
            slot.clone(),
        );
        slot
    }

    fn geometry_shader_slot(
        &mut self,
        primitive: PrimitiveType,
        asset_id: &AssetId,
    ) -> Slot<dyn AbstractShader> {
        let entries = self.geometry_shaders.entry(asset_id.clone()).or_default();
        if let Some(slot) = entries.get(&primitive) {
            return slot.clone();
        }
        let slot = pending_slot();
        entries.insert(primitive, slot.clone());
        queue_shader(
            &self.compiler,
            ShaderStage::Geometry,
            format!("{asset_id} geometry shader"),
            shadergen::wide_primitive_geometry_source(primitive),
            slot.clone(),
        );
        slot
    }

    /// Publish compiled objects, called once per frame
    pub fn retrieve_async_shaders(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("retrieve_async_shaders").entered();

        self.compiler.retrieve_work_items(&mut self.stats);
    }

    pub fn has_pending_work(&self) -> bool {
        self.compiler.has_pending_work()
    }

    /// Wait out in-flight work and flush every cache.
    ///
    /// Also re-reads the backend capabilities, so host configuration changes
    /// take effect.
    pub fn reload(&mut self) {
        self.compiler.clear_and_wait();
        self.pixel_shaders.clear();
        self.vertex_shaders.clear();
        self.geometry_shaders.clear();
        self.pipelines.clear();
        self.capabilities = self.backend.capabilities();
        tracing::debug!("custom shader cache flushed");
    }

    pub fn take_pipeline_resource(&mut self, asset_id: &AssetId) -> Vec<Arc<dyn AbstractPipeline>> {
        take_ready(&mut self.pipelines, asset_id)
    }

    pub fn take_pixel_shader_resource(&mut self, asset_id: &AssetId) -> Vec<Arc<dyn AbstractShader>> {
        take_ready(&mut self.pixel_shaders, asset_id)
    }

    pub fn take_vertex_shader_resource(&mut self, asset_id: &AssetId) -> Vec<Arc<dyn AbstractShader>> {
        take_ready(&mut self.vertex_shaders, asset_id)
    }

    pub fn take_geometry_shader_resource(
        &mut self,
        asset_id: &AssetId,
    ) -> Vec<Arc<dyn AbstractShader>> {
        take_ready(&mut self.geometry_shaders, asset_id)
    }

    pub fn stats(&self) -> ShaderCacheStats {
        self.stats
    }

    /// Cached pipelines, pending and failed ones included
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.values().map(|entries| entries.len()).sum()
    }

    pub fn shader_count(&self) -> usize {
        self.pixel_shaders.values().map(|entries| entries.len()).sum::<usize>()
            + self.vertex_shaders.values().map(|entries| entries.len()).sum::<usize>()
            + self.geometry_shaders.values().map(|entries| entries.len()).sum::<usize>()
    }
}

fn queue_shader(
    compiler: &AsyncShaderCompiler<ShaderCacheStats>,
    stage: ShaderStage,
    name: String,
    source: String,
    slot: Slot<dyn AbstractShader>,
) {
    compiler.queue_work_item(Box::new(ShaderWorkItem {
        stage,
        name,
        source,
        slot,
        result: None,
    }));
}

/// Remove an asset's namespace, returning the objects that finished compiling
fn take_ready<K, T: ?Sized>(cache: &mut Namespaced<K, T>, asset_id: &AssetId) -> Vec<Arc<T>> {
    cache
        .remove(asset_id)
        .into_iter()
        .flat_map(|entries| entries.into_iter().map(|(_, slot)| slot))
        .filter_map(|slot| slot.read().clone().ready())
        .collect()
}
