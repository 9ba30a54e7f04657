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

//! Headless backend producing inert GPU objects

use super::*;
use crate::config::BackendCapabilities;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct NullShader {
    stage: ShaderStage,
}

impl AbstractShader for NullShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }
}

#[derive(Debug)]
struct NullPipeline;

impl AbstractPipeline for NullPipeline {}

#[derive(Debug)]
struct NullTexture {
    config: TextureConfig,
    uploads: AtomicUsize,
}

impl AbstractTexture for NullTexture {
    fn config(&self) -> &TextureConfig {
        &self.config
    }

    fn upload(&self, _level: u32, _layer: u32, _width: u32, _height: u32, _data: &[u8]) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct NullVertexFormat {
    declaration: VertexDeclaration,
}

impl NativeVertexFormat for NullVertexFormat {
    fn declaration(&self) -> &VertexDeclaration {
        &self.declaration
    }
}

/// Creation counters of a [`NullBackend`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NullBackendStats {
    pub shaders: usize,
    pub pipelines: usize,
    pub textures: usize,
    pub vertex_formats: usize,
}

/// Backend that always succeeds and only counts what it was asked to create
#[derive(Default)]
pub struct NullBackend {
    capabilities: BackendCapabilities,
    shaders: AtomicUsize,
    pipelines: AtomicUsize,
    textures: AtomicUsize,
    vertex_formats: AtomicUsize,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }

    pub fn stats(&self) -> NullBackendStats {
        NullBackendStats {
            shaders: self.shaders.load(Ordering::Relaxed),
            pipelines: self.pipelines.load(Ordering::Relaxed),
            textures: self.textures.load(Ordering::Relaxed),
            vertex_formats: self.vertex_formats.load(Ordering::Relaxed),
        }
    }
}

impl GpuBackend for NullBackend {
    fn name(&self) -> &str {
        "Null"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_shader_from_source(
        &self,
        stage: ShaderStage,
        _source: &str,
        _name: &str,
    ) -> Option<Arc<dyn AbstractShader>> {
        self.shaders.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(NullShader { stage }))
    }

    fn create_pipeline(&self, _config: &PipelineConfig<'_>) -> Option<Arc<dyn AbstractPipeline>> {
        self.pipelines.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(NullPipeline))
    }

    fn create_texture(&self, config: &TextureConfig, _name: &str) -> Option<Arc<dyn AbstractTexture>> {
        self.textures.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(NullTexture {
            config: *config,
            uploads: AtomicUsize::new(0),
        }))
    }

    fn create_native_vertex_format(
        &self,
        declaration: &VertexDeclaration,
    ) -> Option<Arc<dyn NativeVertexFormat>> {
        self.vertex_formats.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(NullVertexFormat {
            declaration: declaration.clone(),
        }))
    }
}
