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

//! GPU backend interface consumed by the shader and texture caches.
//!
//! The backend is an opaque factory: every `create_*` call is synchronous and
//! may run on a compiler worker thread. A `None` result is a permanent failure
//! for that request.

pub mod null;
pub mod pipeline_uid;

pub use crate::config::BackendCapabilities;
pub use null::NullBackend;
pub use pipeline_uid::{
    BlendFactor, BlendingState, CompareMode, CullMode, DepthState, LogicOp, PipelineUid,
    PrimitiveType, RasterizationState,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Pixel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8,
    Bgra8,
    Dxt1,
    Dxt3,
    Dxt5,
    Bptc,
    Rgba16F,
    Rgba32F,
    Depth32F,
}

impl TextureFormat {
    /// Bytes needed for a `width` x `height` level
    pub fn level_size(self, width: u32, height: u32) -> u64 {
        let (w, h) = (width as u64, height as u64);
        let blocks = w.div_ceil(4) * h.div_ceil(4);
        match self {
            TextureFormat::Rgba8 | TextureFormat::Bgra8 | TextureFormat::Depth32F => w * h * 4,
            TextureFormat::Rgba16F => w * h * 8,
            TextureFormat::Rgba32F => w * h * 16,
            TextureFormat::Dxt1 => blocks * 8,
            TextureFormat::Dxt3 | TextureFormat::Dxt5 | TextureFormat::Bptc => blocks * 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    #[default]
    Texture2D,
    Texture2DArray,
    TextureCubemap,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterMode {
    Near,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    Clamp,
    #[default]
    Repeat,
    Mirror,
}

/// Fixed sampler state attached to a texture binding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerState {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub anisotropic_filtering: u8,
}

/// Allocation parameters of a GPU texture. Pooled textures are matched on this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureConfig {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub layers: u32,
    pub samples: u32,
    pub format: TextureFormat,
    pub texture_type: TextureType,
    pub render_target: bool,
}

impl TextureConfig {
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            levels: 1,
            layers: 1,
            samples: 1,
            format,
            texture_type: TextureType::Texture2D,
            render_target: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexAttribute {
    Position,
    Normal,
    Tangent,
    Color0,
    TexCoord0,
    TexCoord1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentFormat {
    Float2,
    Float3,
    Float4,
    UnormByte4,
}

impl ComponentFormat {
    pub fn size(self) -> u32 {
        match self {
            ComponentFormat::Float2 => 8,
            ComponentFormat::Float3 => 12,
            ComponentFormat::Float4 => 16,
            ComponentFormat::UnormByte4 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexComponent {
    pub attribute: VertexAttribute,
    pub format: ComponentFormat,
    pub offset: u32,
}

/// Interleaved vertex layout of a mesh chunk
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexDeclaration {
    pub stride: u32,
    pub components: Vec<VertexComponent>,
}

pub trait AbstractShader: Send + Sync + fmt::Debug {
    fn stage(&self) -> ShaderStage;
}

pub trait AbstractPipeline: Send + Sync + fmt::Debug {}

pub trait AbstractTexture: Send + Sync + fmt::Debug {
    fn config(&self) -> &TextureConfig;

    /// Upload one mip level of one layer
    fn upload(&self, level: u32, layer: u32, width: u32, height: u32, data: &[u8]);
}

pub trait NativeVertexFormat: Send + Sync + fmt::Debug {
    fn declaration(&self) -> &VertexDeclaration;
}

/// Everything the backend needs to build one pipeline
pub struct PipelineConfig<'a> {
    pub uid: &'a PipelineUid,
    pub vertex_shader: &'a dyn AbstractShader,
    pub pixel_shader: &'a dyn AbstractShader,
    pub geometry_shader: Option<&'a dyn AbstractShader>,
}

/// Synchronous GPU object factory
pub trait GpuBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    fn create_shader_from_source(
        &self,
        stage: ShaderStage,
        source: &str,
        name: &str,
    ) -> Option<Arc<dyn AbstractShader>>;

    fn create_pipeline(&self, config: &PipelineConfig<'_>) -> Option<Arc<dyn AbstractPipeline>>;

    fn create_texture(&self, config: &TextureConfig, name: &str) -> Option<Arc<dyn AbstractTexture>>;

    fn create_native_vertex_format(
        &self,
        declaration: &VertexDeclaration,
    ) -> Option<Arc<dyn NativeVertexFormat>>;
}
