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

//! Decoded asset payloads handed to the manager by a library

use super::{AssetId, AssetPayload, AssetType, CustomAssetLibrary, LoadInfo, PropertyValue};
use crate::error::Result;
use crate::gpu::{
    BlendingState, CullMode, DepthState, PrimitiveType, SamplerState, TextureConfig,
    TextureFormat, TextureType, VertexDeclaration,
};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::mem::size_of;

fn check_unique_names<'a>(
    kind: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> std::result::Result<(), String> {
    let mut seen = AHashSet::new();
    for name in names {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("{kind} name '{name}' is not a valid identifier"));
        }
        if !seen.insert(name) {
            return Err(format!("{kind} '{name}' declared twice"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shaders
// ---------------------------------------------------------------------------

/// Uniform declared by a shader, with the value used when a material omits it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShaderProperty {
    pub name: String,
    pub default: PropertyValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderSampler {
    pub name: String,
    pub texture_type: TextureType,
}

/// Pixel-only custom shader
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderData {
    pub pixel_source: String,
    pub properties: Vec<ShaderProperty>,
    pub samplers: Vec<ShaderSampler>,
}

/// Custom shader replacing both the vertex and pixel stage
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterShaderData {
    pub vertex_source: String,
    pub pixel_source: String,
    pub properties: Vec<ShaderProperty>,
    pub samplers: Vec<ShaderSampler>,
}

/// Common view over the shader payloads
pub trait ShaderPayload: AssetPayload {
    fn pixel_source(&self) -> &str;

    /// None keeps the emulated vertex shader
    fn vertex_source(&self) -> Option<&str>;

    fn properties(&self) -> &[ShaderProperty];

    fn samplers(&self) -> &[ShaderSampler];
}

fn validate_shader(shader: &impl ShaderPayload) -> std::result::Result<(), String> {
    if shader.pixel_source().trim().is_empty() {
        return Err("pixel shader source is empty".to_string());
    }
    if shader.vertex_source().is_some_and(|s| s.trim().is_empty()) {
        return Err("vertex shader source is empty".to_string());
    }
    check_unique_names("property", shader.properties().iter().map(|p| p.name.as_str()))?;
    check_unique_names("sampler", shader.samplers().iter().map(|s| s.name.as_str()))
}

fn shader_memory_size(shader: &impl ShaderPayload) -> u64 {
    let strings = shader.pixel_source().len()
        + shader.vertex_source().map_or(0, str::len)
        + shader.properties().iter().map(|p| p.name.len()).sum::<usize>()
        + shader.samplers().iter().map(|s| s.name.len()).sum::<usize>();
    (strings
        + shader.properties().len() * size_of::<ShaderProperty>()
        + shader.samplers().len() * size_of::<ShaderSampler>()) as u64
}

impl AssetPayload for ShaderData {
    const ASSET_TYPE: AssetType = AssetType::Shader;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_shader(asset_id)
    }

    fn memory_size(&self) -> u64 {
        shader_memory_size(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_shader(self)
    }
}

impl ShaderPayload for ShaderData {
    fn pixel_source(&self) -> &str {
        &self.pixel_source
    }
    fn vertex_source(&self) -> Option<&str> {
        None
    }
    fn properties(&self) -> &[ShaderProperty] {
        &self.properties
    }
    fn samplers(&self) -> &[ShaderSampler] {
        &self.samplers
    }
}

impl AssetPayload for RasterShaderData {
    const ASSET_TYPE: AssetType = AssetType::RasterShader;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_raster_shader(asset_id)
    }

    fn memory_size(&self) -> u64 {
        shader_memory_size(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_shader(self)
    }
}

impl ShaderPayload for RasterShaderData {
    fn pixel_source(&self) -> &str {
        &self.pixel_source
    }
    fn vertex_source(&self) -> Option<&str> {
        Some(&self.vertex_source)
    }
    fn properties(&self) -> &[ShaderProperty] {
        &self.properties
    }
    fn samplers(&self) -> &[ShaderSampler] {
        &self.samplers
    }
}

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialProperty {
    pub code_name: String,
    pub value: PropertyValue,
}

/// Where a sampler binding gets its texture from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureSource {
    Texture,
    RenderTarget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureSamplerBinding {
    pub sampler_name: String,
    pub asset: AssetId,
    pub source: TextureSource,
    /// Replaces the sampler state stored with the texture
    pub sampler_override: Option<SamplerState>,
}

impl TextureSamplerBinding {
    pub fn texture(sampler_name: impl Into<String>, asset: impl Into<AssetId>) -> Self {
        Self {
            sampler_name: sampler_name.into(),
            asset: asset.into(),
            source: TextureSource::Texture,
            sampler_override: None,
        }
    }

    pub fn render_target(sampler_name: impl Into<String>, asset: impl Into<AssetId>) -> Self {
        Self {
            sampler_name: sampler_name.into(),
            asset: asset.into(),
            source: TextureSource::RenderTarget,
            sampler_override: None,
        }
    }
}

/// Fixed-function state a material may force over the emulated one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialRenderState {
    pub blending: Option<BlendingState>,
    pub depth: Option<DepthState>,
    pub cull_mode: Option<CullMode>,
}

/// Material driving a pixel-only [`ShaderData`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialData {
    pub shader_asset: AssetId,
    pub properties: Vec<MaterialProperty>,
    pub textures: Vec<TextureSamplerBinding>,
}

/// Material driving a [`RasterShaderData`], optionally chained to another pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterMaterialData {
    pub shader_asset: AssetId,
    pub vertex_properties: Vec<MaterialProperty>,
    pub pixel_properties: Vec<MaterialProperty>,
    pub textures: Vec<TextureSamplerBinding>,
    pub next_material_asset: Option<AssetId>,
    pub render_state: MaterialRenderState,
}

/// Common view over the material payloads
pub trait MaterialPayload: AssetPayload {
    type Shader: ShaderPayload;

    fn shader_asset(&self) -> &AssetId;

    fn pixel_properties(&self) -> &[MaterialProperty];

    fn vertex_properties(&self) -> &[MaterialProperty] {
        &[]
    }

    fn textures(&self) -> &[TextureSamplerBinding];

    fn next_material(&self) -> Option<&AssetId> {
        None
    }

    fn render_state(&self) -> MaterialRenderState {
        MaterialRenderState::default()
    }
}

fn validate_material(material: &impl MaterialPayload) -> std::result::Result<(), String> {
    if material.shader_asset().as_str().is_empty() {
        return Err("material has no shader".to_string());
    }
    check_unique_names(
        "pixel property",
        material.pixel_properties().iter().map(|p| p.code_name.as_str()),
    )?;
    check_unique_names(
        "vertex property",
        material.vertex_properties().iter().map(|p| p.code_name.as_str()),
    )?;
    check_unique_names(
        "sampler binding",
        material.textures().iter().map(|t| t.sampler_name.as_str()),
    )
}

fn material_memory_size(material: &impl MaterialPayload) -> u64 {
    let properties = material.pixel_properties().len() + material.vertex_properties().len();
    let textures: usize = material
        .textures()
        .iter()
        .map(|t| size_of::<TextureSamplerBinding>() + t.sampler_name.len() + t.asset.as_str().len())
        .sum();
    (size_of::<MaterialRenderState>()
        + material.shader_asset().as_str().len()
        + properties * size_of::<MaterialProperty>()
        + textures) as u64
}

impl AssetPayload for MaterialData {
    const ASSET_TYPE: AssetType = AssetType::Material;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_material(asset_id)
    }

    fn memory_size(&self) -> u64 {
        material_memory_size(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_material(self)
    }
}

impl MaterialPayload for MaterialData {
    type Shader = ShaderData;

    fn shader_asset(&self) -> &AssetId {
        &self.shader_asset
    }
    fn pixel_properties(&self) -> &[MaterialProperty] {
        &self.properties
    }
    fn textures(&self) -> &[TextureSamplerBinding] {
        &self.textures
    }
}

impl AssetPayload for RasterMaterialData {
    const ASSET_TYPE: AssetType = AssetType::RasterMaterial;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_raster_material(asset_id)
    }

    fn memory_size(&self) -> u64 {
        material_memory_size(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_material(self)
    }
}

impl MaterialPayload for RasterMaterialData {
    type Shader = RasterShaderData;

    fn shader_asset(&self) -> &AssetId {
        &self.shader_asset
    }
    fn pixel_properties(&self) -> &[MaterialProperty] {
        &self.pixel_properties
    }
    fn vertex_properties(&self) -> &[MaterialProperty] {
        &self.vertex_properties
    }
    fn textures(&self) -> &[TextureSamplerBinding] {
        &self.textures
    }
    fn next_material(&self) -> Option<&AssetId> {
        self.next_material_asset.as_ref()
    }
    fn render_state(&self) -> MaterialRenderState {
        self.render_state
    }
}

// ---------------------------------------------------------------------------
// Textures and render targets
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One layer (or cube face) with its mip chain
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureSlice {
    pub levels: Vec<TextureLevel>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureData {
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub slices: Vec<TextureSlice>,
    pub sampler: SamplerState,
}

impl TextureData {
    /// 2D RGBA8 texture without mips
    pub fn single_level(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            texture_type: TextureType::Texture2D,
            format: TextureFormat::Rgba8,
            slices: vec![TextureSlice {
                levels: vec![TextureLevel {
                    width,
                    height,
                    data,
                }],
            }],
            sampler: SamplerState::default(),
        }
    }

    /// GPU allocation matching this data
    pub fn texture_config(&self) -> TextureConfig {
        let first = self.slices.first().and_then(|s| s.levels.first());
        TextureConfig {
            width: first.map_or(1, |l| l.width),
            height: first.map_or(1, |l| l.height),
            levels: self.slices.first().map_or(1, |s| s.levels.len() as u32),
            layers: self.slices.len() as u32,
            samples: 1,
            format: self.format,
            texture_type: self.texture_type,
            render_target: false,
        }
    }
}

impl AssetPayload for TextureData {
    const ASSET_TYPE: AssetType = AssetType::Texture;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_texture(asset_id)
    }

    fn memory_size(&self) -> u64 {
        self.slices
            .iter()
            .flat_map(|s| s.levels.iter())
            .map(|l| l.data.len() as u64)
            .sum()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let Some(first) = self.slices.first() else {
            return Err("texture has no slices".to_string());
        };
        if self.texture_type == TextureType::TextureCubemap && self.slices.len() != 6 {
            return Err(format!("cubemap has {} faces", self.slices.len()));
        }
        if self.texture_type == TextureType::Texture2D && self.slices.len() != 1 {
            return Err(format!("2D texture has {} slices", self.slices.len()));
        }
        for (slice_index, slice) in self.slices.iter().enumerate() {
            if slice.levels.is_empty() || slice.levels.len() != first.levels.len() {
                return Err(format!("slice {slice_index} has a mismatched mip chain"));
            }
            for (level_index, level) in slice.levels.iter().enumerate() {
                let expected = self.format.level_size(level.width, level.height);
                if level.data.len() as u64 != expected {
                    return Err(format!(
                        "slice {slice_index} level {level_index} has {} bytes, expected {expected}",
                        level.data.len()
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTargetData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub sampler: SamplerState,
}

impl RenderTargetData {
    pub fn texture_config(&self) -> TextureConfig {
        TextureConfig::render_target(self.width, self.height, self.format)
    }
}

impl AssetPayload for RenderTargetData {
    const ASSET_TYPE: AssetType = AssetType::RenderTarget;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_render_target(asset_id)
    }

    fn memory_size(&self) -> u64 {
        size_of::<Self>() as u64
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("render target is {}x{}", self.width, self.height));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Meshes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshChunkData {
    pub vertex_data: Vec<u8>,
    pub indices: Vec<u16>,
    pub vertex_declaration: VertexDeclaration,
    pub primitive: PrimitiveType,
    /// Looked up in [`MeshData::material_assets`]
    pub material_name: String,
}

impl MeshChunkData {
    pub fn vertex_count(&self) -> usize {
        match self.vertex_declaration.stride {
            0 => 0,
            stride => self.vertex_data.len() / stride as usize,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub chunks: Vec<MeshChunkData>,
    pub material_assets: BTreeMap<String, AssetId>,
}

impl AssetPayload for MeshData {
    const ASSET_TYPE: AssetType = AssetType::Mesh;

    fn load_from_library(library: &dyn CustomAssetLibrary, asset_id: &AssetId) -> Result<(Self, LoadInfo)> {
        library.load_mesh(asset_id)
    }

    fn memory_size(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.vertex_data.len() + c.indices.len() * size_of::<u16>())
            .sum::<usize>() as u64
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for (index, chunk) in self.chunks.iter().enumerate() {
            let stride = chunk.vertex_declaration.stride;
            if stride == 0 || chunk.vertex_data.len() % stride as usize != 0 {
                return Err(format!("chunk {index} vertex data does not match stride {stride}"));
            }
            if let Some(component) = chunk
                .vertex_declaration
                .components
                .iter()
                .find(|c| c.offset + c.format.size() > stride)
            {
                return Err(format!("chunk {index} component {:?} exceeds stride", component.attribute));
            }
            let vertex_count = chunk.vertex_count();
            if chunk.indices.iter().any(|&i| i as usize >= vertex_count) {
                return Err(format!("chunk {index} indexes past its {vertex_count} vertices"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_validation() {
        let ok = TextureData::single_level(2, 2, vec![0; 16]);
        assert!(ok.validate().is_ok());

        let short = TextureData::single_level(2, 2, vec![0; 15]);
        assert!(short.validate().is_err());

        let mut cube = TextureData::single_level(1, 1, vec![0; 4]);
        cube.texture_type = TextureType::TextureCubemap;
        assert!(cube.validate().is_err());
        cube.slices = vec![cube.slices[0].clone(); 6];
        assert!(cube.validate().is_ok());
        assert_eq!(cube.texture_config().layers, 6);
    }

    #[test]
    fn test_shader_validation() {
        let mut shader = ShaderData {
            pixel_source: "void main() {}".into(),
            ..Default::default()
        };
        assert!(shader.validate().is_ok());

        shader.samplers = vec![
            ShaderSampler { name: "albedo".into(), texture_type: TextureType::Texture2D },
            ShaderSampler { name: "albedo".into(), texture_type: TextureType::Texture2D },
        ];
        assert!(shader.validate().is_err());

        let empty = RasterShaderData {
            pixel_source: "void main() {}".into(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_material_requires_shader() {
        let material = RasterMaterialData::default();
        assert!(material.validate().is_err());
    }
}
