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

//! Material resources handed to the renderer

use crate::assets::{
    property::write_uniform_block, AssetId, MaterialPayload, MaterialRenderState, SessionId,
    ShaderPayload,
};
use crate::gpu::{AbstractPipeline, AbstractTexture, PipelineUid, SamplerState};
use crate::shader_cache::shadergen::{custom_stage_source, resolve_properties};
use crate::shader_cache::{CustomShaderId, CustomShaderInstance};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct MaterialTexture {
    pub sampler_name: String,
    pub asset_id: AssetId,
    pub texture: Arc<dyn AbstractTexture>,
    pub sampler: SamplerState,
}

/// Everything needed to draw with a custom material for one pipeline uid
#[derive(Debug)]
pub struct MaterialResource {
    pub pipeline: Arc<dyn AbstractPipeline>,
    pub pixel_uniforms: Vec<u8>,
    pub vertex_uniforms: Vec<u8>,
    pub textures: Vec<MaterialTexture>,
    pub render_state: MaterialRenderState,
    /// Chained material drawn after this one
    pub next_pass: Option<Arc<MaterialResource>>,
}

/// Shader side of a finalized material
pub(crate) struct MaterialShaderParts {
    pub shader: CustomShaderInstance,
    pub pixel_uniforms: Vec<u8>,
    pub vertex_uniforms: Vec<u8>,
}

/// Derived state of a finalized material, variants are built per pipeline uid
pub(crate) struct InternalMaterialResource {
    pub shader: CustomShaderInstance,
    pub pixel_uniforms: Vec<u8>,
    pub vertex_uniforms: Vec<u8>,
    pub textures: Vec<MaterialTexture>,
    pub render_state: MaterialRenderState,
    pub next_material: Option<SessionId>,
    /// Sessions kept warm in the LRU while this material is in use
    pub dependencies: SmallVec<[SessionId; 8]>,
    pub variants: AHashMap<PipelineUid, Arc<MaterialResource>>,
}

impl InternalMaterialResource {
    /// Copy of `uid` with the material's forced render state applied
    pub fn pipeline_uid(&self, uid: &PipelineUid) -> PipelineUid {
        let mut adjusted = *uid;
        if let Some(blending) = self.render_state.blending {
            adjusted.blending = blending;
        }
        if let Some(depth) = self.render_state.depth {
            adjusted.depth = depth;
        }
        if let Some(cull_mode) = self.render_state.cull_mode {
            adjusted.rasterization.cull_mode = cull_mode;
        }
        adjusted
    }

    pub fn build_variant(
        &self,
        pipeline: Arc<dyn AbstractPipeline>,
        next_pass: Option<Arc<MaterialResource>>,
    ) -> MaterialResource {
        MaterialResource {
            pipeline,
            pixel_uniforms: self.pixel_uniforms.clone(),
            vertex_uniforms: self.vertex_uniforms.clone(),
            textures: self.textures.clone(),
            render_state: self.render_state,
            next_pass,
        }
    }
}

/// Assemble the custom shader code and uniform buffers of `material`
pub(crate) fn build_shader_parts<M: MaterialPayload>(
    material: &M,
    shader: &M::Shader,
    shader_asset: &AssetId,
    shader_session: SessionId,
) -> Result<MaterialShaderParts, String> {
    if let Some(binding) = material
        .textures()
        .iter()
        .find(|b| !shader.samplers().iter().any(|s| s.name == b.sampler_name))
    {
        return Err(format!(
            "sampler '{}' is not declared by shader '{shader_asset}'",
            binding.sampler_name
        ));
    }

    let bound: Vec<bool> = shader
        .samplers()
        .iter()
        .map(|s| material.textures().iter().any(|b| b.sampler_name == s.name))
        .collect();
    let shader_id = CustomShaderId::new(shader_session, shader.samplers(), &bound);

    // Uniform values go to the buffers, the block layout only depends on the shader.
    let pixel_values = resolve_properties(shader.properties(), material.pixel_properties());
    let vertex_values = resolve_properties(shader.properties(), material.vertex_properties());

    let pixel_source = custom_stage_source(
        "PixelProperties",
        shader.pixel_source(),
        &pixel_values,
        shader.samplers(),
        &bound,
    );
    let vertex_source = shader.vertex_source().map(|source| {
        Arc::from(custom_stage_source(
            "VertexProperties",
            source,
            &vertex_values,
            shader.samplers(),
            &bound,
        ))
    });

    Ok(MaterialShaderParts {
        shader: CustomShaderInstance {
            asset_id: shader_asset.clone(),
            shader_id,
            pixel_source: Arc::from(pixel_source),
            vertex_source,
        },
        pixel_uniforms: write_uniform_block(pixel_values.iter().map(|(_, v)| v)),
        vertex_uniforms: match shader.vertex_source() {
            Some(_) => write_uniform_block(vertex_values.iter().map(|(_, v)| v)),
            None => Vec::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{
        MaterialData, MaterialProperty, PropertyValue, RasterMaterialData, RasterShaderData,
        ShaderData, ShaderProperty, ShaderSampler, TextureSamplerBinding,
        SHADER_PROPERTY_SLOT_SIZE,
    };
    use crate::gpu::{CullMode, TextureType};

    fn shader() -> ShaderData {
        ShaderData {
            pixel_source: "void main() {}".into(),
            properties: vec![ShaderProperty {
                name: "tint".into(),
                default: PropertyValue::Float(1.0),
            }],
            samplers: vec![ShaderSampler {
                name: "albedo".into(),
                texture_type: TextureType::Texture2D,
            }],
        }
    }

    #[test]
    fn test_shader_parts_for_pixel_material() {
        let material = MaterialData {
            shader_asset: "shader".into(),
            properties: vec![MaterialProperty {
                code_name: "tint".into(),
                value: PropertyValue::Float(0.25),
            }],
            textures: vec![TextureSamplerBinding::texture("albedo", "tex")],
        };
        let parts =
            build_shader_parts(&material, &shader(), &"shader".into(), SessionId::new(2)).unwrap();

        assert_eq!(parts.pixel_uniforms.len(), SHADER_PROPERTY_SLOT_SIZE);
        assert_eq!(&parts.pixel_uniforms[0..4], &0.25f32.to_ne_bytes());
        assert!(parts.vertex_uniforms.is_empty());
        assert!(parts.shader.vertex_source.is_none());
        assert!(parts.shader.pixel_source.contains("#define HAS_ALBEDO 1"));
        assert_eq!(parts.shader.asset_id, AssetId::from("shader"));
    }

    #[test]
    fn test_unknown_sampler_is_an_error() {
        let material = MaterialData {
            shader_asset: "shader".into(),
            properties: vec![],
            textures: vec![TextureSamplerBinding::texture("normal", "tex")],
        };
        assert!(build_shader_parts(&material, &shader(), &"shader".into(), SessionId::new(0)).is_err());
    }

    #[test]
    fn test_raster_material_gets_vertex_stage() {
        let shader = RasterShaderData {
            vertex_source: "void main() {}".into(),
            pixel_source: "void main() {}".into(),
            properties: vec![ShaderProperty {
                name: "scale".into(),
                default: PropertyValue::Float(2.0),
            }],
            samplers: vec![],
        };
        let material = RasterMaterialData {
            shader_asset: "raster".into(),
            ..Default::default()
        };
        let parts =
            build_shader_parts(&material, &shader, &"raster".into(), SessionId::new(0)).unwrap();
        assert!(parts.shader.vertex_source.is_some());
        assert_eq!(parts.vertex_uniforms.len(), SHADER_PROPERTY_SLOT_SIZE);
    }

    #[test]
    fn test_render_state_applies_to_copy() {
        let internal = InternalMaterialResource {
            shader: CustomShaderInstance {
                asset_id: "s".into(),
                shader_id: CustomShaderId::new(SessionId::new(0), &[], &[]),
                pixel_source: Arc::from(""),
                vertex_source: None,
            },
            pixel_uniforms: vec![],
            vertex_uniforms: vec![],
            textures: vec![],
            render_state: MaterialRenderState {
                cull_mode: Some(CullMode::Back),
                ..Default::default()
            },
            next_material: None,
            dependencies: SmallVec::new(),
            variants: AHashMap::new(),
        };
        let uid = PipelineUid::default();
        let adjusted = internal.pipeline_uid(&uid);
        assert_eq!(adjusted.rasterization.cull_mode, CullMode::Back);
        assert_eq!(uid.rasterization.cull_mode, CullMode::None);
    }
}
