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

//! Source assembly for custom shader stages

use crate::assets::{MaterialProperty, PropertyValue, ShaderProperty, ShaderSampler};
use crate::gpu::{PipelineUid, PrimitiveType};
use std::fmt::Write;

/// Uniform block member order for a material, with shader defaults filling gaps
pub fn resolve_properties<'a>(
    declared: &'a [ShaderProperty],
    overrides: &'a [MaterialProperty],
) -> Vec<(&'a str, PropertyValue)> {
    declared
        .iter()
        .map(|property| {
            let value = overrides
                .iter()
                .find(|o| o.code_name == property.name && o.value.same_type(&property.default))
                .map_or(property.default, |o| o.value);
            (property.name.as_str(), value)
        })
        .collect()
}

/// Custom stage source: sampler defines, the uniform block, then the user code
pub fn custom_stage_source(
    block_name: &str,
    user_source: &str,
    properties: &[(&str, PropertyValue)],
    samplers: &[ShaderSampler],
    bound: &[bool],
) -> String {
    let mut out = String::new();
    for (sampler, is_bound) in samplers.iter().zip(bound) {
        if *is_bound {
            let _ = writeln!(out, "#define HAS_{} 1", sampler.name.to_ascii_uppercase());
        }
    }
    if !properties.is_empty() {
        let _ = writeln!(out, "UBO_BINDING(std140, 3) uniform {block_name} {{");
        for (name, value) in properties {
            value.write_as_shader_code(name, &mut out);
        }
        out.push_str("};\n");
    }
    out.push_str(user_source);
    out
}

/// Pass-through vertex stage for materials that only replace the pixel stage
pub fn emulated_vertex_source(uid: &PipelineUid) -> String {
    format!(
        "// emulated vertex shader {:016x} format {:016x}\nvoid main() {{ emulated_vertex(); }}\n",
        uid.vertex_shader, uid.vertex_format
    )
}

/// Quad expansion for wide points and lines
pub fn wide_primitive_geometry_source(primitive: PrimitiveType) -> String {
    let (input, vertices) = match primitive {
        PrimitiveType::Points => ("points", 1),
        PrimitiveType::Lines => ("lines", 2),
        _ => ("triangles", 3),
    };
    format!(
        "layout({input}) in;\nlayout(triangle_strip, max_vertices = 4) out;\n\
         void main() {{ expand_wide_primitive({vertices}); }}\n"
    )
}
