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

//! Shader and material property values.
//!
//! Every value occupies exactly one 16 byte std140 slot in the uniform buffer,
//! the unused tail is zero filled and declared as padding members in the
//! generated shader code. Shaders and the buffers written here must agree on
//! this layout byte for byte.

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Size of one uniform slot
pub const SHADER_PROPERTY_SLOT_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i32),
    Int2([i32; 2]),
    Int3([i32; 3]),
    Int4([i32; 4]),
    Float(f32),
    Float2(Vec2),
    Float3(Vec3),
    Float4(Vec4),
    Bool(bool),
}

impl PropertyValue {
    /// Bytes this value takes in a uniform buffer
    pub const fn memory_size(&self) -> usize {
        SHADER_PROPERTY_SLOT_SIZE
    }

    /// Bytes of actual data before padding
    fn data_size(&self) -> usize {
        match self {
            PropertyValue::Int(_) | PropertyValue::Float(_) | PropertyValue::Bool(_) => 4,
            PropertyValue::Int2(_) | PropertyValue::Float2(_) => 8,
            PropertyValue::Int3(_) | PropertyValue::Float3(_) => 12,
            PropertyValue::Int4(_) | PropertyValue::Float4(_) => 16,
        }
    }

    pub fn shader_type_name(&self) -> &'static str {
        match self {
            PropertyValue::Int(_) => "int",
            PropertyValue::Int2(_) => "int2",
            PropertyValue::Int3(_) => "int3",
            PropertyValue::Int4(_) => "int4",
            PropertyValue::Float(_) => "float",
            PropertyValue::Float2(_) => "float2",
            PropertyValue::Float3(_) => "float3",
            PropertyValue::Float4(_) => "float4",
            // bools are 32 bit in uniform blocks
            PropertyValue::Bool(_) => "bool",
        }
    }

    /// True when both values have the same type
    pub fn same_type(&self, other: &PropertyValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Append this value's slot to `buffer`
    pub fn write_to_memory(&self, buffer: &mut Vec<u8>) {
        let start = buffer.len();
        match self {
            PropertyValue::Int(v) => buffer.extend_from_slice(&v.to_ne_bytes()),
            PropertyValue::Int2(v) => v.iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes())),
            PropertyValue::Int3(v) => v.iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes())),
            PropertyValue::Int4(v) => v.iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes())),
            PropertyValue::Float(v) => buffer.extend_from_slice(&v.to_ne_bytes()),
            PropertyValue::Float2(v) => {
                v.to_array().iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes()))
            }
            PropertyValue::Float3(v) => {
                v.to_array().iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes()))
            }
            PropertyValue::Float4(v) => {
                v.to_array().iter().for_each(|c| buffer.extend_from_slice(&c.to_ne_bytes()))
            }
            PropertyValue::Bool(v) => buffer.extend_from_slice(&u32::from(*v).to_ne_bytes()),
        }
        debug_assert_eq!(buffer.len() - start, self.data_size());
        buffer.resize(start + SHADER_PROPERTY_SLOT_SIZE, 0);
    }

    /// Append the member declaration (plus padding members) for `name`
    pub fn write_as_shader_code(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "\t{} {};", self.shader_type_name(), name);
        let padding = (SHADER_PROPERTY_SLOT_SIZE - self.data_size()) / 4;
        for i in 0..padding {
            let _ = writeln!(out, "\tuint {name}_padding_{i};");
        }
    }
}

/// Pack values into a uniform buffer, one slot each
pub fn write_uniform_block<'a>(values: impl IntoIterator<Item = &'a PropertyValue>) -> Vec<u8> {
    let mut buffer = Vec::new();
    for value in values {
        value.write_to_memory(&mut buffer);
    }
    buffer
}
