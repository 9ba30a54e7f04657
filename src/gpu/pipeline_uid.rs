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

//! Structural pipeline identity

use crate::config::BackendCapabilities;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Points,
    Lines,
    #[default]
    Triangles,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareMode {
    Never,
    Less,
    Equal,
    #[default]
    LEqual,
    Greater,
    NEqual,
    GEqual,
    Always,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcClr,
    InvSrcClr,
    SrcAlpha,
    InvSrcAlpha,
    DstClr,
    InvDstClr,
    DstAlpha,
    InvDstAlpha,
}

/// Sixteen raster logic operations in hardware order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    #[default]
    Copy,
    AndInverted,
    NoOp,
    Xor,
    Or,
    Nor,
    Equiv,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthState {
    pub test_enable: bool,
    pub update_enable: bool,
    pub func: CompareMode,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enable: true,
            update_enable: true,
            func: CompareMode::LEqual,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendingState {
    pub blend_enable: bool,
    pub logic_op_enable: bool,
    pub logic_mode: LogicOp,
    pub subtract: bool,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub use_dual_src: bool,
    pub color_update: bool,
    pub alpha_update: bool,
}

impl Default for BlendingState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            logic_op_enable: false,
            logic_mode: LogicOp::Copy,
            subtract: false,
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            use_dual_src: false,
            color_update: true,
            alpha_update: true,
        }
    }
}

impl BlendingState {
    /// Replace the logic op with the closest fixed-function blend
    pub fn approximate_logic_op_with_blending(&mut self) {
        use BlendFactor::*;
        // (blend_enable, subtract, src, dst)
        let (enable, subtract, src, dst) = match self.logic_mode {
            LogicOp::Clear | LogicOp::And | LogicOp::Copy | LogicOp::Set => {
                (false, false, One, Zero)
            }
            LogicOp::AndReverse => (true, true, One, InvSrcClr),
            LogicOp::AndInverted => (true, true, DstClr, One),
            LogicOp::NoOp => (true, false, Zero, One),
            LogicOp::Xor | LogicOp::Nand => (true, false, InvDstClr, InvSrcClr),
            LogicOp::Or => (true, false, InvDstClr, One),
            LogicOp::Nor => (true, false, InvSrcClr, InvDstClr),
            LogicOp::Equiv => (true, false, InvSrcClr, Zero),
            LogicOp::Invert => (true, false, InvDstClr, InvDstClr),
            LogicOp::OrReverse => (true, false, One, InvDstAlpha),
            LogicOp::CopyInverted => (true, false, InvSrcClr, InvSrcClr),
            LogicOp::OrInverted => (true, false, InvSrcClr, One),
        };
        self.logic_op_enable = false;
        self.blend_enable = enable;
        self.subtract = subtract;
        self.src_factor = src;
        self.dst_factor = dst;
    }
}

/// Structural identity of a pipeline as produced by the emulated draw state.
///
/// Shader members are structural hashes of the generated shaders, custom
/// shader identity is layered on top by the shader cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineUid {
    pub vertex_format: u64,
    pub vertex_shader: u64,
    pub pixel_shader: u64,
    pub primitive: PrimitiveType,
    pub rasterization: RasterizationState,
    pub depth: DepthState,
    pub blending: BlendingState,
    pub early_depth: bool,
}

impl PipelineUid {
    /// Copy of this uid with host driver and backend limitations applied
    pub fn with_backend_workarounds(&self, caps: &BackendCapabilities) -> PipelineUid {
        let mut uid = *self;
        if uid.early_depth && !caps.early_z {
            uid.early_depth = false;
        }
        if uid.blending.logic_op_enable && !caps.logic_op {
            uid.blending.approximate_logic_op_with_blending();
        }
        if uid.blending.use_dual_src && !caps.dual_source_blend {
            uid.blending.use_dual_src = false;
        }
        uid
    }

    /// Points and lines are expanded to quads when the host cannot draw them wide
    pub fn needs_geometry_shader(&self, caps: &BackendCapabilities) -> bool {
        matches!(self.primitive, PrimitiveType::Points | PrimitiveType::Lines)
            && !caps.native_wide_primitives
            && caps.geometry_shaders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited_caps() -> BackendCapabilities {
        BackendCapabilities {
            early_z: false,
            logic_op: false,
            dual_source_blend: false,
            native_wide_primitives: false,
            geometry_shaders: true,
        }
    }

    #[test]
    fn test_workarounds_do_not_touch_original() {
        let mut uid = PipelineUid {
            early_depth: true,
            ..Default::default()
        };
        uid.blending.logic_op_enable = true;
        uid.blending.logic_mode = LogicOp::Xor;
        uid.blending.use_dual_src = true;
        let original = uid;

        let adjusted = uid.with_backend_workarounds(&limited_caps());
        assert_eq!(uid, original);
        assert!(!adjusted.early_depth);
        assert!(!adjusted.blending.logic_op_enable);
        assert!(adjusted.blending.blend_enable);
        assert_eq!(adjusted.blending.src_factor, BlendFactor::InvDstClr);
        assert!(!adjusted.blending.use_dual_src);
    }

    #[test]
    fn test_full_caps_keep_uid() {
        let mut uid = PipelineUid {
            early_depth: true,
            ..Default::default()
        };
        uid.blending.logic_op_enable = true;
        assert_eq!(uid.with_backend_workarounds(&BackendCapabilities::default()), uid);
    }

    #[test]
    fn test_geometry_shader_only_for_wide_primitives() {
        let caps = BackendCapabilities::default();
        let mut uid = PipelineUid::default();
        assert!(!uid.needs_geometry_shader(&caps));

        uid.primitive = PrimitiveType::Lines;
        assert!(uid.needs_geometry_shader(&caps));

        let native = BackendCapabilities {
            native_wide_primitives: true,
            ..caps
        };
        assert!(!uid.needs_geometry_shader(&native));
    }
}
