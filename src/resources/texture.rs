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

use crate::assets::{RenderTargetData, TextureData};
use crate::gpu::AbstractTexture;
use std::sync::Arc;
use std::time::SystemTime;

/// Loaded texture payload and the write time it was loaded from
#[derive(Clone, Debug)]
pub struct TextureTimePair {
    pub data: Arc<TextureData>,
    pub time: SystemTime,
}

pub(crate) struct InternalTextureResource {
    pub pair: TextureTimePair,
}

/// Render target allocation backing a custom asset
#[derive(Clone, Debug)]
pub struct RenderTargetResource {
    pub data: Arc<RenderTargetData>,
    pub texture: Arc<dyn AbstractTexture>,
}
