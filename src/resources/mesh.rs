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

use crate::assets::{AssetId, MeshData};
use crate::gpu::{NativeVertexFormat, PrimitiveType};
use std::sync::Arc;

/// One draw of a custom mesh
#[derive(Clone, Debug)]
pub struct MeshChunkResource {
    /// Index into [`MeshData::chunks`]
    pub chunk_index: usize,
    pub vertex_format: Arc<dyn NativeVertexFormat>,
    pub primitive: PrimitiveType,
    pub vertex_count: usize,
    pub index_count: usize,
    /// Raster material drawn with this chunk, resolved per draw
    pub material: Option<AssetId>,
}

#[derive(Clone, Debug)]
pub struct MeshResource {
    pub data: Arc<MeshData>,
    pub chunks: Vec<MeshChunkResource>,
}

impl MeshResource {
    pub fn chunk_data(&self, chunk: &MeshChunkResource) -> Option<&crate::assets::MeshChunkData> {
        self.data.chunks.get(chunk.chunk_index)
    }
}
