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

//! Error types

use std::fmt;

use crate::assets::{AssetId, AssetType};

/// Asset system error type
#[derive(Debug, Clone)]
pub enum AssetError {
    /// Library has no asset with this id
    AssetNotFound(AssetId),

    /// Library failed to produce the asset payload
    AssetLoadError(String),

    /// Asset id was requested as a different type than it was registered with
    AssetTypeMismatch {
        asset_id: AssetId,
        expected: AssetType,
        found: AssetType,
    },

    /// Payload loaded but failed validation
    InvalidAssetData(String),

    /// Configuration could not be parsed
    ConfigError(String),

    /// A worker thread could not be started
    WorkerSpawnError(String),

    /// IO error (file operations, etc.)
    IoError(String),
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::AssetNotFound(id) => write!(f, "Asset not found: {id}"),
            AssetError::AssetLoadError(msg) => write!(f, "Asset load error: {msg}"),
            AssetError::AssetTypeMismatch {
                asset_id,
                expected,
                found,
            } => write!(
                f,
                "Asset '{asset_id}' requested as {expected:?} but is a {found:?}"
            ),
            AssetError::InvalidAssetData(msg) => write!(f, "Invalid asset data: {msg}"),
            AssetError::ConfigError(msg) => write!(f, "Config error: {msg}"),
            AssetError::WorkerSpawnError(msg) => write!(f, "Failed to spawn worker: {msg}"),
            AssetError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for AssetError {}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::ConfigError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AssetError>;
