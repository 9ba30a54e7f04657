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

//! Per-session bookkeeping of the resource manager

use crate::assets::{AssetId, AssetType, CustomAsset, SessionId};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Load state of one asset.
///
/// ```text
/// PendingReload --load succeeds--> LoadFinished --observed--> LoadFinalyzed
/// LoadFinalyzed --dependency changed--> DependenciesChanged --re-checked--> LoadFinalyzed
/// any --evicted--> Unloaded --referenced again--> PendingReload
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadType {
    PendingReload,
    LoadFinished,
    LoadFinalyzed,
    DependenciesChanged,
    Unloaded,
}

impl LoadType {
    /// Payload is resident
    pub fn is_loaded(self) -> bool {
        matches!(
            self,
            LoadType::LoadFinished | LoadType::LoadFinalyzed | LoadType::DependenciesChanged
        )
    }
}

pub struct AssetData {
    pub asset_id: AssetId,
    /// None until first referenced and again after eviction
    pub asset: Option<Arc<dyn CustomAsset>>,
    pub load_type: LoadType,
    pub asset_type: AssetType,
    /// Set by this asset's own validation or inherited from a dependency
    pub has_errors: bool,
    /// This asset's own payload failed validation
    pub own_errors: bool,
    /// Sessions whose finalized state depends on this one
    pub asset_owners: BTreeSet<SessionId>,
    /// Sessions this one was last finalized from
    pub asset_dependencies: BTreeSet<SessionId>,
}

impl AssetData {
    pub fn new(asset_id: AssetId, asset_type: AssetType) -> Self {
        Self {
            asset_id,
            asset: None,
            load_type: LoadType::Unloaded,
            asset_type,
            has_errors: false,
            own_errors: false,
            asset_owners: BTreeSet::new(),
            asset_dependencies: BTreeSet::new(),
        }
    }

    pub fn clear_errors(&mut self) {
        self.has_errors = false;
        self.own_errors = false;
    }
}

/// Cloneable handle for requesting reloads from any thread.
///
/// Requests are applied at the next frame boundary.
#[derive(Clone, Default)]
pub struct AssetReloadHandle {
    requests: Arc<Mutex<AHashSet<AssetId>>>,
}

impl AssetReloadHandle {
    pub fn reload_asset(&self, asset_id: impl Into<AssetId>) {
        self.requests.lock().insert(asset_id.into());
    }

    /// Requests waiting for the next frame boundary
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn take_requests(&self) -> Vec<AssetId> {
        self.requests.lock().drain().collect()
    }

    pub(crate) fn clear(&self) {
        self.requests.lock().clear();
    }
}
