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

#[cfg(feature = "profiling")]
use custom_assets::prelude::*;
#[cfg(feature = "profiling")]
use std::sync::Arc;
#[cfg(feature = "profiling")]
use std::time::{Duration, Instant};

#[cfg(feature = "profiling")]
const TEXTURES: usize = 2_000;
#[cfg(feature = "profiling")]
const TEXTURE_BYTES: usize = 16 * 1024;

#[cfg(feature = "profiling")]
fn build_library() -> Arc<dyn CustomAssetLibrary> {
    let library = InMemoryAssetLibrary::default();
    for i in 0..TEXTURES {
        library.insert(
            format!("texture/{i}"),
            TextureData::single_level(64, 64, vec![(i % 251) as u8; TEXTURE_BYTES]),
        );
    }
    Arc::new(library)
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(manager, library))]
fn profile_streaming(
    manager: &mut CustomResourceManager,
    library: &Arc<dyn CustomAssetLibrary>,
    frames: usize,
) {
    for frame in 0..frames {
        let _span = tracing::info_span!("frame", frame).entered();
        // Sliding window of requested textures forces steady eviction.
        let start = (frame * 17) % TEXTURES;
        for i in start..(start + 64).min(TEXTURES) {
            let id = AssetId::from(format!("texture/{i}"));
            let _ = manager.get_texture_data_from_asset(&id, library);
        }
        manager.on_xfb_triggered();
        manager.on_frame_end();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(feature = "profiling")]
fn main() -> custom_assets::Result<()> {
    let _guard = custom_assets::profiling::init_json_trace("trace.json")?;

    let config = ResourceManagerConfig {
        loader_threads: 4,
        // Room for roughly a quarter of the library.
        max_ram_override: Some((TEXTURES * TEXTURE_BYTES / 4) as u64),
        ..Default::default()
    };
    let mut manager = CustomResourceManager::new(config, Arc::new(NullBackend::new()))?;
    let library = build_library();

    println!("Streaming {TEXTURES} textures...");
    let start = Instant::now();
    profile_streaming(&mut manager, &library, 500);
    let stats = manager.stats();
    println!(
        "500 frames in {:?}: {} loads, {} evictions, hit ratio {:.2}",
        start.elapsed(),
        stats.loads_applied,
        stats.evictions,
        stats.cache_hit_ratio()
    );
    manager.shutdown();
    Ok(())
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_assets binary requires --features profiling");
}
