use custom_assets::assets::{
    InMemoryAssetLibrary, MeshChunkData, MeshData, RenderTargetData, TextureData,
};
use custom_assets::gpu::{
    AbstractTexture, ComponentFormat, NullBackend, PrimitiveType, SamplerState, TextureFormat, VertexAttribute,
    VertexComponent, VertexDeclaration,
};
use custom_assets::{
    AssetId, CustomAssetLibrary, CustomResourceManager, LoadType, ResourceManagerConfig, SessionId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn config(max_ram: u64) -> ResourceManagerConfig {
    ResourceManagerConfig {
        loader_threads: 2,
        shader_compiler_threads: 0,
        max_ram_override: Some(max_ram),
        ..Default::default()
    }
}

/// Run frames until `f` yields something
fn pump<T>(
    manager: &mut CustomResourceManager,
    mut f: impl FnMut(&mut CustomResourceManager) -> Option<T>,
) -> Option<T> {
    for _ in 0..1000 {
        if let Some(value) = f(manager) {
            return Some(value);
        }
        manager.on_xfb_triggered();
        manager.on_frame_end();
        std::thread::sleep(Duration::from_millis(2));
    }
    None
}

fn shared(library: &Arc<InMemoryAssetLibrary>) -> Arc<dyn CustomAssetLibrary> {
    library.clone()
}

#[test]
fn test_texture_round_trip() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(4, 8, vec![7; 128]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    let id = AssetId::from("tex");
    assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_none());

    let pair = pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library))
        .expect("texture never loaded");
    assert_eq!(pair.data.slices[0].levels[0].data, vec![7; 128]);
    assert_eq!(manager.ram_used(), 128);
    assert_eq!(manager.asset_load_state(&id), Some(LoadType::LoadFinalyzed));
    assert_eq!(library.load_count(&id), 1);

    let stats = manager.stats();
    assert_eq!(stats.loaded_assets, 1);
    assert_eq!(stats.pending_assets, 0);
    assert_eq!(stats.loads_applied, 1);
}

#[test]
fn test_one_session_per_asset() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![0; 16]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    let id = AssetId::from("tex");
    for _ in 0..5 {
        manager.get_texture_data_from_asset(&id, &dyn_library);
    }
    pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();
    for _ in 0..5 {
        assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_some());
        manager.on_xfb_triggered();
    }

    assert_eq!(manager.session_id(&id), Some(SessionId::new(0)));
    assert_eq!(manager.stats().total_sessions, 1);
    assert_eq!(library.load_count(&id), 1);
}

#[test]
fn test_reload_request_refreshes_data() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![1; 16]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();
    let id = AssetId::from("tex");

    let first = pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();

    library.insert("tex", TextureData::single_level(2, 2, vec![2; 16]));
    let handle = manager.reload_handle();
    std::thread::spawn(move || handle.reload_asset("tex")).join().unwrap();
    manager.on_xfb_triggered();
    assert_eq!(manager.asset_load_state(&id), Some(LoadType::PendingReload));
    assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_none());

    let second = pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();
    assert_eq!(second.data.slices[0].levels[0].data, vec![2; 16]);
    assert!(second.time > first.time);
    assert_eq!(manager.ram_used(), 16);
    assert_eq!(manager.stats().reloads, 1);
}

#[test]
fn test_stale_assets_reload_themselves() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![0; 16]));
    let dyn_library = shared(&library);
    let config = ResourceManagerConfig {
        check_stale_assets: true,
        ..config(1 << 20)
    };
    let mut manager = CustomResourceManager::new(config, Arc::new(NullBackend::new())).unwrap();
    let id = AssetId::from("tex");

    pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();
    manager.on_xfb_triggered();
    assert_eq!(manager.stats().reloads, 0);

    library.touch(&id);
    manager.on_xfb_triggered();
    assert_eq!(manager.stats().reloads, 1);

    pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();
    assert_eq!(library.load_count(&id), 2);
}

#[test]
fn test_eviction_keeps_usage_under_budget() {
    let budget = 4000u64;
    let library = Arc::new(InMemoryAssetLibrary::new());
    for i in 0..32 {
        library.insert(format!("tex{i}"), TextureData::single_level(16, 4, vec![0; 256]));
    }
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(budget), Arc::new(NullBackend::new())).unwrap();

    for _ in 0..200 {
        for i in 0..32 {
            manager.get_texture_data_from_asset(&AssetId::from(format!("tex{i}")), &dyn_library);
        }
        manager.on_xfb_triggered();
        manager.on_frame_end();
        std::thread::sleep(Duration::from_millis(1));
    }

    // Loads in flight when the budget is reached overshoot it until the next frame.
    manager.on_xfb_triggered();
    let stats = manager.stats();
    assert!(stats.evictions > 0);
    assert!(stats.ram_used <= budget + 4 * 256);
    assert!(stats.loaded_assets > 0);
}

#[test]
fn test_evicted_asset_reloads_on_demand() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("a", TextureData::single_level(16, 16, vec![0; 1024]));
    library.insert("b", TextureData::single_level(16, 16, vec![0; 1024]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1500), Arc::new(NullBackend::new())).unwrap();

    let a = AssetId::from("a");
    let b = AssetId::from("b");
    pump(&mut manager, |m| m.get_texture_data_from_asset(&a, &dyn_library)).unwrap();
    pump(&mut manager, |m| m.get_texture_data_from_asset(&b, &dyn_library)).unwrap();

    // Both resident puts usage over budget, "a" is the oldest.
    manager.on_xfb_triggered();
    assert_eq!(manager.asset_load_state(&a), Some(LoadType::Unloaded));
    assert_eq!(manager.ram_used(), 1024);

    pump(&mut manager, |m| m.get_texture_data_from_asset(&a, &dyn_library)).unwrap();
    assert_eq!(library.load_count(&a), 2);
}

#[test]
fn test_reset_starts_cold() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![0; 16]));
    library.insert("other", TextureData::single_level(2, 2, vec![0; 16]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    let other = AssetId::from("other");
    let tex = AssetId::from("tex");
    pump(&mut manager, |m| m.get_texture_data_from_asset(&other, &dyn_library)).unwrap();
    pump(&mut manager, |m| m.get_texture_data_from_asset(&tex, &dyn_library)).unwrap();
    assert_eq!(manager.session_id(&tex), Some(SessionId::new(1)));

    manager.reset(true).unwrap();
    let stats = manager.stats();
    assert_eq!(stats.ram_used, 0);
    assert_eq!(stats.total_sessions, 0);
    assert_eq!(stats.loaded_assets, 0);
    assert_eq!(manager.asset_load_state(&tex), None);

    pump(&mut manager, |m| m.get_texture_data_from_asset(&tex, &dyn_library)).unwrap();
    assert_eq!(manager.session_id(&tex), Some(SessionId::new(0)));
    assert_eq!(manager.ram_used(), 16);
}

#[test]
fn test_reset_without_restart_stops_loading() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![0; 16]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    manager.reset(false).unwrap();
    let id = AssetId::from("tex");
    for _ in 0..20 {
        assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_none());
        manager.on_xfb_triggered();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(library.load_count(&id), 0);
}

#[test]
fn test_missing_asset_never_resolves() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    let id = AssetId::from("ghost");
    for _ in 0..20 {
        assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_none());
        manager.on_xfb_triggered();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(manager.asset_load_state(&id), Some(LoadType::PendingReload));
    assert_eq!(manager.ram_used(), 0);
}

#[test]
fn test_render_target_allocation() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert(
        "rt",
        RenderTargetData {
            width: 320,
            height: 240,
            format: TextureFormat::Rgba8,
            sampler: SamplerState::default(),
        },
    );
    let dyn_library = shared(&library);
    let backend = Arc::new(NullBackend::new());
    let mut manager = CustomResourceManager::new(config(1 << 20), backend.clone()).unwrap();

    let id = AssetId::from("rt");
    let target = pump(&mut manager, |m| m.get_render_target_from_asset(&id, &dyn_library)).unwrap();
    assert_eq!(target.texture.config().width, 320);
    assert_eq!(target.texture.config().height, 240);

    let again = manager.get_render_target_from_asset(&id, &dyn_library).unwrap();
    assert!(Arc::ptr_eq(&target, &again));
    assert_eq!(backend.stats().textures, 1);
}

#[test]
fn test_mesh_chunks_share_vertex_formats() {
    let declaration = VertexDeclaration {
        stride: 12,
        components: vec![VertexComponent {
            attribute: VertexAttribute::Position,
            format: ComponentFormat::Float3,
            offset: 0,
        }],
    };
    let chunk = MeshChunkData {
        vertex_data: vec![0; 36],
        indices: vec![0, 1, 2],
        vertex_declaration: declaration,
        primitive: PrimitiveType::Triangles,
        material_name: "body".into(),
    };
    let mut material_assets = BTreeMap::new();
    material_assets.insert("body".to_string(), AssetId::from("body_material"));

    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert(
        "mesh",
        MeshData {
            chunks: vec![chunk.clone(), chunk],
            material_assets,
        },
    );
    let dyn_library = shared(&library);
    let backend = Arc::new(NullBackend::new());
    let mut manager = CustomResourceManager::new(config(1 << 20), backend.clone()).unwrap();

    let id = AssetId::from("mesh");
    let mesh = pump(&mut manager, |m| m.get_mesh_from_asset(&id, &dyn_library)).unwrap();
    assert_eq!(mesh.chunks.len(), 2);
    assert_eq!(mesh.chunks[1].vertex_count, 3);
    assert_eq!(mesh.chunks[1].index_count, 3);
    assert_eq!(mesh.chunks[0].material, Some(AssetId::from("body_material")));
    assert!(Arc::ptr_eq(&mesh.chunks[0].vertex_format, &mesh.chunks[1].vertex_format));
    assert_eq!(backend.stats().vertex_formats, 1);

    // The chunk material was armed even though it does not exist.
    assert_eq!(
        manager.asset_load_state(&AssetId::from("body_material")),
        Some(LoadType::PendingReload)
    );
}

#[test]
fn test_wrong_type_lookup_returns_none() {
    let library = Arc::new(InMemoryAssetLibrary::new());
    library.insert("tex", TextureData::single_level(2, 2, vec![0; 16]));
    let dyn_library = shared(&library);
    let mut manager = CustomResourceManager::new(config(1 << 20), Arc::new(NullBackend::new())).unwrap();

    let id = AssetId::from("tex");
    pump(&mut manager, |m| m.get_texture_data_from_asset(&id, &dyn_library)).unwrap();
    assert!(manager.get_mesh_from_asset(&id, &dyn_library).is_none());
    assert!(manager.get_texture_data_from_asset(&id, &dyn_library).is_some());
}
