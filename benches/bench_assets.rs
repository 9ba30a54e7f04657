use custom_assets::assets::{InMemoryAssetLibrary, LeastRecentlyUsedCache, TextureData};
use custom_assets::gpu::NullBackend;
use custom_assets::{AssetId, CustomAssetLibrary, CustomResourceManager, ResourceManagerConfig, SessionId};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use std::sync::Arc;

fn bench_lru_put_pop(c: &mut Criterion) {
    c.bench_function("lru_put_with_pop", |b| {
        let mut cache = LeastRecentlyUsedCache::new();
        for _ in 0..4096 {
            cache.prepare();
        }
        let mut next = 0u64;

        b.iter(|| {
            // Keep 1024 entries resident, each put pops the oldest
            cache.put(SessionId::new(next % 4096), black_box(next));
            if cache.len() > 1024 {
                black_box(cache.pop());
            }
            next += 1;
        });
    });
}

fn bench_lru_touch(c: &mut Criterion) {
    let mut cache = LeastRecentlyUsedCache::new();
    for i in 0..1000u64 {
        cache.prepare();
        cache.put(SessionId::new(i), i);
    }

    c.bench_function("lru_touch_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let session = SessionId::new(black_box(i % 1000));
            if let Some(value) = cache.erase(session) {
                cache.put(session, value);
            }
            i += 7;
        });
    });
}

fn bench_resolved_texture_lookup(c: &mut Criterion) {
    let mut library = InMemoryAssetLibrary::default();
    for i in 0..256 {
        library.insert(format!("tex{i}"), TextureData::single_level(4, 4, vec![0; 64]));
    }
    let library: Arc<dyn CustomAssetLibrary> = Arc::new(library);
    let config = ResourceManagerConfig {
        loader_threads: 2,
        max_ram_override: Some(1 << 30),
        ..Default::default()
    };
    let mut manager = CustomResourceManager::new(config, Arc::new(NullBackend::new())).unwrap();
    let ids: Vec<AssetId> = (0..256).map(|i| AssetId::from(format!("tex{i}"))).collect();

    // Warm up until every texture resolves
    for _ in 0..1000 {
        let resolved = ids
            .iter()
            .filter(|id| manager.get_texture_data_from_asset(id, &library).is_some())
            .count();
        if resolved == ids.len() {
            break;
        }
        manager.on_xfb_triggered();
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    c.bench_function("resolved_texture_lookup", |b| {
        let mut i = 0;
        b.iter(|| {
            black_box(manager.get_texture_data_from_asset(&ids[i % ids.len()], &library));
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_lru_put_pop,
    bench_lru_touch,
    bench_resolved_texture_lookup
);
criterion_main!(benches);
