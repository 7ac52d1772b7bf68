use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_mesh_cache::resources::RangeAllocator;
use redlilium_mesh_cache::{
    AllocRequest, BufferUpdate, CacheParams, DummyDevice, FenceKind, MeshCache,
};

const MIB: u64 = 1024 * 1024;

fn bench_params() -> CacheParams {
    CacheParams::new()
        .with_mem_reserve(4 * MIB)
        .with_mem_granularity(MIB)
        .with_mem_limit(16 * MIB)
        .with_lru_tail_size(4 * MIB)
}

// ---------------------------------------------------------------------------
// Range allocator
// ---------------------------------------------------------------------------

fn bench_range_allocator_fill(c: &mut Criterion) {
    c.bench_function("range_allocator_fill_1024", |b| {
        b.iter(|| {
            let mut allocator = RangeAllocator::new(1024 * 256);
            for _ in 0..1024 {
                black_box(allocator.alloc(256));
            }
            black_box(&allocator);
        });
    });
}

fn bench_range_allocator_churn(c: &mut Criterion) {
    c.bench_function("range_allocator_churn_fragmented", |b| {
        b.iter_with_setup(
            || {
                let mut allocator = RangeAllocator::new(4 * MIB);
                let offsets: Vec<u64> = (0..2048).filter_map(|_| allocator.alloc(1024)).collect();
                // Free every other block to fragment the free list.
                for offset in offsets.iter().step_by(2) {
                    allocator.free(*offset, 1024);
                }
                allocator
            },
            |mut allocator| {
                for _ in 0..256 {
                    if let Some(offset) = allocator.alloc(512) {
                        black_box(allocator.free(offset, 512));
                    }
                }
                black_box(&allocator);
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Mesh cache
// ---------------------------------------------------------------------------

fn bench_cache_alloc_evict(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut cache = MeshCache::new(device, bench_params()).unwrap();
    let request = AllocRequest::new(2400, 100, 300);

    c.bench_function("mesh_cache_alloc_evict", |b| {
        b.iter(|| {
            let item = cache.alloc_cache_item(black_box(&request), false).unwrap();
            black_box(cache.evict(item).unwrap());
        });
    });
    cache.unlock_buffers().unwrap();
}

fn bench_cache_steady_frames(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut cache = MeshCache::new(device.clone(), bench_params()).unwrap();
    let request = AllocRequest::new(9600, 400, 1200);

    // Each frame uploads 64 new meshes and draws them; old frames age out
    // through the LRU tail and get evicted for the new ones.
    c.bench_function("mesh_cache_frame_64_uploads", |b| {
        b.iter(|| {
            let mut frame = Vec::with_capacity(64);
            for _ in 0..64 {
                if let Ok(item) = cache.alloc_cache_item(&request, false) {
                    frame.push(item);
                }
            }
            cache.unlock_buffers().unwrap();
            for item in &frame {
                cache.fence_item(*item, FenceKind::Vertex).unwrap();
            }
            device.complete_all_fences();
            cache.end_frame();
            black_box(cache.stats());
        });
    });
}

fn bench_cache_write_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_cache_lock_write_unlock");
    let vertices = vec![0.5f32; 600];
    let indices: Vec<u16> = (0..900).map(|i| i % 600).collect();

    for strategy in BufferUpdate::PRIORITY {
        let device = Arc::new(DummyDevice::new());
        let mut cache =
            MeshCache::new(device, bench_params().with_buffer_update(strategy)).unwrap();
        let item = cache
            .alloc_cache_item(&AllocRequest::new(2400, 200, 900), false)
            .unwrap();
        cache.unlock_buffers().unwrap();

        group.bench_function(format!("{strategy:?}"), |b| {
            b.iter(|| {
                let mut region = cache.lock_mesh_cache_item(item).unwrap();
                region.write_vertices(black_box(&vertices)).unwrap();
                region.write_indices(black_box(&indices)).unwrap();
                cache.unlock_buffers().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_range_allocator_fill,
    bench_range_allocator_churn,
    bench_cache_alloc_evict,
    bench_cache_steady_frames,
    bench_cache_write_strategies,
);
criterion_main!(benches);
