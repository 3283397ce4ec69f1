use criterion::{black_box, criterion_group, criterion_main, Criterion};
use resource_lifecycle::prelude::*;
use resource_lifecycle::resources::{FileIo, MemoryIo};
use std::sync::Arc;

fn manual_loader() -> (ResourceLoader, Arc<MemoryIo>) {
    let io = Arc::new(MemoryIo::new());
    let storage: Arc<dyn FileIo> = io.clone();
    let registry = Arc::new(TypeRegistry::init_all().unwrap());
    let loader = ResourceLoader::with_io(
        LoaderConfig::manual("bench"),
        registry,
        storage,
        HeadlessDevice::shared(),
    )
    .unwrap();
    (loader, io)
}

fn stage_textures(loader: &ResourceLoader, io: &MemoryIo, count: usize) -> Vec<Guid> {
    (0..count)
        .map(|i| {
            let guid = Guid::new();
            let payload = format!("texture_{i}.raw");
            let mut texture = Texture::new(guid);
            texture.set_desc(TextureDesc::new(64, 64, TextureFormat::Rgba8));
            texture.set_source(ResourceSource::file(payload.clone()));
            loader.save_metadata(&texture).unwrap();
            io.insert(payload, vec![0u8; 64 * 64 * 4]);
            guid
        })
        .collect()
}

fn bench_rc_clone(c: &mut Criterion) {
    let rc = RC::new([0u64; 8]);
    c.bench_function("rc_clone_drop", |b| {
        b.iter(|| black_box(rc.clone()));
    });
}

fn bench_weak_lock(c: &mut Criterion) {
    let rc = RC::new([0u64; 8]);
    let weak = RC::downgrade(&rc);
    c.bench_function("rc_weak_lock", |b| {
        b.iter(|| black_box(weak.lock()));
    });
}

fn bench_directory_lookup(c: &mut Criterion) {
    let (loader, io) = manual_loader();
    let guids = stage_textures(&loader, &io, 100);
    let live: Vec<_> = guids
        .iter()
        .map(|guid| loader.load_resource(*guid, false).unwrap())
        .collect();

    c.bench_function("directory_lookup_100", |b| {
        b.iter(|| {
            for guid in &guids {
                black_box(loader.load_resource(*guid, false));
            }
        })
    });
    drop(live);
}

fn bench_load_100_textures(c: &mut Criterion) {
    c.bench_function("load_100_textures", |b| {
        b.iter(|| {
            let (loader, io) = manual_loader();
            let guids = stage_textures(&loader, &io, 100);
            let handles: Vec<_> = guids
                .iter()
                .filter_map(|guid| loader.load_resource(*guid, true))
                .collect();
            loader.run_until_idle();
            black_box(handles);
        })
    });
}

criterion_group!(
    benches,
    bench_rc_clone,
    bench_weak_lock,
    bench_directory_lookup,
    bench_load_100_textures
);
criterion_main!(benches);
