// tests/pipeline.rs
//! End-to-end pipeline tests: loader threads compile, the main thread
//! finalizes, the render thread initializes against a mock device, and the
//! submitter receives finished textures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use texbake::{
    ChannelKind, Color, CombinedTexturePool, CompileService, DeferredOperations, ImageData,
    ImageSource, MaterialDef, MaterialTextures, PipelineConfig, PropertySource, RenderDevice,
    Result, TextureCache, TextureCompiler, TextureDesc,
};

/// Counts creations and deletions; never touches a real GPU.
struct MockDevice {
    created: Mutex<Vec<(String, u64)>>,
    deleted: Mutex<Vec<u64>>,
    next: AtomicU64,
}

impl MockDevice {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            next: AtomicU64::new(1),
        })
    }

    fn live_count(&self) -> usize {
        self.created.lock().len() - self.deleted.lock().len()
    }
}

impl RenderDevice for MockDevice {
    fn create_texture(&self, desc: &TextureDesc, mips: &[&[u8]]) -> Result<u64> {
        assert_eq!(mips.len(), desc.mip_count as usize);
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.created.lock().push((desc.label.clone(), handle));
        Ok(handle)
    }

    fn delete_texture(&self, handle: u64) {
        self.deleted.lock().push(handle);
    }
}

struct Harness {
    ops: Arc<DeferredOperations>,
    device: Arc<MockDevice>,
    pool: CombinedTexturePool,
    service: CompileService,
    free_budget: usize,
}

impl Harness {
    fn new(compiler: TextureCompiler) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let ops = DeferredOperations::new();
        let free_budget = compiler.config().free_drain_budget;
        let threads = compiler.config().loader_threads;
        Self {
            ops: ops.clone(),
            device: MockDevice::new(),
            pool: CombinedTexturePool::new(),
            service: CompileService::new(Arc::new(compiler), ops, threads),
            free_budget,
        }
    }

    /// Submit and pump the frame loop until the result arrives.
    fn compile(&self, def: MaterialDef) -> Arc<MaterialTextures> {
        let result = self.service.submit(def);
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            // Main thread part of the frame.
            self.ops.process_async_res_init();
            self.ops.process_synchronize();
            // Render thread part of the frame.
            self.ops.process_init(self.device.as_ref(), &self.pool);
            self.ops.process_free(self.device.as_ref(), self.free_budget);

            match result.recv_timeout(Duration::from_millis(1)) {
                Ok(textures) => return textures,
                Err(_) if Instant::now() < deadline => continue,
                Err(err) => panic!("material never finished: {err}"),
            }
        }
    }
}

fn checker_image(path: &str, size: u32) -> Arc<ImageSource> {
    let mut data = Vec::with_capacity((size * size * 3) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = (x + y) % 2 == 0;
            data.extend_from_slice(if on { &[230, 230, 230] } else { &[25, 25, 25] });
        }
    }
    ImageSource::new(path, size, size, 1, 3, 8, 1234, ImageData::Bytes8(data)).unwrap()
}

#[test]
fn test_full_pipeline_delivers_textures() {
    let harness = Harness::new(TextureCompiler::new(PipelineConfig::default(), None));
    let def = MaterialDef::new("crate")
        .with_property(ChannelKind::Color, PropertySource::Image(checker_image("crate.png", 16)))
        .with_property(ChannelKind::Roughness, PropertySource::Value(0.8));

    let textures = harness.compile(def);
    assert_eq!(textures.name, "crate");
    assert_eq!(textures.texture_count(), 2);
    assert!(textures.texture(ChannelKind::Color).is_some());
    assert!(textures.texture(ChannelKind::Roughness).is_some());
    assert!(textures.texture(ChannelKind::Normal).is_none());
    assert!(textures.flags.solid);
}

#[test]
fn test_shared_image_deduplicates_gpu_texture() {
    let harness = Harness::new(TextureCompiler::new(PipelineConfig::default(), None));
    let image = checker_image("shared.png", 8);

    let first = harness.compile(
        MaterialDef::new("wall-a")
            .with_property(ChannelKind::Color, PropertySource::Image(image.clone())),
    );
    let second = harness.compile(
        MaterialDef::new("wall-b")
            .with_property(ChannelKind::Color, PropertySource::Image(image.clone())),
    );

    let a = first.texture(ChannelKind::Color).unwrap();
    let b = second.texture(ChannelKind::Color).unwrap();
    assert_eq!(a.handle(), b.handle(), "both materials must share the upload");
}

#[test]
fn test_uniform_channels_share_combined_texture() {
    let harness = Harness::new(TextureCompiler::new(PipelineConfig::default(), None));

    let first = harness.compile(
        MaterialDef::new("plastic-a")
            .with_property(ChannelKind::Roughness, PropertySource::Value(0.25)),
    );
    let second = harness.compile(
        MaterialDef::new("plastic-b")
            .with_property(ChannelKind::Roughness, PropertySource::Value(0.25)),
    );
    let third = harness.compile(
        MaterialDef::new("plastic-c")
            .with_property(ChannelKind::Roughness, PropertySource::Value(0.75)),
    );

    let a = first.texture(ChannelKind::Roughness).unwrap().handle();
    let b = second.texture(ChannelKind::Roughness).unwrap().handle();
    let c = third.texture(ChannelKind::Roughness).unwrap().handle();
    assert_eq!(a, b, "identical uniform colors share one texture");
    assert_ne!(a, c, "different uniform colors stay distinct");
    assert_eq!(harness.pool.len(), 2);
}

#[test]
fn test_cache_round_trip_across_compilers() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("texcache");
    let make_compiler = || {
        let cache = TextureCache::new(&cache_dir).unwrap();
        TextureCompiler::new(PipelineConfig::default(), Some(Arc::new(cache)))
    };
    let def = MaterialDef::new("brick").with_property(
        ChannelKind::Color,
        PropertySource::Image(checker_image("brick.png", 16)),
    );

    // First run populates the cache.
    let first = make_compiler().compile(&def).unwrap();
    let entries: Vec<_> = std::fs::read_dir(&cache_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    let bytes_before = std::fs::read(&entries[0]).unwrap();

    // A fresh compiler instance loads the same payload and leaves the entry
    // byte-identical.
    let second = make_compiler().compile(&def).unwrap();
    let bytes_after = std::fs::read(&entries[0]).unwrap();
    assert_eq!(bytes_before, bytes_after);

    let chain_a = first.channel(ChannelKind::Color).unwrap().mips().unwrap();
    let chain_b = second.channel(ChannelKind::Color).unwrap().mips().unwrap();
    for (a, b) in chain_a.levels().iter().zip(chain_b.levels()) {
        assert_eq!(a.data(), b.data());
    }
}

#[test]
fn test_dropping_materials_frees_gpu_objects_bounded() {
    let harness = Harness::new(TextureCompiler::new(PipelineConfig::default(), None));

    let mut results = Vec::new();
    for i in 0..8 {
        results.push(harness.compile(
            MaterialDef::new(format!("mat-{i}")).with_property(
                ChannelKind::Color,
                PropertySource::Image(checker_image(&format!("m{i}.png"), 8)),
            ),
        ));
    }
    let live = harness.device.live_count();
    assert_eq!(live, 8);

    results.clear();
    // All frees queued; a small budget drains them over several calls.
    let mut total = 0;
    let mut calls = 0;
    while total < 8 {
        let released = harness.ops.process_free(harness.device.as_ref(), 3);
        assert!(released <= 3);
        total += released;
        calls += 1;
        assert!(calls < 100, "free queue never drained");
    }
    assert_eq!(harness.device.live_count(), 0);
    assert!(calls >= 3, "budget must spread the drain over frames");
}

#[test]
fn test_transparent_material_flags_travel_to_gpu_result() {
    let harness = Harness::new(TextureCompiler::new(PipelineConfig::default(), None));
    let textures = harness.compile(
        MaterialDef::new("glass")
            .with_property(ChannelKind::Color, PropertySource::Color(Color::new(0.9, 0.9, 1.0, 1.0)))
            .with_property(ChannelKind::Transparency, PropertySource::Value(0.4)),
    );
    assert!(textures.flags.has_transparency);
    assert!(!textures.flags.solid);
}
