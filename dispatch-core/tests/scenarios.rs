use dispatch_core::accumulator::{OutputSignature, VarShape};
use dispatch_core::backend::{BlendFactor, BlendParams};
use dispatch_core::dispatch::{dispatch_compute, dispatch_finish};
use dispatch_core::mock::{MockBackend, MockTexture, MockTextureInfo};
use dispatch_core::{AccumulatorPool, DispatchConfig, DispatchRoot};

fn f32x4(v: [f32; 4]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn build_tint_shader(
    pool: &mut AccumulatorPool<MockBackend>,
    tint: [f32; 4],
) -> dispatch_core::ShaderAccumulator<MockBackend> {
    let mut acc = pool.begin(false);
    acc.set_output(OutputSignature::Color);
    acc.add_variable("tint", VarShape::Vec4, false, &f32x4(tint));
    acc.push_main("vec4 fragment_main(vec2 uv) { return tint; }\n");
    acc
}

#[test]
fn cache_hit_across_frames() {
    let mut root = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    let mut pool = AccumulatorPool::new();
    let target = MockTexture(1);

    let mut acc1 = build_tint_shader(&mut pool, [0.5, 0.6, 0.7, 1.0]);
    dispatch_finish(&mut root, &mut acc1, target, None, None).unwrap();
    pool.recycle(acc1);

    root.advance_frame();
    pool.reset_frame();

    let mut acc2 = build_tint_shader(&mut pool, [0.1, 0.2, 0.3, 1.0]);
    dispatch_finish(&mut root, &mut acc2, target, None, None).unwrap();
    pool.recycle(acc2);

    assert_eq!(root.backend().pass_create_calls, 1, "structurally identical shader must reuse the compiled pass");
    assert_eq!(root.backend().pass_run_calls, 2);
    assert_eq!(root.record_count(), 1);
}

fn build_unique_shader(pool: &mut AccumulatorPool<MockBackend>, tag: u32) -> dispatch_core::ShaderAccumulator<MockBackend> {
    let mut acc = pool.begin(false);
    acc.set_output(OutputSignature::Color);
    acc.push_main(&format!("vec4 fragment_main(vec2 uv) {{ return vec4({}.0); }}\n", tag));
    acc
}

#[test]
fn eviction_doubles_capacity_when_nothing_is_evictable() {
    let mut config = DispatchConfig::default();
    config.max_passes = 4;
    config.min_age = 10;
    let mut root = DispatchRoot::new(MockBackend::new(), config);
    let mut pool = AccumulatorPool::new();
    let target = MockTexture(1);

    for i in 0..5 {
        let mut acc = build_unique_shader(&mut pool, i);
        dispatch_finish(&mut root, &mut acc, target, None, None).unwrap();
        pool.recycle(acc);
    }

    assert_eq!(root.record_count(), 5, "nothing should be evicted when every record is too young");
    assert_eq!(root.capacity(), 8, "capacity should double once when no record clears the min age");
}

#[test]
fn eviction_proper_evicts_the_oldest_past_the_age_floor() {
    let mut config = DispatchConfig::default();
    config.max_passes = 4;
    config.min_age = 10;
    let mut root = DispatchRoot::new(MockBackend::new(), config);
    let mut pool = AccumulatorPool::new();
    let target = MockTexture(1);

    for i in 0..4 {
        let mut acc = build_unique_shader(&mut pool, i);
        dispatch_finish(&mut root, &mut acc, target, None, None).unwrap();
        pool.recycle(acc);
    }
    assert_eq!(root.record_count(), 4);

    for _ in 0..20 {
        root.advance_frame();
    }

    let mut acc = build_unique_shader(&mut pool, 99);
    dispatch_finish(&mut root, &mut acc, target, None, None).unwrap();
    pool.recycle(acc);

    assert_eq!(root.record_count(), 3, "two of the four stale records should be evicted, leaving the new one and one survivor");
    assert_eq!(root.capacity(), 4, "capacity should not grow when eviction actually reclaims records");
}

#[test]
fn compute_as_raster_blend_emulation() {
    let mut root = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    let mut pool = AccumulatorPool::new();

    let target = root.backend_mut().create_texture(MockTextureInfo {
        renderable: false,
        storable: true,
        width: 64,
        height: 64,
        format_tag: 1,
    });

    let mut acc = build_tint_shader(&mut pool, [1.0, 0.0, 0.0, 0.5]);
    let blend = BlendParams { src: BlendFactor::One, dst: BlendFactor::OneMinusSrcAlpha };
    dispatch_finish(&mut root, &mut acc, target, None, Some(blend)).unwrap();

    assert!(acc.is_failed() == false);
    let source = root.backend().last_source.clone().unwrap();
    assert!(source.contains("imageLoad"), "blended compute-as-raster emulation must load the existing target pixel");
    assert!(source.contains("imageStore"));
    pool.recycle(acc);
}

#[test]
fn corrupt_persisted_cache_is_rejected() {
    let mut root = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    let bad_magic = b"PLDX\x01\x00\x00\x00\x00\x00\x00\x00".to_vec();
    dispatch_core::binary_cache::load(&mut root, &bad_magic);
    assert_eq!(root.record_count(), 0);

    let mut bad_version = b"PLDP".to_vec();
    bad_version.extend_from_slice(&2u32.to_le_bytes());
    bad_version.extend_from_slice(&0u32.to_le_bytes());
    dispatch_core::binary_cache::load(&mut root, &bad_version);
    assert_eq!(root.record_count(), 0);
}

#[test]
fn persisted_cache_is_consumed_on_matching_dispatch() {
    let mut root = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    let mut pool = AccumulatorPool::new();
    let target = MockTexture(1);

    let mut acc = build_tint_shader(&mut pool, [0.2, 0.4, 0.6, 1.0]);
    dispatch_finish(&mut root, &mut acc, target, None, None).unwrap();
    pool.recycle(acc);

    let mut buf = Vec::new();
    dispatch_core::binary_cache::save(&root, &mut buf).unwrap();

    let mut root2 = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    dispatch_core::binary_cache::load(&mut root2, &buf);
    assert_eq!(root2.record_count(), 0, "load must not eagerly compile anything");

    let mut acc2 = build_tint_shader(&mut pool, [0.2, 0.4, 0.6, 1.0]);
    dispatch_finish(&mut root2, &mut acc2, target, None, None).unwrap();
    pool.recycle(acc2);

    assert_eq!(root2.backend().pass_create_calls, 1);
    assert_eq!(root2.backend().last_create_had_cached_program, Some(true));
}

#[test]
fn pure_compute_dispatch_does_not_require_a_target() {
    let mut root = DispatchRoot::new(MockBackend::new(), DispatchConfig::default());
    let mut pool = AccumulatorPool::new();

    let mut acc = pool.begin(false);
    acc.set_output(OutputSignature::None);
    acc.set_compute((8, 8, 1));
    acc.push_main("void compute_main() { }\n");

    dispatch_compute(&mut root, &mut acc, (64, 64, 1)).unwrap();
    assert_eq!(root.backend().pass_run_calls, 1);
    pool.recycle(acc);
}

