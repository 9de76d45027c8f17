use super::*;

use std::sync::Mutex;
use std::thread;

use nebula_mesh::{
    BlockGeometry, CubeModelGeometry, FaceDirection, FluidVolumeGeometry, MeshBuilder,
    RegionSnapshot, StaticBlockEntityRenderers, TransparencyLayers,
};
use nebula_voxel::{BlockDef, BlockRegistry, BlockStateId, Fluid, Transparency, VoxelWorld};

use crate::gpu::{BufferId, MemoryBackend};

type TestDispatcher = SectionRenderDispatcher<MemoryBackend>;

struct Blocks {
    stone: BlockStateId,
    glass: BlockStateId,
    water: BlockStateId,
    bomb: BlockStateId,
}

fn world() -> (Arc<VoxelWorld>, Blocks) {
    let mut registry = BlockRegistry::new();
    let stone = registry.register(BlockDef::cube("stone", Transparency::Opaque, 1)).unwrap();
    let glass = registry
        .register(BlockDef::cube("glass", Transparency::Translucent, 2))
        .unwrap();
    let water = registry.register(BlockDef::fluid("water", Fluid::Water, 3)).unwrap();
    let bomb = registry.register(BlockDef::cube("bomb", Transparency::Opaque, 99)).unwrap();
    let blocks = Blocks {
        stone,
        glass,
        water,
        bomb,
    };
    (Arc::new(VoxelWorld::new(Arc::new(registry))), blocks)
}

/// Cube geometry that can stall, panic on material 99, and records how many
/// compiles are inside it at once.
#[derive(Default)]
struct SlowGeometry {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl BlockGeometry for SlowGeometry {
    fn emit_block(
        &self,
        state: BlockStateId,
        def: &BlockDef,
        pos: IVec3,
        region: &RegionSnapshot,
        out: &mut MeshBuilder,
    ) -> Result<(), CompileError> {
        if def.material_index == 99 {
            panic!("bomb block at {pos}");
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        CubeModelGeometry.emit_block(state, def, pos, region, out)
    }
}

fn slow_compiler(geometry: &Arc<SlowGeometry>) -> SectionCompiler {
    SectionCompiler::new(
        Arc::new(TransparencyLayers),
        Arc::clone(geometry) as Arc<dyn BlockGeometry>,
        Arc::new(FluidVolumeGeometry),
        Arc::new(StaticBlockEntityRenderers::new()),
    )
}

fn config(workers: usize, pool: usize) -> DispatcherConfig {
    DispatcherConfig {
        worker_threads: workers,
        buffer_pool_size: pool,
        recompile_quota: 2,
        max_resorts_per_frame: 15,
        fade_in: Duration::ZERO,
    }
}

fn dispatcher(world: &Arc<VoxelWorld>, compiler: SectionCompiler, workers: usize, pool: usize) -> TestDispatcher {
    let level = Arc::clone(world) as Arc<dyn LevelReader>;
    SectionRenderDispatcher::new(MemoryBackend::new(), level, compiler, config(workers, pool)).unwrap()
}

/// Runs upload steps until `done` holds, failing after five seconds.
fn wait_until(d: &mut TestDispatcher, mut done: impl FnMut(&TestDispatcher) -> bool) {
    let start = Instant::now();
    loop {
        d.upload_all_pending_uploads();
        if done(d) {
            return;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "Timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

fn is_compiled(d: &TestDispatcher, pos: SectionPos) -> bool {
    d.section(pos).is_some_and(|s| s.mesh().compiled().is_some())
}

fn is_idle(d: &TestDispatcher) -> bool {
    d.sections()
        .all(|s| !s.has_pending_rebuild() && !s.has_pending_resort())
}

fn translucent_state(d: &TestDispatcher, pos: SectionPos) -> (BufferId, Vec<u8>) {
    let mesh = d.section(pos).unwrap().mesh().compiled().unwrap();
    let layer = mesh.layer(RenderLayer::Translucent).unwrap();
    let index = d.backend().contents(layer.index.as_ref().unwrap()).unwrap().to_vec();
    (layer.vertex.id(), index)
}

const ORIGIN: SectionPos = SectionPos::new(0, 0, 0);

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

/// A lone solid block compiles to one opaque layer and leaves every face pair
/// connected.
#[test]
fn test_single_block_end_to_end() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 2, 2);
    assert!(d.add_section(ORIGIN));
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| is_compiled(d, ORIGIN));

    let section = d.section(ORIGIN).unwrap();
    assert!(!section.is_dirty());
    let mesh = section.mesh().compiled().unwrap();
    let solid = mesh.layer(RenderLayer::Solid).unwrap();
    assert_eq!(solid.vertex.size(), 6 * 4 * 24);
    assert!(solid.index.is_none());
    assert!(!mesh.has_layer(RenderLayer::Translucent));
    assert!(mesh.sort_state().is_none());
    for a in FaceDirection::ALL {
        for b in FaceDirection::ALL {
            assert!(section.mesh().faces_can_see_each_other(a, b));
        }
    }
    // solid vertex, shared quad indices
    assert_eq!(d.backend().live_buffers(), 2);
    let shared = d.quad_index_buffer(solid.index_type).unwrap();
    assert!(shared.size() >= u64::from(solid.index_count) * 2);
    assert!(d.take_failures().is_empty());
}

/// An unloaded section compiles to the fully see-through `Empty` sentinel.
#[test]
fn test_unloaded_section_becomes_empty() {
    let (world, _) = world();
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    let pos = SectionPos::new(3, 0, 0);
    d.add_section(pos);
    d.schedule(pos, &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| {
        d.section(pos).is_some_and(|s| matches!(s.mesh(), SectionMesh::Empty))
    });
    assert!(d.section(pos).unwrap().mesh().faces_can_see_each_other(FaceDirection::PosX, FaceDirection::NegY));
    assert_eq!(d.backend().live_buffers(), 0);
}

/// Unregistered sections are reported, not silently ignored.
#[test]
fn test_unknown_section_is_an_error() {
    let (world, _) = world();
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    assert!(matches!(
        d.schedule(ORIGIN, &mut RegionCache::new()),
        Err(DispatchError::UnknownSection(_))
    ));
    assert!(matches!(d.set_dirty(ORIGIN, false), Err(DispatchError::UnknownSection(_))));
    assert!(!d.remove_section(ORIGIN));
}

/// A recompile swaps the mesh and closes the previous buffers.
#[test]
fn test_recompile_replaces_mesh() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 2, 2);
    d.add_section(ORIGIN);
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| is_compiled(d, ORIGIN));

    world.set_block(IVec3::new(2, 2, 2), blocks.glass);
    assert_eq!(d.mark_block_dirty(IVec3::new(2, 2, 2), true), 1);
    assert!(d.section(ORIGIN).unwrap().is_dirty_from_player());
    assert_eq!(d.schedule_dirty_sections(&mut RegionCache::new()).unwrap(), 1);
    wait_until(&mut d, |d| {
        is_idle(d)
            && d.section(ORIGIN)
                .and_then(|s| s.mesh().compiled())
                .is_some_and(|m| m.has_layer(RenderLayer::Translucent))
    });
    d.upload_all_pending_uploads();
    // solid vertex, translucent vertex, translucent index, shared quad indices
    assert_eq!(d.backend().live_buffers(), 4);
}

// ---------------------------------------------------------------------------
// Translucency
// ---------------------------------------------------------------------------

fn glass_section() -> (Arc<VoxelWorld>, TestDispatcher) {
    let (world, blocks) = world();
    world.set_block(IVec3::new(3, 4, 4), blocks.glass);
    world.set_block(IVec3::new(11, 4, 4), blocks.glass);
    world.set_block(IVec3::new(6, 2, 9), blocks.water);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 2, 2);
    d.set_camera_position(DVec3::new(-20.0, 40.0, 40.0));
    d.add_section(ORIGIN);
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| is_compiled(d, ORIGIN));
    (world, d)
}

/// A resort rewrites the index buffer and keeps the vertex buffer.
#[test]
fn test_resort_only_touches_indices() {
    let (_world, mut d) = glass_section();
    let (vertex_before, index_before) = translucent_state(&d, ORIGIN);
    let created_before = d.backend().created_count();

    d.set_camera_position(DVec3::new(40.0, 40.0, 40.0));
    assert!(d.schedule_resort(ORIGIN).unwrap());
    wait_until(&mut d, |d| !d.section(ORIGIN).unwrap().has_pending_resort());

    let (vertex_after, index_after) = translucent_state(&d, ORIGIN);
    assert_eq!(vertex_before, vertex_after);
    assert_ne!(index_before, index_after);
    assert_eq!(d.backend().created_count(), created_before);
    assert_eq!(d.backend().write_count(), 1);
    let pov = d.section(ORIGIN).unwrap().mesh().compiled().unwrap().point_of_view();
    assert_eq!(pov.map(|p| p.components()), Some([1, 1, 1]));
}

/// Moves within one octant schedule nothing; crossing into another schedules
/// exactly one resort.
#[test]
fn test_point_of_view_stability() {
    let (_world, mut d) = glass_section();

    d.set_camera_position(DVec3::new(-35.0, 60.0, 20.0));
    assert!(!d.schedule_resort(ORIGIN).unwrap());
    assert_eq!(d.resort_translucent(&[ORIGIN], true), 0);

    d.set_camera_position(DVec3::new(40.0, 40.0, 40.0));
    assert!(d.schedule_resort(ORIGIN).unwrap());
    d.set_camera_position(DVec3::new(90.0, 70.0, 30.0));
    assert!(!d.schedule_resort(ORIGIN).unwrap());
    assert_eq!(d.resort_translucent(&[ORIGIN], true), 0);

    wait_until(&mut d, is_idle);
    d.upload_all_pending_uploads();
    assert_eq!(d.backend().write_count(), 1);
}

/// With the camera level with the section, a moving camera keeps resorting
/// but a still one does not.
#[test]
fn test_axis_aligned_view_resorts_on_movement() {
    let (_world, mut d) = glass_section();
    d.set_camera_position(DVec3::new(8.0, 40.0, 40.0));
    assert_eq!(d.resort_translucent(&[ORIGIN], false), 1);
    wait_until(&mut d, is_idle);

    assert_eq!(d.resort_translucent(&[ORIGIN], false), 0);
    d.set_camera_position(DVec3::new(9.0, 40.0, 40.0));
    assert_eq!(d.resort_translucent(&[ORIGIN], true), 1);
    wait_until(&mut d, is_idle);
    d.upload_all_pending_uploads();
    assert_eq!(d.backend().write_count(), 2);
}

/// A resort records the point of view it actually sorted for, even when the
/// camera moved between scheduling and execution.
#[test]
fn test_resort_records_point_of_view_it_sorted_for() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(3, 4, 4), blocks.glass);
    world.set_block(IVec3::new(11, 4, 4), blocks.glass);
    world.set_block(IVec3::new(6, 2, 9), blocks.water);
    let busy = SectionPos::new(3, 0, 0);
    world.set_block(busy.origin() + IVec3::new(8, 8, 8), blocks.stone);

    let here = DVec3::new(-20.0, 40.0, 40.0);
    let there = DVec3::new(40.0, 40.0, 40.0);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    d.set_camera_position(here);
    d.add_section(ORIGIN);
    d.compile_sync(ORIGIN, &mut RegionCache::new()).unwrap();
    let (_, sorted_here) = translucent_state(&d, ORIGIN);

    // The busy section holds the only pack until its upload is applied.
    d.add_section(busy);
    d.schedule(busy, &mut RegionCache::new()).unwrap();
    assert_eq!(d.stats().free_buffers, 0);

    d.set_camera_position(there);
    assert!(d.schedule_resort(ORIGIN).unwrap());
    d.set_camera_position(here);
    wait_until(&mut d, |d| is_idle(d) && is_compiled(d, busy));

    let pov = d.section(ORIGIN).unwrap().mesh().compiled().unwrap().point_of_view();
    assert_eq!(pov, Some(TranslucencyPointOfView::of(here, ORIGIN)));
    assert_eq!(translucent_state(&d, ORIGIN).1, sorted_here);

    d.set_camera_position(there);
    assert!(d.schedule_resort(ORIGIN).unwrap());
    wait_until(&mut d, is_idle);
    let pov = d.section(ORIGIN).unwrap().mesh().compiled().unwrap().point_of_view();
    assert_eq!(pov, Some(TranslucencyPointOfView::of(there, ORIGIN)));
    assert_ne!(translucent_state(&d, ORIGIN).1, sorted_here);
}

/// The per-frame pass stops at its budget.
#[test]
fn test_resort_budget() {
    let (world, blocks) = world();
    let sections: Vec<SectionPos> = (0..4).map(|x| SectionPos::new(x, 0, 0)).collect();
    for pos in &sections {
        world.set_block(pos.origin() + IVec3::new(4, 4, 4), blocks.glass);
    }
    let level = Arc::clone(&world) as Arc<dyn LevelReader>;
    let mut cfg = config(2, 2);
    cfg.max_resorts_per_frame = 2;
    let mut d = SectionRenderDispatcher::new(MemoryBackend::new(), level, SectionCompiler::with_defaults(), cfg)
        .unwrap();
    d.set_camera_position(DVec3::new(-40.0, 40.0, 40.0));
    let mut cache = RegionCache::new();
    for &pos in &sections {
        d.add_section(pos);
        d.compile_sync(pos, &mut cache).unwrap();
    }

    d.set_camera_position(DVec3::new(-40.0, -40.0, 40.0));
    assert_eq!(d.resort_translucent(&sections, true), 2);
    let pending: Vec<i32> = sections
        .iter()
        .filter(|&&pos| d.section(pos).unwrap().has_pending_resort())
        .map(|pos| pos.x)
        .collect();
    assert_eq!(pending, vec![0, 1]);
}

// ---------------------------------------------------------------------------
// Concurrency, cancellation, failures
// ---------------------------------------------------------------------------

/// Concurrent compiles never exceed the buffer pool size, whatever the
/// worker count.
#[test]
fn test_buffer_pool_bounds_concurrency() {
    let (world, blocks) = world();
    let sections: Vec<SectionPos> = (0..12).map(|i| SectionPos::new(i % 4, i / 4, 0)).collect();
    for pos in &sections {
        world.set_block(pos.origin() + IVec3::new(8, 8, 8), blocks.stone);
    }
    let geometry = Arc::new(SlowGeometry {
        delay: Duration::from_millis(5),
        ..SlowGeometry::default()
    });
    let mut d = dispatcher(&world, slow_compiler(&geometry), 4, 2);
    let mut cache = RegionCache::new();
    for &pos in &sections {
        d.add_section(pos);
    }
    assert_eq!(d.schedule_dirty_sections(&mut cache).unwrap(), 12);

    let samples = Mutex::new(Vec::new());
    wait_until(&mut d, |d| {
        let stats = d.stats();
        samples.lock().unwrap().push(stats.running);
        sections.iter().all(|&pos| is_compiled(d, pos))
    });

    assert!(geometry.peak.load(Ordering::SeqCst) <= 2);
    assert!(samples.into_inner().unwrap().iter().all(|&running| running <= 2));
    assert_eq!(d.stats().free_buffers, 2);
    assert_eq!(d.backend().live_buffers(), 12 + 1);
}

/// Rescheduling cancels the in-flight task; only the newest result lands.
#[test]
fn test_reschedule_cancels_previous_task() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let geometry = Arc::new(SlowGeometry {
        delay: Duration::from_millis(30),
        ..SlowGeometry::default()
    });
    let mut d = dispatcher(&world, slow_compiler(&geometry), 1, 1);
    d.add_section(ORIGIN);

    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    let first = d.section(ORIGIN).unwrap().last_rebuild.clone().unwrap();
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    assert!(first.is_cancelled());

    wait_until(&mut d, |d| is_compiled(d, ORIGIN) && is_idle(d));
    // one vertex buffer plus the shared quad indices
    assert_eq!(d.backend().created_count(), 2);
    assert_eq!(d.stats().free_buffers, 1);
}

/// Removing a section mid-compile drops its result and leaks nothing.
#[test]
fn test_remove_section_while_compiling() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let geometry = Arc::new(SlowGeometry {
        delay: Duration::from_millis(20),
        ..SlowGeometry::default()
    });
    let mut d = dispatcher(&world, slow_compiler(&geometry), 1, 1);
    d.add_section(ORIGIN);
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    assert!(d.remove_section(ORIGIN));

    wait_until(&mut d, |d| d.stats().free_buffers == 1 && d.stats().running == 0);
    assert!(d.section(ORIGIN).is_none());
    assert_eq!(d.backend().live_buffers(), 0);
}

/// An unknown block state fails the task, surfaces once, and leaves the
/// section dirty without a mesh.
#[test]
fn test_compile_error_is_surfaced() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(1, 1, 1), blocks.stone);
    world.set_block(IVec3::new(5, 5, 5), BlockStateId(999));
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    d.add_section(ORIGIN);
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| d.stats().failures > 0 && is_idle(d));

    let failures = d.take_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].section, ORIGIN);
    assert_eq!(failures[0].kind, "rebuild");
    assert!(failures[0].message.contains("unknown block state"));
    assert!(d.take_failures().is_empty());

    let section = d.section(ORIGIN).unwrap();
    assert!(section.is_dirty());
    assert!(section.mesh().is_uncompiled());
    assert_eq!(d.stats().free_buffers, 1);
}

/// A panicking geometry provider is contained and the pipeline keeps going.
#[test]
fn test_panic_is_contained() {
    let (world, blocks) = world();
    let bad = SectionPos::new(0, 0, 0);
    let good = SectionPos::new(2, 0, 0);
    world.set_block(IVec3::new(4, 4, 4), blocks.bomb);
    world.set_block(good.origin() + IVec3::new(4, 4, 4), blocks.stone);
    let geometry = Arc::new(SlowGeometry::default());
    let mut d = dispatcher(&world, slow_compiler(&geometry), 1, 1);
    d.add_section(bad);
    d.add_section(good);
    d.schedule_dirty_sections(&mut RegionCache::new()).unwrap();

    wait_until(&mut d, |d| is_compiled(d, good) && d.stats().failures > 0);
    let failures = d.take_failures();
    assert_eq!(failures[0].section, bad);
    assert!(failures[0].message.contains("bomb block"));
    assert!(d.section(bad).unwrap().is_dirty());
    assert_eq!(d.stats().free_buffers, 1);
}

// ---------------------------------------------------------------------------
// Synchronous compile, dirtying, shutdown
// ---------------------------------------------------------------------------

/// `compile_sync` makes the mesh available without an upload step.
#[test]
fn test_compile_sync() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    d.add_section(ORIGIN);
    d.add_section(SectionPos::new(0, 5, 0));
    let mut cache = RegionCache::new();

    d.compile_sync(ORIGIN, &mut cache).unwrap();
    assert!(is_compiled(&d, ORIGIN));
    assert_eq!(d.backend().live_buffers(), 2);
    assert_eq!(d.stats().queued, 0);

    d.compile_sync(SectionPos::new(0, 5, 0), &mut cache).unwrap();
    assert!(matches!(d.section(SectionPos::new(0, 5, 0)).unwrap().mesh(), SectionMesh::Empty));

    world.set_block(IVec3::new(3, 3, 3), BlockStateId(999));
    assert!(matches!(
        d.compile_sync(ORIGIN, &mut RegionCache::new()),
        Err(DispatchError::Compile(CompileError::UnknownBlockState { .. }))
    ));
    assert!(d.section(ORIGIN).unwrap().is_dirty());
}

/// A synchronous compile supersedes a finished but not yet uploaded rebuild:
/// the async result is dropped as stale and its pack returns to the pool.
#[test]
fn test_compile_sync_supersedes_pending_rebuild() {
    let (world, blocks) = world();
    world.set_block(IVec3::new(8, 8, 8), blocks.stone);
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    d.add_section(ORIGIN);
    d.schedule(ORIGIN, &mut RegionCache::new()).unwrap();
    let in_flight = d.section(ORIGIN).unwrap().last_rebuild.clone().unwrap();

    let start = Instant::now();
    while d.stats().pending_uploads == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "Timed out");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(d.stats().free_buffers, 0);

    d.compile_sync(ORIGIN, &mut RegionCache::new()).unwrap();
    let section = d.section(ORIGIN).unwrap();
    assert!(in_flight.is_cancelled());
    assert!(!is_current(section, &in_flight));
    assert!(!section.is_dirty());
    let sync_vertex = section.mesh().compiled().unwrap().layer(RenderLayer::Solid).unwrap().vertex.id();

    assert_eq!(d.upload_all_pending_uploads(), 0);
    assert_eq!(d.stats().free_buffers, 1);
    assert_eq!(d.stats().pending_uploads, 0);
    let mesh = d.section(ORIGIN).unwrap().mesh().compiled().unwrap();
    assert_eq!(mesh.layer(RenderLayer::Solid).unwrap().vertex.id(), sync_vertex);
    // sync vertex buffer plus the shared quad indices
    assert_eq!(d.backend().created_count(), 2);
    assert_eq!(d.backend().live_buffers(), 2);
}

/// Unindexed layers of every section draw from one shared index buffer.
#[test]
fn test_unindexed_layers_share_quad_indices() {
    let (world, blocks) = world();
    let sections = [ORIGIN, SectionPos::new(1, 0, 0)];
    for pos in sections {
        world.set_block(pos.origin() + IVec3::new(8, 8, 8), blocks.stone);
    }
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    assert!(d.quad_index_buffer(IndexType::U16).is_none());
    let mut cache = RegionCache::new();
    for pos in sections {
        d.add_section(pos);
        d.compile_sync(pos, &mut cache).unwrap();
    }

    assert_eq!(d.backend().created_count(), sections.len() + 1);
    assert!(d.quad_index_buffer(IndexType::U32).is_none());
    let shared = d.quad_index_buffer(IndexType::U16).unwrap();
    let expected = IndexData::sequential(2, IndexType::U16);
    let bytes = d.backend().contents(shared).unwrap();
    assert_eq!(&bytes[..expected.as_bytes().len()], expected.as_bytes());

    d.dispose();
    assert!(d.quad_index_buffer(IndexType::U16).is_none());
    assert_eq!(d.backend().live_buffers(), 0);
}

/// Sections whose packed keys collide are still tracked separately.
#[test]
fn test_far_sections_with_colliding_keys_stay_distinct() {
    let (world, _) = world();
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    let east = SectionPos::new(1 << 21, 0, 0);
    let west = SectionPos::new(-(1 << 21), 0, 0);
    assert_eq!(east.as_long(), west.as_long());

    assert!(d.add_section(east));
    assert!(d.add_section(west));
    assert_eq!(d.sections().count(), 2);
    assert_eq!(d.section(west).unwrap().pos(), west);

    assert!(d.remove_section(east));
    assert!(d.section(east).is_none());
    assert_eq!(d.section(west).unwrap().pos(), west);
}

/// Editing a boundary block dirties the neighbour sharing that face.
#[test]
fn test_mark_block_dirty_reaches_neighbours() {
    let (world, _) = world();
    let mut d = dispatcher(&world, SectionCompiler::with_defaults(), 1, 1);
    let mut cache = RegionCache::new();
    for pos in [ORIGIN, SectionPos::new(1, 0, 0), SectionPos::new(0, 1, 0)] {
        d.add_section(pos);
        d.compile_sync(pos, &mut cache).unwrap();
        assert!(!d.section(pos).unwrap().is_dirty());
    }

    assert_eq!(d.mark_block_dirty(IVec3::new(8, 8, 8), false), 1);
    assert_eq!(d.mark_block_dirty(IVec3::new(15, 5, 5), false), 2);
    assert!(d.section(SectionPos::new(1, 0, 0)).unwrap().is_dirty());
    assert!(!d.section(SectionPos::new(0, 1, 0)).unwrap().is_dirty());
    assert_eq!(d.mark_block_dirty(IVec3::new(15, 15, 5), true), 3);
    assert!(d.section(SectionPos::new(0, 1, 0)).unwrap().is_dirty_from_player());
}

/// Dispose closes every buffer, is idempotent, and refuses further work.
#[test]
fn test_dispose_releases_everything() {
    let (world, blocks) = world();
    let geometry = Arc::new(SlowGeometry {
        delay: Duration::from_millis(2),
        ..SlowGeometry::default()
    });
    let sections: Vec<SectionPos> = (0..6).map(|x| SectionPos::new(x, 0, 0)).collect();
    for pos in &sections {
        world.set_block(pos.origin() + IVec3::new(8, 8, 8), blocks.stone);
        world.set_block(pos.origin() + IVec3::new(2, 8, 8), blocks.glass);
    }
    let mut d = dispatcher(&world, slow_compiler(&geometry), 2, 2);
    for &pos in &sections {
        d.add_section(pos);
    }
    d.schedule(sections[0], &mut RegionCache::new()).unwrap();
    wait_until(&mut d, |d| is_compiled(d, sections[0]));
    d.schedule_dirty_sections(&mut RegionCache::new()).unwrap();

    d.dispose();
    assert!(d.is_closed());
    assert_eq!(d.backend().live_buffers(), 0);
    assert!(d.sections().all(|s| s.mesh().is_uncompiled()));
    assert!(matches!(
        d.schedule(sections[1], &mut RegionCache::new()),
        Err(DispatchError::Closed)
    ));
    assert_eq!(d.upload_all_pending_uploads(), 0);
    d.dispose();
    assert_eq!(d.backend().live_buffers(), 0);
}

#[test]
fn test_config_from_compile_config() {
    let compile = CompileConfig {
        worker_threads: 3,
        buffer_pool_size: 0,
        recompile_quota: 5,
        fade_in_ms: 250,
        max_resorts_per_frame: 4,
    };
    let cfg = DispatcherConfig::from_compile_config(&compile);
    assert_eq!(cfg.worker_threads, 3);
    assert_eq!(cfg.buffer_pool_size, 3);
    assert_eq!(cfg.recompile_quota, 5);
    assert_eq!(cfg.fade_in, Duration::from_millis(250));
    assert_eq!(cfg.max_resorts_per_frame, 4);
}

#[test]
fn test_stats_display() {
    let stats = DispatcherStats {
        queued: 3,
        pending_uploads: 1,
        free_buffers: 2,
        ..DispatcherStats::default()
    };
    assert_eq!(stats.to_string(), "queued: 3, uploads: 1, buffers: 2");
}
