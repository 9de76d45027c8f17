//! Headless driver for the section compile pipeline.
//!
//! Builds a small world, registers every section with a dispatcher, then
//! simulates frames: the camera flies across section boundaries, a block is
//! edited now and then, dirty sections are rescheduled, translucent sections
//! are resorted, and uploads are drained once per frame.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p nebula-demo -- --radius 3 --frames 240`; add `--gpu`
//! to upload through a wgpu device when an adapter is available.

mod scene;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{DVec3, IVec3};
use nebula_config::{CliArgs, Config};
use nebula_mesh::{RegionCache, RenderLayer, SectionCompiler};
use nebula_render::{
    DispatcherConfig, GpuBackend, MemoryBackend, SectionMesh, SectionRenderDispatcher,
    WgpuBackend,
};
use nebula_voxel::{BlockStateId, LevelReader, SectionPos};
use tracing::{error, info, warn};

use crate::scene::{DemoScene, SEA_LEVEL};

/// Simulated frame length.
const FRAME: Duration = Duration::from_millis(16);

/// Camera path: a slow pass across the scene at a fixed height.
fn camera_at(frame: u32, frames: u32, radius: i32) -> DVec3 {
    let span = f64::from((2 * radius + 1) * 16);
    let t = f64::from(frame) / f64::from(frames.max(1));
    DVec3::new(
        -span / 2.0 + t * span + 8.0,
        f64::from(SEA_LEVEL) + 6.0 + (t * std::f64::consts::TAU).sin() * 10.0,
        8.0 + (t * std::f64::consts::TAU).cos() * span / 3.0,
    )
}

fn translucent_sections<B: GpuBackend>(dispatcher: &SectionRenderDispatcher<B>) -> Vec<SectionPos> {
    dispatcher
        .sections()
        .filter(|s| {
            s.mesh()
                .compiled()
                .is_some_and(|m| m.has_layer(RenderLayer::Translucent))
        })
        .map(|s| s.pos())
        .collect()
}

fn run<B: GpuBackend>(backend: B, scene: &DemoScene, config: &Config, args: &CliArgs) {
    let level = Arc::clone(&scene.world) as Arc<dyn LevelReader>;
    let compiler = SectionCompiler::with_renderers(scene::block_entity_renderers());
    let dispatcher_config = DispatcherConfig::from_compile_config(&config.compile);
    let mut dispatcher = match SectionRenderDispatcher::new(backend, level, compiler, dispatcher_config) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to start section dispatcher: {e}");
            return;
        }
    };

    for &pos in &scene.sections {
        dispatcher.add_section(pos);
    }

    let start = Instant::now();
    let mut last_camera = camera_at(0, args.frames, args.radius);
    dispatcher.set_camera_position(last_camera);

    // The camera's own section is needed this frame.
    let camera_section = SectionPos::of_point(last_camera);
    if dispatcher.section(camera_section).is_some()
        && let Err(e) = dispatcher.compile_sync(camera_section, &mut RegionCache::new())
    {
        warn!("Synchronous compile of {camera_section:?} failed: {e}");
    }

    let stats_interval = config.debug.stats_interval_frames;
    for frame in 0..args.frames {
        let camera = camera_at(frame, args.frames, args.radius);
        let camera_moved = camera != last_camera;
        last_camera = camera;
        dispatcher.set_camera_position(camera);

        // Swap the surface block under the camera's path every so often.
        if frame > 0 && frame % 40 == 0 {
            let (x, z) = (camera.x.floor() as i32, camera.z.floor() as i32);
            let pos = IVec3::new(x, scene::surface_height(x, z), z);
            let state = if (frame / 40) % 2 == 1 {
                scene.blocks.glass
            } else {
                BlockStateId::AIR
            };
            scene.world.set_block(pos, state);
            let marked = dispatcher.mark_block_dirty(pos, true);
            info!("Frame {frame}: edited block at {pos}, {marked} section(s) dirty");
        }

        let mut cache = RegionCache::new();
        if let Err(e) = dispatcher.schedule_dirty_sections(&mut cache) {
            error!("Scheduling failed: {e}");
            break;
        }

        let translucent = translucent_sections(&dispatcher);
        dispatcher.resort_translucent(&translucent, camera_moved);
        dispatcher.upload_all_pending_uploads();

        for failure in dispatcher.take_failures() {
            warn!("Frame {frame}: {failure}");
        }
        if stats_interval > 0 && frame % stats_interval == 0 {
            info!("Frame {frame}: {}", dispatcher.stats());
        }
        std::thread::sleep(FRAME);
    }

    // Let outstanding work land before reporting.
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline
        && dispatcher
            .sections()
            .any(|s| s.has_pending_rebuild() || s.has_pending_resort())
    {
        dispatcher.upload_all_pending_uploads();
        std::thread::sleep(Duration::from_millis(2));
    }

    let now = Instant::now();
    let fade_in = dispatcher.config().fade_in;
    let (mut compiled, mut empty, mut uncompiled, mut faded_in) = (0, 0, 0, 0);
    let mut block_entities = 0;
    for section in dispatcher.sections() {
        match section.mesh() {
            SectionMesh::Compiled(mesh) => {
                compiled += 1;
                block_entities += mesh.block_entities().len() + mesh.global_block_entities().len();
            }
            SectionMesh::Empty => empty += 1,
            SectionMesh::Uncompiled => uncompiled += 1,
        }
        if section.visibility_fade(now, fade_in) >= 1.0 {
            faded_in += 1;
        }
    }
    info!(
        "After {} frames ({:.2?}): {compiled} compiled, {empty} empty, {uncompiled} uncompiled, \
         {faded_in} fully faded in, {block_entities} block entities, {} live buffers",
        args.frames,
        start.elapsed(),
        dispatcher.backend().live_buffers()
    );
    info!("Final stats: {}", dispatcher.stats());

    dispatcher.dispose();
    info!(
        "Disposed; {} buffers still live",
        dispatcher.backend().live_buffers()
    );
}

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("nebula-sections")
    });

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("Rejected config overrides: {e}, using defaults");
        config = Config::default();
    }

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let scene = match scene::build(args.radius.max(0)) {
        Ok(scene) => scene,
        Err(e) => {
            error!("Failed to build demo world: {e}");
            return;
        }
    };
    info!(
        "Demo world: {} sections loaded, {} render sections",
        scene.world.section_count(),
        scene.sections.len()
    );

    if args.gpu {
        match WgpuBackend::request_headless() {
            Ok(backend) => return run(backend, &scene, &config, &args),
            Err(e) => warn!("GPU unavailable ({e}), falling back to host memory"),
        }
    }
    run(MemoryBackend::new(), &scene, &config, &args);
}
