//! Section render dispatcher: schedules compile tasks onto worker threads,
//! throttles them through the buffer pool, and applies their results on the
//! thread that owns the GPU backend.
//!
//! The flow for one section:
//!
//! 1. [`SectionRenderDispatcher::schedule`] snapshots the region and queues a
//!    rebuild task, cancelling whatever the section had outstanding.
//! 2. A pump step takes the task once a staging pack is free and hands it to
//!    a worker. Finishing a task (or failing, or seeing its cancel flag) pumps
//!    again, so at most `buffer_pool_size` tasks are ever in flight.
//! 3. The worker's output goes onto the upload queue. Nothing on a worker
//!    touches the [`GpuBackend`].
//! 4. [`SectionRenderDispatcher::upload_all_pending_uploads`], called once
//!    per frame, creates the buffers, swaps the section's mesh, queues the
//!    old buffers for closing, and returns the pack to the pool.

use std::any::Any;
use std::fmt;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::{DVec3, IVec3};
use rustc_hash::{FxHashMap, FxHashSet};

use nebula_config::CompileConfig;
use nebula_mesh::{
    CompileError, CompileResults, IndexData, IndexType, RegionCache, RenderLayer,
    SectionBufferPack, SectionCompiler, VertexSorting,
};
use nebula_voxel::{LevelReader, SectionPos};

use crate::buffer_pool::SectionBufferPool;
use crate::compiled_mesh::{CompiledSectionMesh, SectionMesh};
use crate::executor::{CompileExecutor, Job};
use crate::gpu::{GpuBackend, GpuBuffer, GpuError};
use crate::point_of_view::TranslucencyPointOfView;
use crate::quad_indices::QuadIndexBuffers;
use crate::section::RenderSection;
use crate::task::{CompileTask, TaskHandle, TaskKind};
use crate::task_queue::CompileTaskQueue;

// ---------------------------------------------------------------------------
// Configuration, errors, stats
// ---------------------------------------------------------------------------

/// Resolved dispatcher settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatcherConfig {
    /// Compile worker threads.
    pub worker_threads: usize,
    /// Staging packs, i.e. maximum tasks in flight.
    pub buffer_pool_size: usize,
    /// Consecutive recompiles allowed before an initial compile.
    pub recompile_quota: u32,
    /// Resorts [`SectionRenderDispatcher::resort_translucent`] schedules per call.
    pub max_resorts_per_frame: usize,
    /// Fade-in after a section's upload.
    pub fade_in: Duration,
}

impl DispatcherConfig {
    /// Resolves automatic sizes in `config` against the machine.
    pub fn from_compile_config(config: &CompileConfig) -> Self {
        Self {
            worker_threads: config.resolved_worker_threads(),
            buffer_pool_size: config.resolved_buffer_pool_size(),
            recompile_quota: config.recompile_quota,
            max_resorts_per_frame: config.max_resorts_per_frame,
            fade_in: Duration::from_millis(config.fade_in_ms),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_compile_config(&CompileConfig::default())
    }
}

/// Errors returned to the dispatcher's owner.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No render section exists at this position.
    #[error("no render section at {0:?}")]
    UnknownSection(SectionPos),

    /// The dispatcher was disposed.
    #[error("section dispatcher is disposed")]
    Closed,

    /// Synchronous compile failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Synchronous upload failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A worker thread could not be started.
    #[error("failed to spawn compile worker: {0}")]
    Spawn(#[source] io::Error),
}

/// A task that failed off-thread, held until the owner collects it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileFailure {
    /// Section the task was for.
    pub section: SectionPos,
    /// Task kind (`"rebuild"`, `"resort"`, `"upload"`).
    pub kind: &'static str,
    /// Error or panic message.
    pub message: String,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of section ({}, {}, {}) failed: {}",
            self.kind, self.section.x, self.section.y, self.section.z, self.message
        )
    }
}

/// Diagnostic counters. Advisory only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Results waiting for the upload step.
    pub pending_uploads: usize,
    /// Staging packs free to start a task.
    pub free_buffers: usize,
    /// Tasks currently executing on a worker.
    pub running: usize,
    /// Registered render sections.
    pub sections: usize,
    /// Failures collected and not yet taken.
    pub failures: usize,
}

impl fmt::Display for DispatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued: {}, uploads: {}, buffers: {}",
            self.queued, self.pending_uploads, self.free_buffers
        )
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

enum Payload {
    Rebuilt {
        results: CompileResults,
        point_of_view: TranslucencyPointOfView,
    },
    Empty,
    Resorted {
        indices: IndexData,
        point_of_view: TranslucencyPointOfView,
    },
}

struct Upload {
    section: SectionPos,
    handle: TaskHandle,
    payload: Payload,
    pack: SectionBufferPack,
}

enum UploadMessage {
    Ready(Upload),
    Failed {
        section: SectionPos,
        handle: TaskHandle,
    },
}

/// State reachable from worker threads.
struct Shared {
    queue: CompileTaskQueue,
    pool: SectionBufferPool,
    compiler: SectionCompiler,
    closed: AtomicBool,
    camera: [AtomicU64; 3],
    pump_requests: AtomicUsize,
    running: AtomicUsize,
    jobs: Sender<Job>,
    uploads: Sender<UploadMessage>,
    failures: Sender<CompileFailure>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn camera(&self) -> DVec3 {
        let [x, y, z] = &self.camera;
        DVec3::new(
            f64::from_bits(x.load(Ordering::Relaxed)),
            f64::from_bits(y.load(Ordering::Relaxed)),
            f64::from_bits(z.load(Ordering::Relaxed)),
        )
    }

    fn set_camera(&self, camera: DVec3) {
        for (slot, value) in self.camera.iter().zip(camera.to_array()) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Runs pump steps until no other thread asked for one meanwhile.
    ///
    /// Only one thread pumps at a time; a request arriving mid-pump makes the
    /// pumping thread go around once more instead of starting a second pump.
    fn request_pump(self: &Arc<Self>) {
        if self.pump_requests.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        loop {
            self.pump_once();
            if self
                .pump_requests
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            self.pump_requests.store(1, Ordering::Release);
        }
    }

    fn pump_once(self: &Arc<Self>) {
        while !self.is_closed() && self.pool.free_count() > 0 {
            let Some(task) = self.queue.poll(self.camera()) else {
                break;
            };
            let Some(pack) = self.pool.acquire() else {
                self.queue.add(task);
                break;
            };
            tracing::trace!("Starting {} of {:?}", task.name(), task.section);
            self.running.fetch_add(1, Ordering::AcqRel);
            let shared = Arc::clone(self);
            let job = Job::Run(Box::new(move || shared.run(task, pack)));
            if self.jobs.send(job).is_err() {
                self.running.fetch_sub(1, Ordering::AcqRel);
                tracing::warn!("Compile workers are gone, task dropped");
                break;
            }
        }
    }

    fn run(self: &Arc<Self>, task: CompileTask, mut pack: SectionBufferPack) {
        let section = task.section;
        let kind = task.name();
        let handle = task.handle().clone();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(task, &mut pack)));
        match outcome {
            Ok(Ok(Some(payload))) => {
                let upload = Upload {
                    section,
                    handle,
                    payload,
                    pack,
                };
                if self.uploads.send(UploadMessage::Ready(upload)).is_err() {
                    tracing::warn!("Upload queue closed, dropping {kind} of {section:?}");
                }
            }
            Ok(Ok(None)) => {
                tracing::trace!("Cancelled {kind} of {section:?}");
                handle.mark_completed();
                self.pool.release(pack);
            }
            Ok(Err(err)) => {
                self.pool.release(pack);
                self.fail(section, kind, handle, err.to_string());
            }
            Err(panic) => {
                self.pool.discard(pack);
                self.fail(section, kind, handle, panic_message(panic.as_ref()));
            }
        }

        self.running.fetch_sub(1, Ordering::AcqRel);
        self.request_pump();
    }

    /// Returns `Ok(None)` when the task was cancelled at a checkpoint.
    fn execute(
        &self,
        task: CompileTask,
        pack: &mut SectionBufferPack,
    ) -> Result<Option<Payload>, CompileError> {
        let handle = task.handle().clone();
        if handle.is_cancelled() || self.is_closed() {
            return Ok(None);
        }

        let section = task.section;
        let camera = self.camera();
        let sorting = VertexSorting::for_camera(camera, section.origin().as_dvec3());
        let payload = match task.kind {
            TaskKind::Rebuild { region: None } => Payload::Empty,
            TaskKind::Rebuild {
                region: Some(region),
            } => Payload::Rebuilt {
                results: self.compiler.compile(section, &region, &sorting, pack)?,
                point_of_view: TranslucencyPointOfView::of(camera, section),
            },
            TaskKind::ResortTransparency { sort_state } => Payload::Resorted {
                indices: sort_state.build_sorted_indices(&sorting),
                point_of_view: TranslucencyPointOfView::of(camera, section),
            },
        };

        if handle.is_cancelled() || self.is_closed() {
            recycle(payload, pack);
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn fail(&self, section: SectionPos, kind: &'static str, handle: TaskHandle, message: String) {
        tracing::debug!("{kind} of {section:?} failed on worker: {message}");
        let _ = self.failures.send(CompileFailure {
            section,
            kind,
            message,
        });
        let _ = self.uploads.send(UploadMessage::Failed { section, handle });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Hands vertex allocations back to the pack's builders.
fn recycle(payload: Payload, pack: &mut SectionBufferPack) {
    if let Payload::Rebuilt { results, .. } = payload {
        recycle_results(results, pack);
    }
}

fn recycle_results(results: CompileResults, pack: &mut SectionBufferPack) {
    for (layer, mesh) in results.meshes {
        pack.recycle(layer, mesh.vertices);
    }
}

fn install_mesh(section: &mut RenderSection, mesh: SectionMesh, close_queue: &mut Vec<GpuBuffer>) {
    let old = mem::replace(&mut section.mesh, mesh);
    close_queue.extend(old.into_buffers());
    section.uploaded_at = Some(Instant::now());
}

/// Returns `true` if `handle` is the section's live rebuild or resort.
fn is_current(section: &RenderSection, handle: &TaskHandle) -> bool {
    !handle.is_cancelled()
        && [&section.last_rebuild, &section.last_resort]
            .into_iter()
            .flatten()
            .any(|live| live.same_task(handle))
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns every [`RenderSection`] and drives their compile tasks.
///
/// All methods run on the thread that owns the backend. Worker threads only
/// see snapshots and staging packs.
pub struct SectionRenderDispatcher<B: GpuBackend> {
    backend: B,
    level: Arc<dyn LevelReader>,
    config: DispatcherConfig,
    sections: FxHashMap<SectionPos, RenderSection>,
    shared: Arc<Shared>,
    executor: CompileExecutor,
    uploads: Receiver<UploadMessage>,
    failure_rx: Receiver<CompileFailure>,
    failures: Vec<CompileFailure>,
    close_queue: Vec<GpuBuffer>,
    quad_indices: QuadIndexBuffers,
    sync_pack: SectionBufferPack,
    camera: DVec3,
    disposed: bool,
}

impl<B: GpuBackend> SectionRenderDispatcher<B> {
    /// Creates a dispatcher and spawns its workers.
    pub fn new(
        backend: B,
        level: Arc<dyn LevelReader>,
        compiler: SectionCompiler,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        let executor =
            CompileExecutor::new(config.worker_threads, "section-compile").map_err(DispatchError::Spawn)?;
        let (upload_tx, uploads) = unbounded();
        let (failure_tx, failure_rx) = unbounded();
        let shared = Arc::new(Shared {
            queue: CompileTaskQueue::new(config.recompile_quota),
            pool: SectionBufferPool::new(config.buffer_pool_size),
            compiler,
            closed: AtomicBool::new(false),
            camera: Default::default(),
            pump_requests: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            jobs: executor.sender(),
            uploads: upload_tx,
            failures: failure_tx,
        });
        tracing::info!(
            "Section dispatcher started: {} workers, {} buffer packs, recompile quota {}",
            executor.thread_count(),
            shared.pool.capacity(),
            config.recompile_quota
        );
        Ok(Self {
            backend,
            level,
            config,
            sections: FxHashMap::default(),
            shared,
            executor,
            uploads,
            failure_rx,
            failures: Vec::new(),
            close_queue: Vec::new(),
            quad_indices: QuadIndexBuffers::new(),
            sync_pack: SectionBufferPack::new(),
            camera: DVec3::ZERO,
            disposed: false,
        })
    }

    /// The GPU backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the GPU backend, e.g. for drawing.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Sequential quad indices for layers without their own index buffer.
    ///
    /// Covers every unindexed layer uploaded so far; may be replaced by a
    /// larger buffer during [`Self::upload_all_pending_uploads`].
    pub fn quad_index_buffer(&self, index_type: IndexType) -> Option<&GpuBuffer> {
        self.quad_indices.buffer(index_type)
    }

    /// Settings in effect.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Returns `true` once [`Self::dispose`] ran.
    pub fn is_closed(&self) -> bool {
        self.disposed
    }

    // -- sections -----------------------------------------------------------

    /// Registers a render section. Returns `false` if it already existed.
    pub fn add_section(&mut self, pos: SectionPos) -> bool {
        if self.disposed || self.sections.contains_key(&pos) {
            return false;
        }
        self.sections.insert(pos, RenderSection::new(pos));
        true
    }

    /// Unregisters a section, cancelling its tasks and queueing its buffers
    /// for closing. Returns `false` if it wasn't registered.
    pub fn remove_section(&mut self, pos: SectionPos) -> bool {
        let Some(mut section) = self.sections.remove(&pos) else {
            return false;
        };
        section.cancel_tasks();
        self.close_queue
            .extend(mem::take(&mut section.mesh).into_buffers());
        true
    }

    /// A registered section.
    pub fn section(&self, pos: SectionPos) -> Option<&RenderSection> {
        self.sections.get(&pos)
    }

    /// Every registered section, in no particular order.
    pub fn sections(&self) -> impl Iterator<Item = &RenderSection> {
        self.sections.values()
    }

    /// Marks a section for rebuild.
    pub fn set_dirty(&mut self, pos: SectionPos, player_changed: bool) -> Result<(), DispatchError> {
        self.sections
            .get_mut(&pos)
            .ok_or(DispatchError::UnknownSection(pos))?
            .set_dirty(player_changed);
        Ok(())
    }

    /// Marks every registered section whose region contains block `pos`.
    ///
    /// That is the owning section plus any neighbour the block touches when it
    /// lies on a section boundary. Returns how many sections were marked.
    pub fn mark_block_dirty(&mut self, pos: IVec3, player_changed: bool) -> usize {
        let mut touched = FxHashSet::default();
        for dy in -1..=1 {
            for dz in -1..=1 {
                for dx in -1..=1 {
                    touched.insert(SectionPos::of_block(pos + IVec3::new(dx, dy, dz)));
                }
            }
        }
        let mut marked = 0;
        for section in touched {
            if let Some(render) = self.sections.get_mut(&section) {
                render.set_dirty(player_changed);
                marked += 1;
            }
        }
        marked
    }

    /// Updates the camera used for task priority and translucency sorting.
    pub fn set_camera_position(&mut self, camera: DVec3) {
        self.camera = camera;
        self.shared.set_camera(camera);
    }

    /// Last camera position set.
    pub fn camera_position(&self) -> DVec3 {
        self.camera
    }

    // -- scheduling ---------------------------------------------------------

    /// Queues a rebuild of `pos`, cancelling any outstanding task for it.
    pub fn schedule(&mut self, pos: SectionPos, cache: &mut RegionCache) -> Result<(), DispatchError> {
        if self.disposed {
            return Err(DispatchError::Closed);
        }
        let section = self
            .sections
            .get_mut(&pos)
            .ok_or(DispatchError::UnknownSection(pos))?;
        section.cancel_tasks();
        let region = cache.create_region(self.level.as_ref(), pos);
        let task = CompileTask::rebuild(pos, region, !section.mesh.is_uncompiled());
        section.last_rebuild = Some(task.handle().clone());
        section.set_not_dirty();
        tracing::trace!("Scheduled {} of {pos:?}", if task.is_recompile { "recompile" } else { "compile" });
        self.shared.queue.add(task);
        self.shared.request_pump();
        Ok(())
    }

    /// Schedules every dirty section that has no rebuild in flight.
    pub fn schedule_dirty_sections(&mut self, cache: &mut RegionCache) -> Result<usize, DispatchError> {
        let dirty: Vec<SectionPos> = self
            .sections
            .values()
            .filter(|s| s.is_dirty() && !s.has_pending_rebuild())
            .map(RenderSection::pos)
            .collect();
        for &pos in &dirty {
            self.schedule(pos, cache)?;
        }
        Ok(dirty.len())
    }

    /// Queues an index-only resort of the section's translucent layer.
    ///
    /// Does nothing (returns `false`) unless the section has translucent
    /// geometry with a sort state, no rebuild is in flight, and the camera's
    /// point of view differs from the one last sorted or pending.
    pub fn schedule_resort(&mut self, pos: SectionPos) -> Result<bool, DispatchError> {
        self.schedule_resort_inner(pos, false)
    }

    fn schedule_resort_inner(&mut self, pos: SectionPos, camera_moved: bool) -> Result<bool, DispatchError> {
        if self.disposed {
            return Err(DispatchError::Closed);
        }
        let camera = self.camera;
        let section = self
            .sections
            .get_mut(&pos)
            .ok_or(DispatchError::UnknownSection(pos))?;
        if section.has_pending_rebuild() {
            return Ok(false);
        }
        let Some(mesh) = section.mesh.compiled() else {
            return Ok(false);
        };
        if !mesh.has_layer(RenderLayer::Translucent) {
            return Ok(false);
        }
        let Some(sort_state) = mesh.sort_state() else {
            return Ok(false);
        };

        let point_of_view = TranslucencyPointOfView::of(camera, pos);
        let pending = section.has_pending_resort();
        let last = if pending {
            section.pending_resort_pov
        } else {
            mesh.point_of_view()
        };
        let forced = camera_moved && point_of_view.is_axis_aligned() && !pending;
        if last == Some(point_of_view) && !forced {
            return Ok(false);
        }

        let task = CompileTask::resort(pos, Arc::clone(sort_state));
        if let Some(previous) = section.last_resort.replace(task.handle().clone()) {
            previous.cancel();
        }
        section.pending_resort_pov = Some(point_of_view);
        self.shared.queue.add(task);
        self.shared.request_pump();
        Ok(true)
    }

    /// Per-frame translucency pass over `sections`, nearest first.
    ///
    /// Schedules at most `max_resorts_per_frame` resorts. When the camera
    /// moved, sections it is level with on some axis are resorted even if
    /// their point of view is unchanged. Returns the number scheduled.
    pub fn resort_translucent(&mut self, sections: &[SectionPos], camera_moved: bool) -> usize {
        let camera = self.camera;
        let mut ordered = sections.to_vec();
        ordered.sort_by(|a, b| {
            a.center()
                .distance_squared(camera)
                .total_cmp(&b.center().distance_squared(camera))
        });

        let mut scheduled = 0;
        for pos in ordered {
            if scheduled >= self.config.max_resorts_per_frame {
                break;
            }
            match self.schedule_resort_inner(pos, camera_moved) {
                Ok(true) => scheduled += 1,
                Ok(false) | Err(DispatchError::UnknownSection(_)) => {}
                Err(err) => {
                    tracing::debug!("Resort pass stopped: {err}");
                    break;
                }
            }
        }
        scheduled
    }

    /// Compiles and uploads `pos` on the calling thread, bypassing the queue.
    pub fn compile_sync(&mut self, pos: SectionPos, cache: &mut RegionCache) -> Result<(), DispatchError> {
        if self.disposed {
            return Err(DispatchError::Closed);
        }
        let camera = self.camera;
        let section = self
            .sections
            .get_mut(&pos)
            .ok_or(DispatchError::UnknownSection(pos))?;
        section.cancel_tasks();
        section.set_not_dirty();

        let Some(region) = cache.create_region(self.level.as_ref(), pos) else {
            install_mesh(section, SectionMesh::Empty, &mut self.close_queue);
            return Ok(());
        };
        let sorting = VertexSorting::for_camera(camera, pos.origin().as_dvec3());
        let mut results = match self
            .shared
            .compiler
            .compile(pos, &region, &sorting, &mut self.sync_pack)
        {
            Ok(results) => results,
            Err(err) => {
                section.set_dirty(false);
                return Err(err.into());
            }
        };
        let uploaded = match self
            .quad_indices
            .reserve_for(&mut self.backend, &results, &mut self.close_queue)
        {
            Ok(()) => CompiledSectionMesh::upload(
                &mut self.backend,
                pos,
                &mut results,
                TranslucencyPointOfView::of(camera, pos),
            ),
            Err(err) => Err(err),
        };
        recycle_results(results, &mut self.sync_pack);
        match uploaded {
            Ok(mesh) => {
                install_mesh(section, SectionMesh::Compiled(Box::new(mesh)), &mut self.close_queue);
                Ok(())
            }
            Err(err) => {
                section.set_dirty(false);
                Err(err.into())
            }
        }
    }

    // -- per-frame upload ---------------------------------------------------

    /// Applies every finished task's result, closes retired buffers, and
    /// surfaces failures. Call once per frame. Returns the results applied.
    pub fn upload_all_pending_uploads(&mut self) -> usize {
        let surfaced_from = self.failures.len();
        let mut applied = 0;
        while let Ok(message) = self.uploads.try_recv() {
            match message {
                UploadMessage::Ready(upload) => {
                    if self.apply_upload(upload) {
                        applied += 1;
                    }
                }
                UploadMessage::Failed { section, handle } => {
                    handle.mark_completed();
                    if let Some(render) = self.sections.get_mut(&section)
                        && render.last_rebuild.as_ref().is_some_and(|h| h.same_task(&handle))
                    {
                        render.set_dirty(false);
                    }
                }
            }
        }

        for buffer in self.close_queue.drain(..) {
            self.backend.close_buffer(buffer);
        }

        self.failures.extend(self.failure_rx.try_iter());
        let surfaced = &self.failures[surfaced_from..];
        if !surfaced.is_empty() {
            tracing::error!("{} section task(s) failed", surfaced.len());
            for failure in surfaced {
                tracing::error!("{failure}");
            }
        }

        if !self.disposed {
            self.shared.request_pump();
        }
        applied
    }

    fn apply_upload(&mut self, upload: Upload) -> bool {
        let Upload {
            section: pos,
            handle,
            payload,
            mut pack,
        } = upload;
        handle.mark_completed();

        let disposed = self.disposed;
        let live = self
            .sections
            .get_mut(&pos)
            .filter(|section| !disposed && is_current(section, &handle));
        let Some(section) = live else {
            tracing::debug!("Discarding stale result for {pos:?}");
            recycle(payload, &mut pack);
            self.shared.pool.release(pack);
            return false;
        };

        let outcome = match payload {
            Payload::Empty => {
                install_mesh(section, SectionMesh::Empty, &mut self.close_queue);
                Ok(())
            }
            Payload::Rebuilt {
                mut results,
                point_of_view,
            } => {
                let uploaded = match self
                    .quad_indices
                    .reserve_for(&mut self.backend, &results, &mut self.close_queue)
                {
                    Ok(()) => CompiledSectionMesh::upload(&mut self.backend, pos, &mut results, point_of_view),
                    Err(err) => Err(err),
                };
                recycle_results(results, &mut pack);
                match uploaded {
                    Ok(mesh) => {
                        install_mesh(section, SectionMesh::Compiled(Box::new(mesh)), &mut self.close_queue);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Payload::Resorted {
                indices,
                point_of_view,
            } => {
                section.pending_resort_pov = None;
                match section.mesh.compiled_mut() {
                    Some(mesh) => {
                        match mesh.replace_translucent_indices(&mut self.backend, pos, &indices, point_of_view) {
                            Ok(retired) => {
                                self.close_queue.extend(retired);
                                Ok(())
                            }
                            Err(err) => Err(err),
                        }
                    }
                    None => Ok(()),
                }
            }
        };
        self.shared.pool.release(pack);

        match outcome {
            Ok(()) => true,
            Err(err) => {
                section.set_dirty(false);
                self.failures.push(CompileFailure {
                    section: pos,
                    kind: "upload",
                    message: err.to_string(),
                });
                false
            }
        }
    }

    /// Takes the failures surfaced so far.
    pub fn take_failures(&mut self) -> Vec<CompileFailure> {
        mem::take(&mut self.failures)
    }

    /// Current counters.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.shared.queue.size(),
            pending_uploads: self.uploads.len(),
            free_buffers: self.shared.pool.free_count(),
            running: self.shared.running.load(Ordering::Acquire),
            sections: self.sections.len(),
            failures: self.failures.len(),
        }
    }

    /// Shuts the pipeline down and releases every GPU buffer. Idempotent.
    ///
    /// Workers are joined first, so no result can arrive afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queue.clear();
        self.executor.shutdown();

        while let Ok(message) = self.uploads.try_recv() {
            match message {
                UploadMessage::Ready(upload) => {
                    upload.handle.mark_completed();
                    self.shared.pool.release(upload.pack);
                }
                UploadMessage::Failed { handle, .. } => handle.mark_completed(),
            }
        }
        self.failures.extend(self.failure_rx.try_iter());

        for section in self.sections.values_mut() {
            section.cancel_tasks();
            self.close_queue
                .extend(mem::take(&mut section.mesh).into_buffers());
        }
        self.close_queue.extend(self.quad_indices.take_buffers());
        let closed = self.close_queue.len();
        for buffer in self.close_queue.drain(..) {
            self.backend.close_buffer(buffer);
        }
        tracing::info!("Section dispatcher disposed, closed {closed} buffers");
    }
}

impl<B: GpuBackend> Drop for SectionRenderDispatcher<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
