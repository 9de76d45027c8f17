//! GPU side of section meshing: compile task scheduling, worker threads,
//! staging buffer pooling, and single-threaded upload of finished meshes.

pub mod buffer_pool;
pub mod compiled_mesh;
pub mod dispatcher;
mod executor;
pub mod gpu;
pub mod point_of_view;
pub mod quad_indices;
pub mod section;
pub mod task;
pub mod task_queue;

pub use buffer_pool::{MAX_RETAINED_PACK_BYTES, SectionBufferPool};
pub use compiled_mesh::{CompiledSectionMesh, LayerBuffers, SectionMesh};
pub use dispatcher::{
    CompileFailure, DispatchError, DispatcherConfig, DispatcherStats, SectionRenderDispatcher,
};
pub use gpu::{BufferId, BufferKind, GpuBackend, GpuBuffer, GpuError, MemoryBackend, WgpuBackend};
pub use point_of_view::TranslucencyPointOfView;
pub use quad_indices::{MIN_SHARED_QUADS, QuadIndexBuffers};
pub use section::RenderSection;
pub use task::{CompileTask, TaskHandle, TaskKind};
pub use task_queue::{CompileTaskQueue, DEFAULT_RECOMPILE_QUOTA};
