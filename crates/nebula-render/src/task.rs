//! Single-use compile tasks and their shared cancel/completion flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;
use nebula_mesh::{RegionSnapshot, SortState};
use nebula_voxel::SectionPos;

/// Cancel and completion flags shared between a task and its section.
#[derive(Clone, Debug, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicBool>,
}

impl TaskHandle {
    /// A fresh, pending handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Self::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Records that the task ran to its end (uploaded, failed, or dropped).
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    /// Returns `true` once the task finished.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Neither cancelled nor completed.
    pub fn is_pending(&self) -> bool {
        !self.is_cancelled() && !self.is_completed()
    }

    /// Returns `true` if both handles refer to the same task.
    pub fn same_task(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// What a task does.
pub enum TaskKind {
    /// Full geometry rebuild from a snapshot; `None` means the section is empty.
    Rebuild {
        /// Snapshot taken at schedule time.
        region: Option<RegionSnapshot>,
    },
    /// Index-only re-sort of the translucent layer.
    ResortTransparency {
        /// Centroids captured by the last rebuild.
        sort_state: Arc<SortState>,
    },
}

/// One unit of work for the compile workers.
pub struct CompileTask {
    /// Section being compiled.
    pub section: SectionPos,
    /// World-space center used for distance ordering.
    pub origin: DVec3,
    /// `false` only for the first rebuild of a section.
    pub is_recompile: bool,
    /// The work itself.
    pub kind: TaskKind,
    handle: TaskHandle,
}

impl CompileTask {
    /// A rebuild task. `is_recompile` is `false` for a never-compiled section.
    pub fn rebuild(section: SectionPos, region: Option<RegionSnapshot>, is_recompile: bool) -> Self {
        Self {
            section,
            origin: section.center(),
            is_recompile,
            kind: TaskKind::Rebuild { region },
            handle: TaskHandle::new(),
        }
    }

    /// A translucency resort task. Always counts as a recompile.
    ///
    /// Indices are sorted for the camera position current when a worker
    /// picks the task up.
    pub fn resort(section: SectionPos, sort_state: Arc<SortState>) -> Self {
        Self {
            section,
            origin: section.center(),
            is_recompile: true,
            kind: TaskKind::ResortTransparency { sort_state },
            handle: TaskHandle::new(),
        }
    }

    /// The task's flags.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Shorthand for `handle().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Squared distance from `camera` to the task's origin.
    pub fn distance_squared(&self, camera: DVec3) -> f64 {
        self.origin.distance_squared(camera)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            TaskKind::Rebuild { .. } => "rebuild",
            TaskKind::ResortTransparency { .. } => "resort",
        }
    }
}
