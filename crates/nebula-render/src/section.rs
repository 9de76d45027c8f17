//! Per-section render state owned by the dispatcher.

use std::time::{Duration, Instant};

use glam::DVec3;
use nebula_voxel::{SECTION_SIZE, SectionPos};

use crate::compiled_mesh::SectionMesh;
use crate::point_of_view::TranslucencyPointOfView;
use crate::task::TaskHandle;

/// One loaded section as seen by the renderer.
///
/// Lives in the dispatcher's arena keyed by its [`SectionPos`]; tasks
/// refer back to it by that key, never by reference.
#[derive(Debug)]
pub struct RenderSection {
    pos: SectionPos,
    pub(crate) mesh: SectionMesh,
    pub(crate) dirty: bool,
    pub(crate) player_changed: bool,
    pub(crate) uploaded_at: Option<Instant>,
    pub(crate) last_rebuild: Option<TaskHandle>,
    pub(crate) last_resort: Option<TaskHandle>,
    pub(crate) pending_resort_pov: Option<TranslucencyPointOfView>,
}

impl RenderSection {
    /// A new, dirty, uncompiled section.
    pub fn new(pos: SectionPos) -> Self {
        Self {
            pos,
            mesh: SectionMesh::Uncompiled,
            dirty: true,
            player_changed: false,
            uploaded_at: None,
            last_rebuild: None,
            last_resort: None,
            pending_resort_pov: None,
        }
    }

    /// Section coordinate.
    pub fn pos(&self) -> SectionPos {
        self.pos
    }

    /// Packed 64-bit key, see [`SectionPos::as_long`].
    pub fn id(&self) -> u64 {
        self.pos.as_long()
    }

    /// World-space bounding box `(min, max)`.
    pub fn bounds(&self) -> (DVec3, DVec3) {
        let min = self.pos.origin().as_dvec3();
        (min, min + DVec3::splat(SECTION_SIZE as f64))
    }

    /// Current mesh.
    pub fn mesh(&self) -> &SectionMesh {
        &self.mesh
    }

    /// Returns `true` if the section needs a rebuild.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns `true` if the pending rebuild was caused by a player edit.
    pub fn is_dirty_from_player(&self) -> bool {
        self.dirty && self.player_changed
    }

    /// Marks the section for rebuild.
    pub fn set_dirty(&mut self, player_changed: bool) {
        let was_dirty = self.dirty;
        self.dirty = true;
        self.player_changed = (was_dirty && self.player_changed) || player_changed;
    }

    pub(crate) fn set_not_dirty(&mut self) {
        self.dirty = false;
        self.player_changed = false;
    }

    /// Returns `true` while a rebuild is queued or running.
    pub fn has_pending_rebuild(&self) -> bool {
        self.last_rebuild.as_ref().is_some_and(TaskHandle::is_pending)
    }

    /// Returns `true` while a resort is queued or running.
    pub fn has_pending_resort(&self) -> bool {
        self.last_resort.as_ref().is_some_and(TaskHandle::is_pending)
    }

    /// Fade-in factor `0.0..=1.0` since the last upload.
    pub fn visibility_fade(&self, now: Instant, fade_in: Duration) -> f32 {
        match self.uploaded_at {
            None => 0.0,
            Some(_) if fade_in.is_zero() => 1.0,
            Some(at) => {
                let elapsed = now.saturating_duration_since(at);
                (elapsed.as_secs_f32() / fade_in.as_secs_f32()).min(1.0)
            }
        }
    }

    /// Cancels outstanding tasks.
    ///
    /// A rebuild that hadn't finished leaves the section dirty again so the
    /// next scheduling pass picks it up.
    pub(crate) fn cancel_tasks(&mut self) {
        if let Some(handle) = self.last_rebuild.take() {
            if handle.is_pending() {
                self.dirty = true;
            }
            handle.cancel();
        }
        if let Some(handle) = self.last_resort.take() {
            handle.cancel();
        }
        self.pending_resort_pov = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_section_is_dirty_and_uncompiled() {
        let section = RenderSection::new(SectionPos::new(1, 2, 3));
        assert!(section.is_dirty());
        assert!(!section.is_dirty_from_player());
        assert!(section.mesh().is_uncompiled());
        assert_eq!(section.id(), SectionPos::new(1, 2, 3).as_long());
        assert_eq!(section.bounds().0, DVec3::new(16.0, 32.0, 48.0));
    }

    /// The player flag sticks until the section is cleaned.
    #[test]
    fn test_player_flag_accumulates() {
        let mut section = RenderSection::new(SectionPos::new(0, 0, 0));
        section.set_not_dirty();
        section.set_dirty(true);
        section.set_dirty(false);
        assert!(section.is_dirty_from_player());
        section.set_not_dirty();
        section.set_dirty(false);
        assert!(!section.is_dirty_from_player());
    }

    /// Cancelling an unfinished rebuild re-marks the section dirty.
    #[test]
    fn test_cancel_pending_rebuild_redirties() {
        let mut section = RenderSection::new(SectionPos::new(0, 0, 0));
        let handle = TaskHandle::new();
        section.last_rebuild = Some(handle.clone());
        section.set_not_dirty();
        section.cancel_tasks();
        assert!(handle.is_cancelled());
        assert!(section.is_dirty());
        assert!(section.last_rebuild.is_none());
    }

    #[test]
    fn test_cancel_completed_rebuild_keeps_clean() {
        let mut section = RenderSection::new(SectionPos::new(0, 0, 0));
        let handle = TaskHandle::new();
        handle.mark_completed();
        section.last_rebuild = Some(handle);
        section.set_not_dirty();
        section.cancel_tasks();
        assert!(!section.is_dirty());
    }

    #[test]
    fn test_visibility_fade() {
        let mut section = RenderSection::new(SectionPos::new(0, 0, 0));
        let now = Instant::now();
        let fade = Duration::from_millis(1000);
        assert_eq!(section.visibility_fade(now, fade), 0.0);
        section.uploaded_at = Some(now);
        assert!((section.visibility_fade(now + Duration::from_millis(500), fade) - 0.5).abs() < 1e-3);
        assert_eq!(section.visibility_fade(now + Duration::from_secs(5), fade), 1.0);
        assert_eq!(section.visibility_fade(now, Duration::ZERO), 1.0);
    }
}
