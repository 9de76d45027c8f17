//! Coarse camera octant relative to a section, used to decide when the
//! translucent draw order of that section has gone stale.

use glam::DVec3;
use nebula_voxel::{SECTION_SIZE, SectionPos};

/// Camera section offset from a section, each axis clamped to `-1..=1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TranslucencyPointOfView {
    x: i8,
    y: i8,
    z: i8,
}

impl TranslucencyPointOfView {
    /// Classifies `camera` (world space) against `section`.
    pub fn of(camera: DVec3, section: SectionPos) -> Self {
        let size = SECTION_SIZE as f64;
        let axis = |cam: f64, sec: i32| -> i8 {
            let delta = (cam / size).floor() as i64 - sec as i64;
            delta.clamp(-1, 1) as i8
        };
        Self {
            x: axis(camera.x, section.x),
            y: axis(camera.y, section.y),
            z: axis(camera.z, section.z),
        }
    }

    /// Returns `true` if the camera is level with the section on any axis.
    pub fn is_axis_aligned(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    /// The clamped `(x, y, z)` components.
    pub fn components(&self) -> [i8; 3] {
        [self.x, self.y, self.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_clamp() {
        let pov = TranslucencyPointOfView::of(DVec3::new(1000.0, -1000.0, 8.0), SectionPos::new(0, 0, 0));
        assert_eq!(pov.components(), [1, -1, 0]);
        assert!(pov.is_axis_aligned());
    }

    /// Any two points in the same far octant compare equal.
    #[test]
    fn test_same_octant_is_equal() {
        let section = SectionPos::new(2, 0, 2);
        let a = TranslucencyPointOfView::of(DVec3::new(100.0, 40.0, 100.0), section);
        let b = TranslucencyPointOfView::of(DVec3::new(60.0, 90.0, 300.0), section);
        assert_eq!(a, b);
        assert!(!a.is_axis_aligned());
    }

    /// Crossing into the section's own slab on one axis changes the value.
    #[test]
    fn test_crossing_boundary_changes_value() {
        let section = SectionPos::new(0, 0, 0);
        let before = TranslucencyPointOfView::of(DVec3::new(-0.5, 20.0, 20.0), section);
        let after = TranslucencyPointOfView::of(DVec3::new(0.5, 20.0, 20.0), section);
        assert_eq!(before.components(), [-1, 1, 1]);
        assert_eq!(after.components(), [0, 1, 1]);
        assert_ne!(before, after);
    }
}
