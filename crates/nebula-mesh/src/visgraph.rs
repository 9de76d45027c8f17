//! Face-to-face connectivity through empty space inside a section.
//!
//! [`VisibilityGraph`] collects the opaque voxels of a section while it is
//! compiled, then flood-fills the empty space from the section boundary.
//! Every connected component of empty voxels contributes the set of outer
//! faces it touches; all pairs among those faces become visible in the
//! resulting [`VisibilitySet`]. Occlusion culling walks that set to decide
//! whether looking *through* a section from one face can reach another.

use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use bitvec::prelude::*;
use nebula_voxel::{SECTION_SIZE, SECTION_VOLUME, section_index};

use crate::face_direction::FaceDirection;

/// Below this many empty voxels a section is treated as fully enclosed.
pub const MIN_EMPTY_FOR_FLOOD: usize = 256;

const EDGE: usize = SECTION_SIZE - 1;

/// Indices of every voxel lying on at least one section face.
static BOUNDARY_INDICES: LazyLock<Vec<u16>> = LazyLock::new(|| {
    let mut out = Vec::with_capacity(SECTION_VOLUME - (SECTION_SIZE - 2).pow(3));
    for y in 0..SECTION_SIZE {
        for z in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                if [x, y, z].iter().any(|&c| c == 0 || c == EDGE) {
                    out.push(section_index(x, y, z) as u16);
                }
            }
        }
    }
    out
});

// ---------------------------------------------------------------------------
// VisibilitySet
// ---------------------------------------------------------------------------

/// Symmetric 6×6 matrix of "can see from face a to face b".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VisibilitySet {
    bits: u64,
}

impl VisibilitySet {
    /// Every pair visible.
    pub fn all_visible() -> Self {
        let mut set = Self::default();
        set.set_all(true);
        set
    }

    fn bit(a: FaceDirection, b: FaceDirection) -> u64 {
        1 << (a.index() * 6 + b.index())
    }

    /// Returns `true` if empty space connects face `a` to face `b`.
    pub fn visibility_between(&self, a: FaceDirection, b: FaceDirection) -> bool {
        self.bits & Self::bit(a, b) != 0
    }

    /// Sets both `(a, b)` and `(b, a)`.
    pub fn set(&mut self, a: FaceDirection, b: FaceDirection, visible: bool) {
        let mask = Self::bit(a, b) | Self::bit(b, a);
        if visible {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    /// Sets every pair.
    pub fn set_all(&mut self, visible: bool) {
        self.bits = if visible { (1 << 36) - 1 } else { 0 };
    }

    /// Returns `true` if any pair is visible.
    pub fn any_visible(&self) -> bool {
        self.bits != 0
    }
}

impl fmt::Debug for VisibilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for a in FaceDirection::ALL {
            for b in FaceDirection::ALL {
                if a <= b && self.visibility_between(a, b) {
                    list.entry(&(a, b));
                }
            }
        }
        list.finish()
    }
}

// ---------------------------------------------------------------------------
// VisibilityGraph
// ---------------------------------------------------------------------------

/// Opacity bitset of one section, resolved into a [`VisibilitySet`].
#[derive(Clone, Debug)]
pub struct VisibilityGraph {
    opaque: BitVec<u64, Lsb0>,
    empty: usize,
}

impl VisibilityGraph {
    /// A graph with every voxel empty.
    pub fn new() -> Self {
        Self {
            opaque: BitVec::repeat(false, SECTION_VOLUME),
            empty: SECTION_VOLUME,
        }
    }

    /// Marks local `(x, y, z)` as blocking.
    pub fn set_opaque(&mut self, x: usize, y: usize, z: usize) {
        let index = section_index(x, y, z);
        if !self.opaque[index] {
            self.opaque.set(index, true);
            self.empty -= 1;
        }
    }

    /// Returns `true` if local `(x, y, z)` was marked opaque.
    pub fn is_opaque(&self, x: usize, y: usize, z: usize) -> bool {
        self.opaque[section_index(x, y, z)]
    }

    /// Number of empty voxels.
    pub fn empty_count(&self) -> usize {
        self.empty
    }

    /// Flood-fills the empty space and reports which faces connect.
    pub fn resolve(&self) -> VisibilitySet {
        let mut set = VisibilitySet::default();
        if self.empty < MIN_EMPTY_FOR_FLOOD {
            return set;
        }
        if self.empty == SECTION_VOLUME {
            set.set_all(true);
            return set;
        }

        let mut visited = self.opaque.clone();
        let mut queue = VecDeque::new();
        for &start in BOUNDARY_INDICES.iter() {
            let start = start as usize;
            if visited[start] {
                continue;
            }
            let faces = flood_fill(start, &mut visited, &mut queue);
            for a in FaceDirection::ALL {
                if faces & (1 << a.index()) == 0 {
                    continue;
                }
                for b in FaceDirection::ALL {
                    if faces & (1 << b.index()) != 0 {
                        set.set(a, b, true);
                    }
                }
            }
        }
        set
    }
}

impl Default for VisibilityGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Breadth-first fill from `start`; returns a bitmask of touched faces.
fn flood_fill(start: usize, visited: &mut BitVec<u64, Lsb0>, queue: &mut VecDeque<usize>) -> u8 {
    let mut faces = 0u8;
    visited.set(start, true);
    queue.push_back(start);

    while let Some(index) = queue.pop_front() {
        let (x, y, z) = (index & 0xF, index >> 8, (index >> 4) & 0xF);
        faces |= touched_faces(x, y, z);

        for dir in FaceDirection::ALL {
            let Some(next) = neighbor(x, y, z, dir) else {
                continue;
            };
            if !visited[next] {
                visited.set(next, true);
                queue.push_back(next);
            }
        }
    }
    faces
}

fn touched_faces(x: usize, y: usize, z: usize) -> u8 {
    let mut faces = 0u8;
    let mut touch = |dir: FaceDirection| faces |= 1 << dir.index();
    if x == 0 {
        touch(FaceDirection::NegX);
    } else if x == EDGE {
        touch(FaceDirection::PosX);
    }
    if y == 0 {
        touch(FaceDirection::NegY);
    } else if y == EDGE {
        touch(FaceDirection::PosY);
    }
    if z == 0 {
        touch(FaceDirection::NegZ);
    } else if z == EDGE {
        touch(FaceDirection::PosZ);
    }
    faces
}

fn neighbor(x: usize, y: usize, z: usize, dir: FaceDirection) -> Option<usize> {
    let step = dir.step();
    let nx = x.checked_add_signed(step.x as isize)?;
    let ny = y.checked_add_signed(step.y as isize)?;
    let nz = z.checked_add_signed(step.z as isize)?;
    if nx > EDGE || ny > EDGE || nz > EDGE {
        return None;
    }
    Some(section_index(nx, ny, nz))
}
