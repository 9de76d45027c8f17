//! Section coordinates and their packed 64-bit key.

use glam::{DVec3, IVec3};

use crate::section::SECTION_SIZE;

/// `log2(SECTION_SIZE)`.
pub const SECTION_BITS: i32 = 4;

const PACKED_XZ_BITS: u32 = 22;
const PACKED_Y_BITS: u32 = 20;
const XZ_MASK: u64 = (1 << PACKED_XZ_BITS) - 1;
const Y_MASK: u64 = (1 << PACKED_Y_BITS) - 1;
const Z_SHIFT: u32 = PACKED_Y_BITS;
const X_SHIFT: u32 = PACKED_Y_BITS + PACKED_XZ_BITS;

/// Integer coordinate of a 16³ section.
///
/// X and Z have 22 bits of range, Y has 20, so the three fit in one `u64`
/// key ([`Self::as_long`]) used to identify render sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SectionPos {
    /// Section-grid X.
    pub x: i32,
    /// Section-grid Y.
    pub y: i32,
    /// Section-grid Z.
    pub z: i32,
}

impl SectionPos {
    /// Creates a section coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The section containing the block at `pos`.
    pub fn of_block(pos: IVec3) -> Self {
        Self::new(
            pos.x >> SECTION_BITS,
            pos.y >> SECTION_BITS,
            pos.z >> SECTION_BITS,
        )
    }

    /// The section containing the world-space point `pos`.
    pub fn of_point(pos: DVec3) -> Self {
        Self::of_block(pos.floor().as_ivec3())
    }

    /// Packs the coordinate into a single key (`x:22 | z:22 | y:20`, high to low).
    pub fn as_long(self) -> u64 {
        ((self.x as i64 as u64 & XZ_MASK) << X_SHIFT)
            | ((self.z as i64 as u64 & XZ_MASK) << Z_SHIFT)
            | (self.y as i64 as u64 & Y_MASK)
    }

    /// Unpacks a key produced by [`Self::as_long`], restoring signs.
    pub fn from_long(packed: u64) -> Self {
        let p = packed as i64;
        Self::new(
            (p >> X_SHIFT) as i32,
            ((p << (64 - PACKED_Y_BITS)) >> (64 - PACKED_Y_BITS)) as i32,
            ((p << PACKED_XZ_BITS) >> X_SHIFT) as i32,
        )
    }

    /// Minimum block corner of the section.
    pub fn origin(self) -> IVec3 {
        IVec3::new(
            self.x << SECTION_BITS,
            self.y << SECTION_BITS,
            self.z << SECTION_BITS,
        )
    }

    /// World-space center of the section.
    pub fn center(self) -> DVec3 {
        self.origin().as_dvec3() + DVec3::splat(SECTION_SIZE as f64 / 2.0)
    }

    /// Returns the coordinate offset by `(dx, dy, dz)` sections.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// This section and its 26 neighbours, x fastest then z then y.
    pub fn cube_around(self) -> impl Iterator<Item = SectionPos> {
        (-1..=1).flat_map(move |dy| {
            (-1..=1).flat_map(move |dz| (-1..=1).map(move |dx| self.offset(dx, dy, dz)))
        })
    }
}

impl From<SectionPos> for IVec3 {
    fn from(pos: SectionPos) -> Self {
        IVec3::new(pos.x, pos.y, pos.z)
    }
}
