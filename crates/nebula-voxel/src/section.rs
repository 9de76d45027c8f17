//! Palette-compressed storage for one 16×16×16 section of block states.
//!
//! Each section keeps a palette of the distinct [`BlockStateId`] values it
//! contains plus a [`PackedIndices`] array. A uniform section (all air, or all
//! stone) stores no indices at all, which makes cloning a section for an
//! off-thread snapshot cheap.

use crate::block::BlockStateId;
use crate::packed_indices::PackedIndices;

/// Side length of a section in voxels.
pub const SECTION_SIZE: usize = 16;

/// Number of voxels in a section (16³).
pub const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;

/// Linear index of a local coordinate: `x | z << 4 | y << 8`.
pub fn section_index(x: usize, y: usize, z: usize) -> usize {
    debug_assert!(x < SECTION_SIZE && y < SECTION_SIZE && z < SECTION_SIZE);
    x | (z << 4) | (y << 8)
}

/// Block states of a single section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionData {
    palette: Vec<BlockStateId>,
    indices: PackedIndices,
}

impl SectionData {
    /// Creates a section filled with `fill`.
    pub fn new(fill: BlockStateId) -> Self {
        Self {
            palette: vec![fill],
            indices: PackedIndices::new(0, SECTION_VOLUME),
        }
    }

    /// Creates an all-air section.
    pub fn new_air() -> Self {
        Self::new(BlockStateId::AIR)
    }

    /// Returns the state at local `(x, y, z)`, each in `0..16`.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockStateId {
        self.get_index(section_index(x, y, z))
    }

    /// Returns the state at a linear [`section_index`].
    pub fn get_index(&self, index: usize) -> BlockStateId {
        self.palette[self.indices.get(index) as usize]
    }

    /// Sets the state at local `(x, y, z)`, growing the palette if needed.
    pub fn set(&mut self, x: usize, y: usize, z: usize, state: BlockStateId) {
        let palette_index = self.palette_index_or_insert(state);
        self.indices.set(section_index(x, y, z), palette_index);
    }

    /// Resets the whole section to `state`.
    pub fn fill(&mut self, state: BlockStateId) {
        self.palette = vec![state];
        self.indices = PackedIndices::new(0, SECTION_VOLUME);
    }

    /// Returns `true` if every voxel is air.
    pub fn is_empty(&self) -> bool {
        if self.palette.iter().all(|id| id.is_air()) {
            return true;
        }
        if self.indices.bits() == 0 {
            return false;
        }
        (0..SECTION_VOLUME).all(|i| self.get_index(i).is_air())
    }

    /// Number of palette entries (some may be unused until [`Self::compact`]).
    pub fn palette_len(&self) -> usize {
        self.palette.len()
    }

    /// The palette itself.
    pub fn palette(&self) -> &[BlockStateId] {
        &self.palette
    }

    /// Current bits per voxel index.
    pub fn bits(&self) -> u8 {
        self.indices.bits()
    }

    /// Heap bytes used by the index storage.
    pub fn storage_bytes(&self) -> usize {
        self.indices.storage_bytes()
    }

    /// Drops unused palette entries and narrows the index width when possible.
    ///
    /// Scans all 4096 voxels, so call it when a section is done changing, not
    /// after every `set`.
    pub fn compact(&mut self) {
        if self.indices.bits() == 0 {
            return;
        }
        let mut used = vec![false; self.palette.len()];
        for i in 0..SECTION_VOLUME {
            used[self.indices.get(i) as usize] = true;
        }

        let mut remap = vec![0u16; self.palette.len()];
        let mut palette = Vec::new();
        for (old, &is_used) in used.iter().enumerate() {
            if is_used {
                remap[old] = palette.len() as u16;
                palette.push(self.palette[old]);
            }
        }

        let mut indices = PackedIndices::new(bits_for_palette(palette.len()), SECTION_VOLUME);
        if indices.bits() > 0 {
            for i in 0..SECTION_VOLUME {
                indices.set(i, remap[self.indices.get(i) as usize]);
            }
        }
        self.palette = palette;
        self.indices = indices;
    }

    fn palette_index_or_insert(&mut self, state: BlockStateId) -> u16 {
        if let Some(i) = self.palette.iter().position(|&s| s == state) {
            return i as u16;
        }
        let bits = bits_for_palette(self.palette.len() + 1);
        if bits != self.indices.bits() {
            self.indices = self.indices.resized(bits);
        }
        self.palette.push(state);
        (self.palette.len() - 1) as u16
    }
}

impl Default for SectionData {
    fn default() -> Self {
        Self::new_air()
    }
}

/// Smallest index width able to address `len` palette entries.
fn bits_for_palette(len: usize) -> u8 {
    if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as u8
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_section_is_uniform_air() {
        let section = SectionData::new_air();
        assert!(section.is_empty());
        assert_eq!(section.bits(), 0);
        assert_eq!(section.storage_bytes(), 0);
        assert_eq!(section.get(15, 15, 15), BlockStateId::AIR);
    }

    /// Index layout puts x lowest, then z, then y.
    #[test]
    fn test_index_layout() {
        assert_eq!(section_index(1, 0, 0), 1);
        assert_eq!(section_index(0, 0, 1), 16);
        assert_eq!(section_index(0, 1, 0), 256);
        assert_eq!(section_index(15, 15, 15), 4095);
    }

    #[test]
    fn test_set_and_get_grows_palette() {
        let mut section = SectionData::new_air();
        section.set(8, 8, 8, BlockStateId(3));
        section.set(0, 0, 0, BlockStateId(5));
        assert_eq!(section.get(8, 8, 8), BlockStateId(3));
        assert_eq!(section.get(0, 0, 0), BlockStateId(5));
        assert_eq!(section.get(1, 0, 0), BlockStateId::AIR);
        assert_eq!(section.palette_len(), 3);
        assert_eq!(section.bits(), 2);
        assert!(!section.is_empty());
    }

    #[test]
    fn test_palette_bit_width_steps() {
        assert_eq!(bits_for_palette(1), 0);
        assert_eq!(bits_for_palette(2), 1);
        assert_eq!(bits_for_palette(3), 2);
        assert_eq!(bits_for_palette(16), 4);
        assert_eq!(bits_for_palette(17), 5);
    }

    /// Overwriting the only non-air block leaves a palette that compacts back to uniform.
    #[test]
    fn test_compact_collapses_to_uniform() {
        let mut section = SectionData::new_air();
        section.set(4, 4, 4, BlockStateId(2));
        section.set(4, 4, 4, BlockStateId::AIR);
        assert!(section.is_empty());
        section.compact();
        assert_eq!(section.palette_len(), 1);
        assert_eq!(section.bits(), 0);
    }

    #[test]
    fn test_compact_preserves_contents() {
        let mut section = SectionData::new_air();
        for i in 0..10u16 {
            section.set(i as usize, 0, 0, BlockStateId(i + 1));
        }
        for i in 0..5 {
            section.set(i, 0, 0, BlockStateId(7));
        }
        let before: Vec<_> = (0..SECTION_VOLUME).map(|i| section.get_index(i)).collect();
        section.compact();
        let after: Vec<_> = (0..SECTION_VOLUME).map(|i| section.get_index(i)).collect();
        assert_eq!(before, after);
        assert!(section.palette_len() < 11);
    }

    #[test]
    fn test_fill_resets_storage() {
        let mut section = SectionData::new_air();
        section.set(1, 2, 3, BlockStateId(9));
        section.fill(BlockStateId(1));
        assert_eq!(section.get(1, 2, 3), BlockStateId(1));
        assert_eq!(section.bits(), 0);
    }
}
