//! Immutable 3×3×3-section views used by compile workers.
//!
//! A [`RegionCache`] lives for one scheduling pass (typically one frame). It
//! copies each section out of the [`LevelReader`] at most once, so
//! neighbouring sections scheduled in the same pass share their copies. Each
//! [`RegionSnapshot`] holds `Arc`s to 27 of those copies and is owned by
//! exactly one compile task.

use std::sync::Arc;

use glam::IVec3;
use rustc_hash::FxHashMap;

use nebula_voxel::{
    BlockDef, BlockEntity, BlockRegistry, BlockStateId, FULL_BRIGHT, FluidState, LevelReader,
    SECTION_SIZE, SectionCopy, SectionPos, section_index,
};

/// Number of sections in a region (3³).
pub const REGION_SECTIONS: usize = 27;

/// Per-pass cache of section copies.
#[derive(Default)]
pub struct RegionCache {
    sections: FxHashMap<SectionPos, Option<Arc<SectionCopy>>>,
}

impl RegionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the snapshot for `section` and its 26 neighbours.
    ///
    /// Returns `None` when the center section isn't loaded or holds only air;
    /// such a section has no geometry to compile.
    pub fn create_region(
        &mut self,
        level: &dyn LevelReader,
        section: SectionPos,
    ) -> Option<RegionSnapshot> {
        let center = self.copy(level, section)?;
        if center.is_empty() {
            return None;
        }

        let mut sections: [Option<Arc<SectionCopy>>; REGION_SECTIONS] = Default::default();
        for (slot, pos) in sections.iter_mut().zip(section.cube_around()) {
            *slot = self.copy(level, pos);
        }

        Some(RegionSnapshot {
            registry: Arc::clone(level.registry()),
            center_pos: section,
            origin: section.origin(),
            center,
            sections,
        })
    }

    /// Number of sections copied so far (loaded or not).
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns `true` if nothing has been copied yet.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Drops every cached copy.
    pub fn clear(&mut self) {
        self.sections.clear();
    }

    fn copy(&mut self, level: &dyn LevelReader, pos: SectionPos) -> Option<Arc<SectionCopy>> {
        self.sections
            .entry(pos)
            .or_insert_with(|| level.copy_section(pos).map(Arc::new))
            .clone()
    }
}

/// Read-only world view around one section, safe to send to a worker.
#[derive(Clone)]
pub struct RegionSnapshot {
    registry: Arc<BlockRegistry>,
    center_pos: SectionPos,
    origin: IVec3,
    center: Arc<SectionCopy>,
    sections: [Option<Arc<SectionCopy>>; REGION_SECTIONS],
}

impl RegionSnapshot {
    /// The section this snapshot was built for.
    pub fn center(&self) -> SectionPos {
        self.center_pos
    }

    /// Minimum block corner of the center section.
    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    /// The center section's data.
    pub fn center_section(&self) -> &SectionCopy {
        &self.center
    }

    /// Registry used to interpret block states.
    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Block state at a world position; air outside the region.
    pub fn block_state(&self, pos: IVec3) -> BlockStateId {
        self.locate(pos)
            .map_or(BlockStateId::AIR, |(section, x, y, z)| section.blocks.get(x, y, z))
    }

    /// Definition of the block at a world position.
    pub fn block_def(&self, pos: IVec3) -> Option<&BlockDef> {
        self.registry.get(self.block_state(pos))
    }

    /// Fluid at a world position.
    pub fn fluid_state(&self, pos: IVec3) -> FluidState {
        self.registry.fluid_state(self.block_state(pos))
    }

    /// Block entity at a world position.
    pub fn block_entity(&self, pos: IVec3) -> Option<&BlockEntity> {
        let (section, x, y, z) = self.locate(pos)?;
        section.block_entities.get(&(section_index(x, y, z) as u16))
    }

    /// Packed light at a world position; full sky light outside loaded data.
    pub fn light(&self, pos: IVec3) -> u8 {
        self.locate(pos)
            .map_or(FULL_BRIGHT, |(section, x, y, z)| section.light.get(x, y, z))
    }

    /// Returns `true` if the block at `pos` is an opaque full cube.
    pub fn is_solid_render(&self, pos: IVec3) -> bool {
        self.registry.is_solid_render(self.block_state(pos))
    }

    fn locate(&self, pos: IVec3) -> Option<(&SectionCopy, usize, usize, usize)> {
        let section = SectionPos::of_block(pos);
        let d = IVec3::from(section) - IVec3::from(self.center_pos);
        if d.abs().max_element() > 1 {
            return None;
        }
        let slot = ((d.x + 1) + (d.z + 1) * 3 + (d.y + 1) * 9) as usize;
        let copy = self.sections[slot].as_deref()?;
        let local = pos - section.origin();
        debug_assert!(local.min_element() >= 0 && local.max_element() < SECTION_SIZE as i32);
        Some((copy, local.x as usize, local.y as usize, local.z as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_voxel::{BlockDef, Transparency, VoxelWorld};

    fn world() -> (VoxelWorld, BlockStateId) {
        let mut registry = BlockRegistry::new();
        let stone = registry
            .register(BlockDef::cube("stone", Transparency::Opaque, 1))
            .unwrap();
        (VoxelWorld::new(Arc::new(registry)), stone)
    }

    #[test]
    fn test_missing_or_empty_center_yields_none() {
        let (world, stone) = world();
        let mut cache = RegionCache::new();
        assert!(cache.create_region(&world, SectionPos::new(0, 0, 0)).is_none());

        world.set_block(IVec3::new(1, 1, 1), stone);
        world.set_block(IVec3::new(1, 1, 1), BlockStateId::AIR);
        let mut cache = RegionCache::new();
        assert!(cache.create_region(&world, SectionPos::new(0, 0, 0)).is_none());
    }

    /// Reads cross into neighbouring sections and stop at the region border.
    #[test]
    fn test_reads_span_neighbors() {
        let (world, stone) = world();
        world.set_block(IVec3::new(8, 8, 8), stone);
        world.set_block(IVec3::new(-1, 8, 8), stone);
        world.set_block(IVec3::new(40, 8, 8), stone);
        world.set_light(IVec3::new(16, 0, 0), 3, 4);

        let mut cache = RegionCache::new();
        let region = cache.create_region(&world, SectionPos::new(0, 0, 0)).unwrap();
        assert_eq!(region.origin(), IVec3::ZERO);
        assert_eq!(region.block_state(IVec3::new(8, 8, 8)), stone);
        assert_eq!(region.block_state(IVec3::new(-1, 8, 8)), stone);
        assert!(region.is_solid_render(IVec3::new(-1, 8, 8)));
        // Two sections away is outside the region.
        assert_eq!(region.block_state(IVec3::new(40, 8, 8)), BlockStateId::AIR);
        assert_eq!(region.light(IVec3::new(16, 0, 0)), (3 << 4) | 4);
        assert_eq!(region.light(IVec3::new(0, 100, 0)), FULL_BRIGHT);
    }

    /// Overlapping regions share one copy per section.
    #[test]
    fn test_cache_copies_each_section_once() {
        let (world, stone) = world();
        world.set_block(IVec3::new(0, 0, 0), stone);
        world.set_block(IVec3::new(16, 0, 0), stone);

        let mut cache = RegionCache::new();
        let a = cache.create_region(&world, SectionPos::new(0, 0, 0)).unwrap();
        assert_eq!(cache.len(), 27);
        let b = cache.create_region(&world, SectionPos::new(1, 0, 0)).unwrap();
        assert_eq!(cache.len(), 36);
        assert!(Arc::ptr_eq(&a.sections[14].clone().unwrap(), &b.center));
    }

    /// The snapshot is unaffected by later world edits.
    #[test]
    fn test_snapshot_is_immutable() {
        let (world, stone) = world();
        world.set_block(IVec3::new(3, 3, 3), stone);
        let mut cache = RegionCache::new();
        let region = cache.create_region(&world, SectionPos::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(3, 3, 3), BlockStateId::AIR);
        assert_eq!(region.block_state(IVec3::new(3, 3, 3)), stone);
    }
}
