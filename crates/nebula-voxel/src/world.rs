//! Read access to loaded world data, plus a concurrent in-memory world.
//!
//! [`LevelReader`] is what the meshing pipeline consumes: it hands out owned
//! [`SectionCopy`] values so worker threads never touch live world state.
//! [`VoxelWorld`] is the engine's implementation, backed by a [`DashMap`]
//! so edits on the main thread and snapshot copies can interleave.

use std::sync::Arc;

use dashmap::DashMap;
use glam::IVec3;
use rustc_hash::FxHashMap;

use crate::block::{BlockRegistry, BlockStateId, FluidState};
use crate::coords::SectionPos;
use crate::section::{SECTION_SIZE, SECTION_VOLUME, SectionData, section_index};

/// Full sky light, no block light.
pub const FULL_BRIGHT: u8 = 0xF0;

/// A block entity (chest, sign, banner) at a fixed block position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEntity {
    /// World block position.
    pub pos: IVec3,
    /// Type name used to pick a renderer.
    pub kind: String,
}

/// Per-voxel light, packed as `sky << 4 | block`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightSection {
    levels: Option<Box<[u8]>>,
    uniform: u8,
}

impl LightSection {
    /// Every voxel at the same packed level. Stores no per-voxel array.
    pub fn uniform(level: u8) -> Self {
        Self {
            levels: None,
            uniform: level,
        }
    }

    /// Full sky light everywhere.
    pub fn full_bright() -> Self {
        Self::uniform(FULL_BRIGHT)
    }

    /// Packed light at local `(x, y, z)`.
    pub fn get(&self, x: usize, y: usize, z: usize) -> u8 {
        match &self.levels {
            Some(levels) => levels[section_index(x, y, z)],
            None => self.uniform,
        }
    }

    /// Sets the sky and block light (each 0..=15) at local `(x, y, z)`.
    pub fn set(&mut self, x: usize, y: usize, z: usize, sky: u8, block: u8) {
        let uniform = self.uniform;
        let levels = self
            .levels
            .get_or_insert_with(|| vec![uniform; SECTION_VOLUME].into_boxed_slice());
        levels[section_index(x, y, z)] = (sky.min(15) << 4) | block.min(15);
    }
}

impl Default for LightSection {
    fn default() -> Self {
        Self::full_bright()
    }
}

/// An owned, immutable copy of one section's data.
#[derive(Clone, Debug, Default)]
pub struct SectionCopy {
    /// Block states.
    pub blocks: SectionData,
    /// Packed light levels.
    pub light: LightSection,
    /// Block entities keyed by local [`section_index`].
    pub block_entities: FxHashMap<u16, BlockEntity>,
}

impl SectionCopy {
    /// Returns `true` if the section holds only air.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Read-only world access used by the meshing pipeline.
///
/// Implementations must be safe to call from any thread; the pipeline only
/// reads through owned copies taken on the scheduling thread.
pub trait LevelReader: Send + Sync {
    /// The registry every stored [`BlockStateId`] refers to.
    fn registry(&self) -> &Arc<BlockRegistry>;

    /// Copies a loaded section, or `None` if it isn't loaded.
    fn copy_section(&self, pos: SectionPos) -> Option<SectionCopy>;

    /// Block state at a world block position. Unloaded space is air.
    fn block_state(&self, pos: IVec3) -> BlockStateId;

    /// Block entity at a world block position.
    fn block_entity(&self, pos: IVec3) -> Option<BlockEntity>;

    /// Packed light at a world block position.
    fn light(&self, pos: IVec3) -> u8;

    /// Fluid at a world block position.
    fn fluid_state(&self, pos: IVec3) -> FluidState {
        self.registry().fluid_state(self.block_state(pos))
    }
}

/// Concurrent in-memory world made of sparse sections.
pub struct VoxelWorld {
    registry: Arc<BlockRegistry>,
    sections: DashMap<SectionPos, SectionCopy>,
}

impl VoxelWorld {
    /// Creates an empty world.
    pub fn new(registry: Arc<BlockRegistry>) -> Self {
        Self {
            registry,
            sections: DashMap::new(),
        }
    }

    /// Inserts or replaces a whole section.
    pub fn load_section(&self, pos: SectionPos, section: SectionCopy) {
        self.sections.insert(pos, section);
    }

    /// Removes a section, returning it if it was loaded.
    pub fn unload_section(&self, pos: SectionPos) -> Option<SectionCopy> {
        self.sections.remove(&pos).map(|(_, section)| section)
    }

    /// Returns `true` if the section is loaded.
    pub fn is_loaded(&self, pos: SectionPos) -> bool {
        self.sections.contains_key(&pos)
    }

    /// Number of loaded sections.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Sets a block, loading an empty section on demand.
    ///
    /// Creates or removes the block entity to match the new state.
    pub fn set_block(&self, pos: IVec3, state: BlockStateId) {
        let (section_pos, x, y, z) = split(pos);
        let mut section = self.sections.entry(section_pos).or_default();
        section.blocks.set(x, y, z, state);

        let key = section_index(x, y, z) as u16;
        match self.registry.get(state) {
            Some(def) if def.has_block_entity => {
                section.block_entities.insert(
                    key,
                    BlockEntity {
                        pos,
                        kind: def.name.clone(),
                    },
                );
            }
            Some(_) => {
                section.block_entities.remove(&key);
            }
            None => {
                tracing::warn!("set_block with unregistered state {:?} at {}", state, pos);
                section.block_entities.remove(&key);
            }
        }
    }

    /// Sets sky and block light at a world block position.
    pub fn set_light(&self, pos: IVec3, sky: u8, block: u8) {
        let (section_pos, x, y, z) = split(pos);
        let mut section = self.sections.entry(section_pos).or_default();
        section.light.set(x, y, z, sky, block);
    }

    /// Fills the axis-aligned box `min..=max` with `state`.
    pub fn fill(&self, min: IVec3, max: IVec3, state: BlockStateId) {
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    self.set_block(IVec3::new(x, y, z), state);
                }
            }
        }
    }
}

impl LevelReader for VoxelWorld {
    fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    fn copy_section(&self, pos: SectionPos) -> Option<SectionCopy> {
        self.sections.get(&pos).map(|section| section.clone())
    }

    fn block_state(&self, pos: IVec3) -> BlockStateId {
        let (section_pos, x, y, z) = split(pos);
        self.sections
            .get(&section_pos)
            .map_or(BlockStateId::AIR, |section| section.blocks.get(x, y, z))
    }

    fn block_entity(&self, pos: IVec3) -> Option<BlockEntity> {
        let (section_pos, x, y, z) = split(pos);
        self.sections.get(&section_pos).and_then(|section| {
            section
                .block_entities
                .get(&(section_index(x, y, z) as u16))
                .cloned()
        })
    }

    fn light(&self, pos: IVec3) -> u8 {
        let (section_pos, x, y, z) = split(pos);
        self.sections
            .get(&section_pos)
            .map_or(FULL_BRIGHT, |section| section.light.get(x, y, z))
    }
}

/// Splits a block position into its section and local coordinates.
fn split(pos: IVec3) -> (SectionPos, usize, usize, usize) {
    let mask = SECTION_SIZE as i32 - 1;
    (
        SectionPos::of_block(pos),
        (pos.x & mask) as usize,
        (pos.y & mask) as usize,
        (pos.z & mask) as usize,
    )
}
