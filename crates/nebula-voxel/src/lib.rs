//! World data for section meshing: block registry, palette-compressed sections,
//! section coordinates, and thread-safe read access to loaded sections.

pub mod block;
pub mod coords;
pub mod packed_indices;
pub mod section;
pub mod world;

pub use block::{
    BlockDef, BlockRegistry, BlockStateId, Fluid, FluidState, RegistryError, RenderShape,
    Transparency,
};
pub use coords::{SECTION_BITS, SectionPos};
pub use section::{SECTION_SIZE, SECTION_VOLUME, SectionData, section_index};
pub use world::{BlockEntity, FULL_BRIGHT, LevelReader, LightSection, SectionCopy, VoxelWorld};
