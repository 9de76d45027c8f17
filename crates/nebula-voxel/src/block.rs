//! Block state registry: maps compact [`BlockStateId`] values to [`BlockDef`] metadata.
//!
//! The registry is built once at startup and then shared immutably between
//! the main thread and compile workers. Air is always ID 0 so freshly
//! allocated section storage represents empty space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Compact identifier stored in every voxel cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockStateId(pub u16);

impl BlockStateId {
    /// The air state.
    pub const AIR: Self = Self(0);

    /// Returns `true` for the air state.
    pub fn is_air(self) -> bool {
        self.0 == 0
    }
}

/// How light and sight pass through a block's model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    /// Full cube that hides everything behind it.
    Opaque,
    /// Alpha-tested texels (leaves, grates).
    Cutout,
    /// Alpha-blended geometry (glass, ice) that needs back-to-front sorting.
    Translucent,
    /// No geometry at all (air, barriers).
    Invisible,
}

/// What kind of geometry a block produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderShape {
    /// Nothing is drawn for the block itself.
    Invisible,
    /// Baked model geometry goes into a section layer.
    Model,
    /// Drawn only by its block-entity renderer.
    EntityOnly,
}

/// Fluid kind occupying a voxel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fluid {
    /// No fluid.
    Empty,
    /// Water (translucent).
    Water,
    /// Lava (opaque).
    Lava,
}

/// Fluid occupying a voxel together with its fill level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluidState {
    /// The fluid kind.
    pub fluid: Fluid,
    /// Fill level 1..=8; 8 is a source block. Ignored for [`Fluid::Empty`].
    pub amount: u8,
}

impl FluidState {
    /// No fluid.
    pub const EMPTY: Self = Self {
        fluid: Fluid::Empty,
        amount: 0,
    };

    /// A full source block of `fluid`.
    pub fn source(fluid: Fluid) -> Self {
        Self { fluid, amount: 8 }
    }

    /// Returns `true` if no fluid is present.
    pub fn is_empty(self) -> bool {
        self.fluid == Fluid::Empty
    }

    /// Surface height of the fluid inside its voxel, in `0.0..=1.0`.
    pub fn height(self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            f32::from(self.amount.min(8)) / 9.0
        }
    }
}

/// Full descriptor for a block state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDef {
    /// Unique name (e.g. "stone", "glass", "water").
    pub name: String,
    /// Transparency of the block's own model.
    pub transparency: Transparency,
    /// Geometry kind.
    pub render_shape: RenderShape,
    /// Fluid contained in the voxel (waterlogged blocks carry both).
    pub fluid: FluidState,
    /// Whether a block entity lives at this state's position.
    pub has_block_entity: bool,
    /// Index into the material palette.
    pub material_index: u16,
    /// Light emission level (0 = none, 15 = max).
    pub light_emission: u8,
}

impl BlockDef {
    /// A plain full-cube block with the given transparency.
    pub fn cube(name: impl Into<String>, transparency: Transparency, material_index: u16) -> Self {
        Self {
            name: name.into(),
            transparency,
            render_shape: RenderShape::Model,
            fluid: FluidState::EMPTY,
            has_block_entity: false,
            material_index,
            light_emission: 0,
        }
    }

    /// A fluid source block with no model geometry of its own.
    pub fn fluid(name: impl Into<String>, fluid: Fluid, material_index: u16) -> Self {
        Self {
            name: name.into(),
            transparency: Transparency::Invisible,
            render_shape: RenderShape::Invisible,
            fluid: FluidState::source(fluid),
            has_block_entity: false,
            material_index,
            light_emission: if fluid == Fluid::Lava { 15 } else { 0 },
        }
    }

    /// Returns `true` if the block is a full opaque cube.
    ///
    /// Only these blocks seal space for visibility flood fill and face culling.
    pub fn is_solid_render(&self) -> bool {
        self.render_shape == RenderShape::Model && self.transparency == Transparency::Opaque
    }
}

/// Errors that can occur during block registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A state with the same name has already been registered.
    #[error("duplicate block name: {0}")]
    DuplicateName(String),
    /// All ID slots have been consumed.
    #[error("block registry is full (max 65536 states)")]
    RegistryFull,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps [`BlockStateId`] → [`BlockDef`] with O(1) lookup in both directions.
pub struct BlockRegistry {
    /// Dense array where `index == BlockStateId.0`.
    defs: Vec<BlockDef>,
    by_name: HashMap<String, BlockStateId>,
}

impl BlockRegistry {
    /// Creates a registry with air pre-registered as ID 0.
    pub fn new() -> Self {
        let air = BlockDef {
            name: "air".to_string(),
            transparency: Transparency::Invisible,
            render_shape: RenderShape::Invisible,
            fluid: FluidState::EMPTY,
            has_block_entity: false,
            material_index: 0,
            light_emission: 0,
        };
        let mut by_name = HashMap::new();
        by_name.insert(air.name.clone(), BlockStateId::AIR);
        Self {
            defs: vec![air],
            by_name,
        }
    }

    /// Registers a new block state and returns its ID.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] if the name is taken,
    /// [`RegistryError::RegistryFull`] once every ID is used.
    pub fn register(&mut self, def: BlockDef) -> Result<BlockStateId, RegistryError> {
        if self.by_name.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        if self.defs.len() > u16::MAX as usize {
            return Err(RegistryError::RegistryFull);
        }
        let id = BlockStateId(self.defs.len() as u16);
        self.by_name.insert(def.name.clone(), id);
        self.defs.push(def);
        Ok(id)
    }

    /// Returns the definition for `id`, or `None` if it was never registered.
    pub fn get(&self, id: BlockStateId) -> Option<&BlockDef> {
        self.defs.get(id.0 as usize)
    }

    /// Looks up a state by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<BlockStateId> {
        self.by_name.get(name).copied()
    }

    /// Total number of registered states, air included.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.len() <= 1
    }

    /// Returns `true` if `id` is a full opaque cube. Unknown IDs count as air.
    pub fn is_solid_render(&self, id: BlockStateId) -> bool {
        self.get(id).is_some_and(BlockDef::is_solid_render)
    }

    /// Fluid contained in the given state. Unknown IDs hold no fluid.
    pub fn fluid_state(&self, id: BlockStateId) -> FluidState {
        self.get(id).map_or(FluidState::EMPTY, |def| def.fluid)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
