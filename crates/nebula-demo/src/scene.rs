//! Demo world: rolling stone terrain with a grass cap, a lake, glass
//! pillars, and a couple of block entities.

use std::sync::Arc;

use glam::IVec3;
use nebula_mesh::{BlockEntityRenderMode, StaticBlockEntityRenderers};
use nebula_voxel::{
    BlockDef, BlockRegistry, BlockStateId, Fluid, RegistryError, RenderShape, SECTION_SIZE,
    SectionPos, Transparency, VoxelWorld,
};

/// Water surface height in blocks.
pub const SEA_LEVEL: i32 = 20;

/// Block states used by the demo.
#[derive(Clone, Copy, Debug)]
pub struct DemoBlocks {
    pub stone: BlockStateId,
    pub grass: BlockStateId,
    pub leaves: BlockStateId,
    pub glass: BlockStateId,
    pub water: BlockStateId,
    pub chest: BlockStateId,
    pub beacon: BlockStateId,
}

impl DemoBlocks {
    fn register(registry: &mut BlockRegistry) -> Result<Self, RegistryError> {
        let entity_block = |name: &str, material| BlockDef {
            render_shape: RenderShape::EntityOnly,
            has_block_entity: true,
            ..BlockDef::cube(name, Transparency::Cutout, material)
        };
        Ok(Self {
            stone: registry.register(BlockDef::cube("stone", Transparency::Opaque, 1))?,
            grass: registry.register(BlockDef::cube("grass", Transparency::Opaque, 2))?,
            leaves: registry.register(BlockDef::cube("leaves", Transparency::Cutout, 3))?,
            glass: registry.register(BlockDef::cube("glass", Transparency::Translucent, 4))?,
            water: registry.register(BlockDef::fluid("water", Fluid::Water, 5))?,
            chest: registry.register(entity_block("chest", 6))?,
            beacon: registry.register(entity_block("beacon", 7))?,
        })
    }
}

/// Renderers for the demo's block entities.
pub fn block_entity_renderers() -> StaticBlockEntityRenderers {
    StaticBlockEntityRenderers::new()
        .with("chest", BlockEntityRenderMode::InSection)
        .with("beacon", BlockEntityRenderMode::OffScreen)
}

/// Terrain surface height at column `(x, z)`.
pub fn surface_height(x: i32, z: i32) -> i32 {
    let (fx, fz) = (x as f32, z as f32);
    let height = 18.0 + 5.0 * (fx * 0.15).sin() + 4.0 * (fz * 0.11).cos();
    height.round() as i32
}

/// A generated world and the sections worth rendering.
pub struct DemoScene {
    pub world: Arc<VoxelWorld>,
    pub blocks: DemoBlocks,
    pub sections: Vec<SectionPos>,
}

/// Builds a square of `(2 * radius + 1)²` section columns, three sections tall.
pub fn build(radius: i32) -> Result<DemoScene, RegistryError> {
    let mut registry = BlockRegistry::new();
    let blocks = DemoBlocks::register(&mut registry)?;
    let world = Arc::new(VoxelWorld::new(Arc::new(registry)));

    let size = SECTION_SIZE as i32;
    let min = -radius * size;
    let max = (radius + 1) * size - 1;
    for z in min..=max {
        for x in min..=max {
            let height = surface_height(x, z);
            world.fill(IVec3::new(x, 0, z), IVec3::new(x, height - 1, z), blocks.stone);
            world.set_block(IVec3::new(x, height, z), blocks.grass);
            for y in height + 1..=SEA_LEVEL {
                world.set_block(IVec3::new(x, y, z), blocks.water);
            }
        }
    }

    // Glass pillars and a tree canopy on a grid, so most sections get
    // translucent and cutout geometry.
    for gz in (min + 5..max).step_by(12) {
        for gx in (min + 5..max).step_by(12) {
            let base = surface_height(gx, gz).max(SEA_LEVEL) + 1;
            world.fill(IVec3::new(gx, base, gz), IVec3::new(gx, base + 6, gz), blocks.glass);
            world.fill(
                IVec3::new(gx + 3, base + 3, gz - 1),
                IVec3::new(gx + 5, base + 5, gz + 1),
                blocks.leaves,
            );
        }
    }

    world.set_block(IVec3::new(2, surface_height(2, 2).max(SEA_LEVEL) + 1, 2), blocks.chest);
    world.set_block(IVec3::new(9, surface_height(9, 4).max(SEA_LEVEL) + 1, 4), blocks.beacon);

    let mut sections = Vec::new();
    for sy in 0..3 {
        for sz in -radius..=radius {
            for sx in -radius..=radius {
                sections.push(SectionPos::new(sx, sy, sz));
            }
        }
    }

    Ok(DemoScene {
        world,
        blocks,
        sections,
    })
}
