//! Turns a [`RegionSnapshot`] into per-layer meshes, a visibility set, and
//! the translucency sort state. Pure CPU work, safe on any thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::IVec3;
use nebula_voxel::{BlockEntity, RenderShape, SECTION_SIZE, SectionPos};

use crate::builder::{MeshData, SectionBufferPack};
use crate::error::CompileError;
use crate::geometry::{
    BlockEntityRenderMode, BlockEntityRenderers, BlockGeometry, CubeModelGeometry, FluidGeometry,
    FluidVolumeGeometry, StaticBlockEntityRenderers,
};
use crate::layer::{LayerClassifier, RenderLayer, TransparencyLayers};
use crate::region::RegionSnapshot;
use crate::sorting::{SortState, VertexSorting};
use crate::visgraph::{VisibilityGraph, VisibilitySet};

/// Everything a compile produces.
#[derive(Debug)]
pub struct CompileResults {
    /// Geometry for each layer that received any.
    pub meshes: BTreeMap<RenderLayer, MeshData>,
    /// Block entities drawn with this section.
    pub block_entities: Vec<BlockEntity>,
    /// Block entities drawn by the global pass.
    pub global_block_entities: Vec<BlockEntity>,
    /// Face-to-face connectivity.
    pub visibility: VisibilitySet,
    /// Present when the translucent layer has geometry.
    pub transparency: Option<SortState>,
}

impl CompileResults {
    /// Returns `true` if no layer has geometry.
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Walks the center section of a snapshot and emits its geometry.
#[derive(Clone)]
pub struct SectionCompiler {
    layers: Arc<dyn LayerClassifier>,
    blocks: Arc<dyn BlockGeometry>,
    fluids: Arc<dyn FluidGeometry>,
    block_entities: Arc<dyn BlockEntityRenderers>,
}

impl SectionCompiler {
    /// Creates a compiler from its collaborators.
    pub fn new(
        layers: Arc<dyn LayerClassifier>,
        blocks: Arc<dyn BlockGeometry>,
        fluids: Arc<dyn FluidGeometry>,
        block_entities: Arc<dyn BlockEntityRenderers>,
    ) -> Self {
        Self {
            layers,
            blocks,
            fluids,
            block_entities,
        }
    }

    /// Cube blocks, box fluids, and the given block entity renderers.
    pub fn with_renderers(block_entities: StaticBlockEntityRenderers) -> Self {
        Self::new(
            Arc::new(TransparencyLayers),
            Arc::new(CubeModelGeometry),
            Arc::new(FluidVolumeGeometry),
            Arc::new(block_entities),
        )
    }

    /// Cube blocks, box fluids, no block entity renderers.
    pub fn with_defaults() -> Self {
        Self::with_renderers(StaticBlockEntityRenderers::new())
    }

    /// Compiles `section` from `region` into `pack`.
    ///
    /// `sorting` orders the translucent quads. On success the pack's builders
    /// are left empty; geometry moves into the returned meshes.
    pub fn compile(
        &self,
        section: SectionPos,
        region: &RegionSnapshot,
        sorting: &VertexSorting,
        pack: &mut SectionBufferPack,
    ) -> Result<CompileResults, CompileError> {
        if region.center() != section {
            return Err(CompileError::RegionMismatch {
                expected: section,
                actual: region.center(),
            });
        }
        pack.clear_all();

        let registry = region.registry();
        let origin = region.origin();
        let mut graph = VisibilityGraph::new();
        let mut block_entities = Vec::new();
        let mut global_block_entities = Vec::new();

        for y in 0..SECTION_SIZE {
            for z in 0..SECTION_SIZE {
                for x in 0..SECTION_SIZE {
                    let pos = origin + IVec3::new(x as i32, y as i32, z as i32);
                    let state = region.block_state(pos);
                    if state.is_air() {
                        continue;
                    }
                    let def = registry
                        .get(state)
                        .ok_or(CompileError::UnknownBlockState { pos, state })?;

                    if def.is_solid_render() {
                        graph.set_opaque(x, y, z);
                    }

                    if def.has_block_entity
                        && let Some(entity) = region.block_entity(pos)
                    {
                        match self.block_entities.render_mode(entity) {
                            Some(BlockEntityRenderMode::InSection) => {
                                block_entities.push(entity.clone())
                            }
                            Some(BlockEntityRenderMode::OffScreen) => {
                                global_block_entities.push(entity.clone())
                            }
                            None => {}
                        }
                    }

                    if !def.fluid.is_empty() {
                        let layer = self.layers.fluid_layer(def.fluid);
                        self.fluids
                            .emit_fluid(def.fluid, pos, region, pack.builder(layer))?;
                    }

                    if def.render_shape == RenderShape::Model {
                        let layer = self.layers.block_layer(def);
                        self.blocks
                            .emit_block(state, def, pos, region, pack.builder(layer))?;
                    }
                }
            }
        }

        let mut meshes = BTreeMap::new();
        let mut transparency = None;
        for layer in RenderLayer::ALL {
            let Some(mut mesh) = pack.builder(layer).build() else {
                continue;
            };
            if layer == RenderLayer::Translucent {
                let state = SortState::from_vertices(&mesh.vertices);
                mesh.indices = Some(state.build_sorted_indices(sorting));
                transparency = Some(state);
            }
            meshes.insert(layer, mesh);
        }

        Ok(CompileResults {
            meshes,
            block_entities,
            global_block_entities,
            visibility: graph.resolve(),
            transparency,
        })
    }
}
