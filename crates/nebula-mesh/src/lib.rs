//! CPU side of section meshing: snapshots, geometry emission, translucency
//! sorting, and face-to-face visibility.

pub mod builder;
pub mod compiler;
pub mod error;
pub mod face_direction;
pub mod geometry;
pub mod layer;
pub mod region;
pub mod sorting;
pub mod vertex;
pub mod visgraph;

pub use builder::{
    DEFAULT_QUADS_PER_LAYER, INDICES_PER_QUAD, IndexData, IndexType, MeshBuilder, MeshData,
    SectionBufferPack,
};
pub use compiler::{CompileResults, SectionCompiler};
pub use error::CompileError;
pub use face_direction::FaceDirection;
pub use geometry::{
    BlockEntityRenderMode, BlockEntityRenderers, BlockGeometry, CubeModelGeometry, FluidGeometry,
    FluidVolumeGeometry, StaticBlockEntityRenderers, face_quad,
};
pub use layer::{LayerClassifier, RenderLayer, TransparencyLayers};
pub use region::{REGION_SECTIONS, RegionCache, RegionSnapshot};
pub use sorting::{SortState, VertexSorting};
pub use vertex::{SECTION_VERTEX_ATTRIBUTES, SECTION_VERTEX_LAYOUT, SectionVertex};
pub use visgraph::{MIN_EMPTY_FOR_FLOOD, VisibilityGraph, VisibilitySet};
