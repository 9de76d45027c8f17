//! GPU-resident section geometry and the sentinels a section holds before
//! (or instead of) having any.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use nebula_mesh::{
    CompileResults, FaceDirection, IndexData, IndexType, RenderLayer, SortState, VisibilitySet,
};
use nebula_voxel::{BlockEntity, SectionPos};

use crate::gpu::{BufferKind, GpuBackend, GpuBuffer, GpuError};
use crate::point_of_view::TranslucencyPointOfView;

/// Buffers for one layer.
#[derive(Debug)]
pub struct LayerBuffers {
    /// Vertex data.
    pub vertex: GpuBuffer,
    /// Explicit indices; `None` draws with
    /// [`SectionRenderDispatcher::quad_index_buffer`](crate::SectionRenderDispatcher::quad_index_buffer).
    pub index: Option<GpuBuffer>,
    /// Indices to draw.
    pub index_count: u32,
    /// Index width.
    pub index_type: IndexType,
}

/// Uploaded geometry of a compiled section.
///
/// Owns its GPU buffers; they are released only through
/// [`SectionMesh::into_buffers`].
#[derive(Debug)]
pub struct CompiledSectionMesh {
    layers: BTreeMap<RenderLayer, LayerBuffers>,
    visibility: VisibilitySet,
    block_entities: Vec<BlockEntity>,
    global_block_entities: Vec<BlockEntity>,
    sort_state: Option<Arc<SortState>>,
    point_of_view: Option<TranslucencyPointOfView>,
}

impl CompiledSectionMesh {
    /// Uploads compile results.
    ///
    /// Moves everything but the vertex data out of `results`; the caller
    /// recycles the vertex allocations afterwards. On failure every buffer
    /// created so far is closed again.
    pub fn upload<B: GpuBackend + ?Sized>(
        backend: &mut B,
        section: SectionPos,
        results: &mut CompileResults,
        point_of_view: TranslucencyPointOfView,
    ) -> Result<Self, GpuError> {
        let mut layers = BTreeMap::new();
        for (&layer, mesh) in &results.meshes {
            let label = format!("section {},{},{} {}", section.x, section.y, section.z, layer.label());
            let vertex = match backend.create_buffer(&label, BufferKind::Vertex, mesh.vertex_bytes()) {
                Ok(buffer) => buffer,
                Err(err) => {
                    close_layers(backend, layers);
                    return Err(err);
                }
            };
            let index = match &mesh.indices {
                Some(indices) => match backend.create_buffer(&label, BufferKind::Index, indices.as_bytes()) {
                    Ok(buffer) => Some(buffer),
                    Err(err) => {
                        backend.close_buffer(vertex);
                        close_layers(backend, layers);
                        return Err(err);
                    }
                },
                None => None,
            };
            layers.insert(
                layer,
                LayerBuffers {
                    vertex,
                    index,
                    index_count: mesh.index_count,
                    index_type: mesh.index_type,
                },
            );
        }

        let sort_state = results.transparency.take().map(Arc::new);
        Ok(Self {
            layers,
            visibility: results.visibility,
            block_entities: mem::take(&mut results.block_entities),
            global_block_entities: mem::take(&mut results.global_block_entities),
            point_of_view: sort_state.as_ref().map(|_| point_of_view),
            sort_state,
        })
    }

    /// Buffers for `layer`, if it has geometry.
    pub fn layer(&self, layer: RenderLayer) -> Option<&LayerBuffers> {
        self.layers.get(&layer)
    }

    /// Returns `true` if `layer` has geometry.
    pub fn has_layer(&self, layer: RenderLayer) -> bool {
        self.layers.contains_key(&layer)
    }

    /// Returns `true` if no layer has geometry.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Face-to-face connectivity.
    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    /// Block entities drawn with this section.
    pub fn block_entities(&self) -> &[BlockEntity] {
        &self.block_entities
    }

    /// Block entities drawn by the global pass.
    pub fn global_block_entities(&self) -> &[BlockEntity] {
        &self.global_block_entities
    }

    /// Translucent centroids, present when the translucent layer has geometry.
    pub fn sort_state(&self) -> Option<&Arc<SortState>> {
        self.sort_state.as_ref()
    }

    /// Octant the translucent layer was last sorted for.
    pub fn point_of_view(&self) -> Option<TranslucencyPointOfView> {
        self.point_of_view
    }

    /// Replaces the translucent index data.
    ///
    /// Writes in place when the new indices fit the current buffer, otherwise
    /// creates a new buffer and returns the old one for deferred closing.
    pub fn replace_translucent_indices<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        section: SectionPos,
        indices: &IndexData,
        point_of_view: TranslucencyPointOfView,
    ) -> Result<Option<GpuBuffer>, GpuError> {
        let Some(layer) = self.layers.get_mut(&RenderLayer::Translucent) else {
            return Ok(None);
        };
        let bytes = indices.as_bytes();
        let in_place = layer
            .index
            .as_ref()
            .filter(|buffer| buffer.size() >= bytes.len() as u64);
        let retired = match in_place {
            Some(buffer) => {
                backend.write_buffer(buffer, 0, bytes)?;
                None
            }
            None => {
                let label = format!("section {},{},{} translucent resort", section.x, section.y, section.z);
                let fresh = backend.create_buffer(&label, BufferKind::Index, bytes)?;
                layer.index.replace(fresh)
            }
        };
        layer.index_count = indices.len() as u32;
        layer.index_type = indices.index_type();
        self.point_of_view = Some(point_of_view);
        Ok(retired)
    }

    fn into_buffers(self) -> Vec<GpuBuffer> {
        let mut buffers = Vec::with_capacity(self.layers.len() * 2);
        for (_, layer) in self.layers {
            buffers.push(layer.vertex);
            buffers.extend(layer.index);
        }
        buffers
    }
}

fn close_layers<B: GpuBackend + ?Sized>(backend: &mut B, layers: BTreeMap<RenderLayer, LayerBuffers>) {
    for (_, layer) in layers {
        backend.close_buffer(layer.vertex);
        if let Some(index) = layer.index {
            backend.close_buffer(index);
        }
    }
}

/// What a render section currently draws.
#[derive(Debug, Default)]
pub enum SectionMesh {
    /// Never compiled; sees nothing through itself.
    #[default]
    Uncompiled,
    /// Compiled to nothing (empty or unloaded); fully see-through.
    Empty,
    /// Uploaded geometry.
    Compiled(Box<CompiledSectionMesh>),
}

impl SectionMesh {
    /// Whether empty space connects face `a` to face `b`.
    pub fn faces_can_see_each_other(&self, a: FaceDirection, b: FaceDirection) -> bool {
        match self {
            Self::Uncompiled => false,
            Self::Empty => true,
            Self::Compiled(mesh) => mesh.visibility.visibility_between(a, b),
        }
    }

    /// The compiled mesh, if any.
    pub fn compiled(&self) -> Option<&CompiledSectionMesh> {
        match self {
            Self::Compiled(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Mutable access to the compiled mesh.
    pub fn compiled_mut(&mut self) -> Option<&mut CompiledSectionMesh> {
        match self {
            Self::Compiled(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Returns `true` for the `Uncompiled` sentinel.
    pub fn is_uncompiled(&self) -> bool {
        matches!(self, Self::Uncompiled)
    }

    /// Releases ownership of every GPU buffer held.
    pub fn into_buffers(self) -> Vec<GpuBuffer> {
        match self {
            Self::Compiled(mesh) => mesh.into_buffers(),
            Self::Uncompiled | Self::Empty => Vec::new(),
        }
    }
}
