//! Per-layer geometry builders and the staging pack a compile task writes into.
//!
//! Geometry is always emitted as quads (4 vertices each). Layers that don't
//! need sorting carry no index data of their own: the renderer draws them
//! with one shared buffer built from [`IndexData::sequential`]. The
//! translucent layer gets an explicit, view-sorted index list (see
//! [`crate::SortState`]).

use std::mem;

use crate::layer::RenderLayer;
use crate::vertex::SectionVertex;

/// Quads reserved per layer when a pack is created.
pub const DEFAULT_QUADS_PER_LAYER: usize = 1024;

/// Indices emitted per quad (two triangles).
pub const INDICES_PER_QUAD: usize = 6;

/// Index element width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexType {
    /// The narrowest type able to address `vertex_count` vertices.
    pub fn least(vertex_count: usize) -> Self {
        if vertex_count <= u16::MAX as usize + 1 {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Bytes per index.
    pub fn bytes(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Owned index list in one of the two widths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    /// 16-bit indices.
    U16(Vec<u16>),
    /// 32-bit indices.
    U32(Vec<u32>),
}

impl IndexData {
    /// Emits two triangles per quad, visiting quads in `order`.
    ///
    /// Quad `q` covers vertices `4q..4q+4`; the triangles are
    /// `(0, 1, 2)` and `(2, 3, 0)`.
    pub fn for_quads(order: impl ExactSizeIterator<Item = u32>, index_type: IndexType) -> Self {
        let len = order.len() * INDICES_PER_QUAD;
        match index_type {
            IndexType::U16 => {
                let mut out = Vec::with_capacity(len);
                for quad in order {
                    let b = (quad * 4) as u16;
                    out.extend_from_slice(&[b, b + 1, b + 2, b + 2, b + 3, b]);
                }
                Self::U16(out)
            }
            IndexType::U32 => {
                let mut out = Vec::with_capacity(len);
                for quad in order {
                    let b = quad * 4;
                    out.extend_from_slice(&[b, b + 1, b + 2, b + 2, b + 3, b]);
                }
                Self::U32(out)
            }
        }
    }

    /// Indices for `quad_count` quads in emission order.
    pub fn sequential(quad_count: u32, index_type: IndexType) -> Self {
        Self::for_quads(0..quad_count, index_type)
    }

    /// Element width.
    pub fn index_type(&self) -> IndexType {
        match self {
            Self::U16(_) => IndexType::U16,
            Self::U32(_) => IndexType::U32,
        }
    }

    /// Number of indices.
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    /// Returns `true` if there are no indices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes for GPU upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }

    /// Index at position `i` widened to `u32`.
    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            Self::U16(v) => v.get(i).map(|&x| x as u32),
            Self::U32(v) => v.get(i).copied(),
        }
    }
}

/// Finished geometry of one layer.
#[derive(Clone, Debug)]
pub struct MeshData {
    /// Quad vertices, four per quad.
    pub vertices: Vec<SectionVertex>,
    /// Number of indices to draw.
    pub index_count: u32,
    /// Index width for drawing.
    pub index_type: IndexType,
    /// Explicit indices; `None` means quads are drawn in emission order.
    pub indices: Option<IndexData>,
}

impl MeshData {
    /// Number of quads.
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    /// Vertex bytes for GPU upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Accumulates quads for one layer.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<SectionVertex>,
}

impl MeshBuilder {
    /// Creates a builder with room for `quads` quads.
    pub fn with_quad_capacity(quads: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(quads * 4),
        }
    }

    /// Appends one quad. Corners are in counter-clockwise order seen from
    /// the front face.
    pub fn push_quad(&mut self, corners: [SectionVertex; 4]) {
        self.vertices.extend_from_slice(&corners);
    }

    /// Number of quads written so far.
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    /// Returns `true` if no geometry has been written.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// The vertices written so far.
    pub fn vertices(&self) -> &[SectionVertex] {
        &self.vertices
    }

    /// Takes the accumulated geometry, or `None` if nothing was written.
    pub fn build(&mut self) -> Option<MeshData> {
        if self.vertices.is_empty() {
            return None;
        }
        let vertices = mem::take(&mut self.vertices);
        Some(MeshData {
            index_count: (vertices.len() / 4 * INDICES_PER_QUAD) as u32,
            index_type: IndexType::least(vertices.len()),
            indices: None,
            vertices,
        })
    }

    /// Hands back a vertex allocation after upload so its capacity is reused.
    pub fn recycle(&mut self, mut vertices: Vec<SectionVertex>) {
        if vertices.capacity() > self.vertices.capacity() && self.vertices.is_empty() {
            vertices.clear();
            self.vertices = vertices;
        }
    }

    /// Discards written geometry, keeping the allocation.
    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    /// Bytes currently reserved.
    pub fn capacity_bytes(&self) -> usize {
        self.vertices.capacity() * mem::size_of::<SectionVertex>()
    }
}

/// One builder per [`RenderLayer`]; the unit lent out by the buffer pool.
#[derive(Debug)]
pub struct SectionBufferPack {
    builders: [MeshBuilder; 3],
}

impl SectionBufferPack {
    /// Creates a pack with [`DEFAULT_QUADS_PER_LAYER`] quads reserved per layer.
    pub fn new() -> Self {
        Self::with_quad_capacity(DEFAULT_QUADS_PER_LAYER)
    }

    /// Creates a pack reserving `quads` quads per layer.
    pub fn with_quad_capacity(quads: usize) -> Self {
        Self {
            builders: std::array::from_fn(|_| MeshBuilder::with_quad_capacity(quads)),
        }
    }

    /// The builder for `layer`.
    pub fn builder(&mut self, layer: RenderLayer) -> &mut MeshBuilder {
        &mut self.builders[layer.index()]
    }

    /// Discards all written geometry.
    pub fn clear_all(&mut self) {
        for builder in &mut self.builders {
            builder.clear();
        }
    }

    /// Returns uploaded vertex storage to `layer`'s builder.
    pub fn recycle(&mut self, layer: RenderLayer, vertices: Vec<SectionVertex>) {
        self.builders[layer.index()].recycle(vertices);
    }

    /// Total bytes reserved across layers.
    pub fn capacity_bytes(&self) -> usize {
        self.builders.iter().map(MeshBuilder::capacity_bytes).sum()
    }
}

impl Default for SectionBufferPack {
    fn default() -> Self {
        Self::new()
    }
}
