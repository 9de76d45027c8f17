//! Back-to-front ordering of translucent quads.

use glam::{DVec3, Vec3};

use crate::builder::{IndexData, IndexType};
use crate::vertex::SectionVertex;

/// Orders quad centroids for drawing, farthest first.
///
/// Positions are in the same space as the vertices, i.e. relative to the
/// section origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VertexSorting {
    /// Perspective: descending squared distance to a point.
    DistanceToPoint(Vec3),
    /// Orthographic: descending projection onto a view direction.
    ByAxis(Vec3),
}

impl VertexSorting {
    /// Sorting for a camera at `camera` viewing a section whose origin is `origin`.
    /// The offset is computed in `f64` before narrowing.
    pub fn for_camera(camera: DVec3, origin: DVec3) -> Self {
        Self::DistanceToPoint((camera - origin).as_vec3())
    }

    fn key(&self, centroid: Vec3) -> f32 {
        match *self {
            Self::DistanceToPoint(point) => centroid.distance_squared(point),
            Self::ByAxis(axis) => centroid.dot(axis),
        }
    }

    /// Returns quad indices ordered farthest first. Ties keep emission order.
    pub fn sort(&self, centroids: &[Vec3]) -> Vec<u32> {
        let keys: Vec<f32> = centroids.iter().map(|&c| self.key(c)).collect();
        let mut order: Vec<u32> = (0..centroids.len() as u32).collect();
        order.sort_by(|&a, &b| keys[b as usize].total_cmp(&keys[a as usize]));
        order
    }
}

/// Quad centroids kept after a compile so the translucent index buffer can
/// be rebuilt for a new viewpoint without touching vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct SortState {
    centroids: Vec<Vec3>,
    index_type: IndexType,
}

impl SortState {
    /// Captures the centroid of every quad in emission order.
    pub fn from_vertices(vertices: &[SectionVertex]) -> Self {
        let centroids = vertices
            .chunks_exact(4)
            .map(|quad| (quad[0].pos() + quad[2].pos()) * 0.5)
            .collect();
        Self {
            centroids,
            index_type: IndexType::least(vertices.len()),
        }
    }

    /// Number of quads tracked.
    pub fn quad_count(&self) -> usize {
        self.centroids.len()
    }

    /// Index width the rebuilt buffers use.
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Builds a fresh index list ordered by `sorting`.
    pub fn build_sorted_indices(&self, sorting: &VertexSorting) -> IndexData {
        let order = sorting.sort(&self.centroids);
        IndexData::for_quads(order.into_iter(), self.index_type)
    }
}
