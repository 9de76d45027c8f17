//! Section vertex format and its canonical `wgpu::VertexBufferLayout`.
//!
//! ## Attribute Packing
//!
//! | Location | Offset | Format    | Fields                              |
//! |----------|--------|-----------|-------------------------------------|
//! | 0        | 0      | Float32x3 | section-relative position           |
//! | 1        | 12     | Unorm8x4  | tint color RGBA                     |
//! | 2        | 16     | Unorm16x2 | texture coordinates                 |
//! | 3        | 20     | Uint8x4   | light, normal, material_id (2 bytes)|

use std::mem;

use glam::Vec3;
use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

use crate::face_direction::FaceDirection;

/// One vertex of compiled section geometry (24 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SectionVertex {
    /// Position relative to the section origin (0.0..=16.0).
    pub position: [f32; 3],
    /// RGBA tint.
    pub color: [u8; 4],
    /// Texture coordinates in `u16` fixed point.
    pub uv: [u16; 2],
    /// Packed light, `sky << 4 | block`.
    pub light: u8,
    /// Face direction index. See [`FaceDirection`].
    pub normal: u8,
    /// Material / texture index.
    pub material_id: u16,
}

static_assertions::assert_eq_size!(SectionVertex, [u8; 24]);

impl SectionVertex {
    /// Builds a white vertex.
    pub fn new(position: Vec3, uv: [u16; 2], light: u8, direction: FaceDirection, material: u16) -> Self {
        Self {
            position: position.to_array(),
            color: [255; 4],
            uv,
            light,
            normal: direction as u8,
            material_id: material,
        }
    }

    /// Position as a vector.
    pub fn pos(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Decodes the face direction, `None` if out of range.
    pub fn face_direction(&self) -> Option<FaceDirection> {
        FaceDirection::from_u8(self.normal)
    }
}

/// Vertex attributes for [`SectionVertex`].
pub const SECTION_VERTEX_ATTRIBUTES: [VertexAttribute; 4] = [
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    VertexAttribute {
        format: VertexFormat::Unorm8x4,
        offset: 12,
        shader_location: 1,
    },
    VertexAttribute {
        format: VertexFormat::Unorm16x2,
        offset: 16,
        shader_location: 2,
    },
    // light + normal + material_id
    VertexAttribute {
        format: VertexFormat::Uint8x4,
        offset: 20,
        shader_location: 3,
    },
];

/// The vertex buffer layout shared by all section render pipelines.
pub const SECTION_VERTEX_LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
    array_stride: mem::size_of::<SectionVertex>() as u64,
    step_mode: VertexStepMode::Vertex,
    attributes: &SECTION_VERTEX_ATTRIBUTES,
};

const _: () = assert!(
    SECTION_VERTEX_ATTRIBUTES[3].offset + 4 <= mem::size_of::<SectionVertex>() as u64,
    "Last attribute exceeds vertex stride"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_stride_matches_vertex_struct_size() {
        assert_eq!(
            SECTION_VERTEX_LAYOUT.array_stride,
            mem::size_of::<SectionVertex>() as u64
        );
    }

    #[test]
    fn test_field_offsets_match_attributes() {
        let v = SectionVertex::new(Vec3::ONE, [1, 2], 0xF0, FaceDirection::NegZ, 7);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(bytes[20], 0xF0);
        assert_eq!(bytes[21], FaceDirection::NegZ as u8);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 7);
        assert_eq!(v.face_direction(), Some(FaceDirection::NegZ));
    }

    #[test]
    fn test_shader_locations_are_sequential() {
        for (i, attr) in SECTION_VERTEX_ATTRIBUTES.iter().enumerate() {
            assert_eq!(attr.shader_location, i as u32);
        }
    }
}
