//! Geometry providers: how a single block, fluid, or block entity turns into
//! section geometry.
//!
//! The compiler only walks voxels and routes each one to these traits. The
//! defaults here emit full cubes with neighbour face culling and box-shaped
//! fluid volumes; richer model baking plugs in behind the same traits.

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;

use nebula_voxel::{BlockDef, BlockEntity, BlockStateId, FluidState, Transparency};

use crate::builder::MeshBuilder;
use crate::error::CompileError;
use crate::face_direction::FaceDirection;
use crate::region::RegionSnapshot;
use crate::vertex::SectionVertex;

/// Appends model geometry for one block.
pub trait BlockGeometry: Send + Sync {
    /// Emits the block at world position `pos` into `out`.
    fn emit_block(
        &self,
        state: BlockStateId,
        def: &BlockDef,
        pos: IVec3,
        region: &RegionSnapshot,
        out: &mut MeshBuilder,
    ) -> Result<(), CompileError>;
}

/// Appends fluid geometry for one voxel.
pub trait FluidGeometry: Send + Sync {
    /// Emits `fluid` at world position `pos` into `out`.
    fn emit_fluid(
        &self,
        fluid: FluidState,
        pos: IVec3,
        region: &RegionSnapshot,
        out: &mut MeshBuilder,
    ) -> Result<(), CompileError>;
}

/// How a block entity is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockEntityRenderMode {
    /// Drawn with the section that contains it.
    InSection,
    /// May extend past its section (beacons, large signs); drawn globally.
    OffScreen,
}

/// Looks up the renderer for a block entity.
pub trait BlockEntityRenderers: Send + Sync {
    /// `None` when the entity has no renderer.
    fn render_mode(&self, entity: &BlockEntity) -> Option<BlockEntityRenderMode>;
}

/// Renderer table keyed by block entity kind.
#[derive(Clone, Debug, Default)]
pub struct StaticBlockEntityRenderers {
    modes: FxHashMap<String, BlockEntityRenderMode>,
}

impl StaticBlockEntityRenderers {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the mode for `kind`, builder style.
    pub fn with(mut self, kind: impl Into<String>, mode: BlockEntityRenderMode) -> Self {
        self.modes.insert(kind.into(), mode);
        self
    }
}

impl BlockEntityRenderers for StaticBlockEntityRenderers {
    fn render_mode(&self, entity: &BlockEntity) -> Option<BlockEntityRenderMode> {
        self.modes.get(&entity.kind).copied()
    }
}

// ---------------------------------------------------------------------------
// Cube and fluid providers
// ---------------------------------------------------------------------------

/// Full-cube model geometry with face culling.
///
/// A face is skipped when the neighbour is an opaque full cube, or when it is
/// the same non-opaque state (adjacent glass or water shows no inner faces).
#[derive(Clone, Copy, Debug, Default)]
pub struct CubeModelGeometry;

impl BlockGeometry for CubeModelGeometry {
    fn emit_block(
        &self,
        state: BlockStateId,
        def: &BlockDef,
        pos: IVec3,
        region: &RegionSnapshot,
        out: &mut MeshBuilder,
    ) -> Result<(), CompileError> {
        if def.transparency == Transparency::Invisible {
            return Ok(());
        }
        let local = (pos - region.origin()).as_vec3();
        for dir in FaceDirection::ALL {
            let neighbor = pos + dir.step();
            let neighbor_state = region.block_state(neighbor);
            if region.registry().is_solid_render(neighbor_state) || neighbor_state == state {
                continue;
            }
            out.push_quad(face_quad(
                local,
                Vec3::ONE,
                dir,
                region.light(neighbor),
                def.material_index,
            ));
        }
        Ok(())
    }
}

/// Box-shaped fluid volume whose height follows the fluid amount.
#[derive(Clone, Copy, Debug, Default)]
pub struct FluidVolumeGeometry;

impl FluidGeometry for FluidVolumeGeometry {
    fn emit_fluid(
        &self,
        fluid: FluidState,
        pos: IVec3,
        region: &RegionSnapshot,
        out: &mut MeshBuilder,
    ) -> Result<(), CompileError> {
        let material = region
            .block_def(pos)
            .map(|def| def.material_index)
            .ok_or_else(|| CompileError::Geometry {
                pos,
                message: "fluid voxel without a block definition".into(),
            })?;

        let above_same = region.fluid_state(pos + IVec3::Y).fluid == fluid.fluid;
        let height = if above_same { 1.0 } else { fluid.height() };
        let extent = Vec3::new(1.0, height, 1.0);
        let local = (pos - region.origin()).as_vec3();

        for dir in FaceDirection::ALL {
            let neighbor = pos + dir.step();
            if region.fluid_state(neighbor).fluid == fluid.fluid {
                continue;
            }
            // The lowered top surface stays visible under a solid block.
            let lowered_top = dir == FaceDirection::PosY && height < 1.0;
            if region.is_solid_render(neighbor) && !lowered_top {
                continue;
            }
            out.push_quad(face_quad(local, extent, dir, region.light(neighbor), material));
        }
        Ok(())
    }
}

/// Builds the four corners of one face of the box `local..local + extent`,
/// counter-clockwise when seen from outside.
pub fn face_quad(
    local: Vec3,
    extent: Vec3,
    dir: FaceDirection,
    light: u8,
    material: u16,
) -> [SectionVertex; 4] {
    let (n, u, v) = dir.sweep_axes();
    let mut base = local;
    if dir.is_positive() {
        base[n] += extent[n];
    }
    let mut du = Vec3::ZERO;
    du[u] = extent[u];
    let mut dv = Vec3::ZERO;
    dv[v] = extent[v];

    let uv_max = |len: f32| (len.clamp(0.0, 1.0) * u16::MAX as f32) as u16;
    let (umax, vmax) = (uv_max(extent[u]), uv_max(extent[v]));
    let mut corners = [
        SectionVertex::new(base, [0, 0], light, dir, material),
        SectionVertex::new(base + du, [umax, 0], light, dir, material),
        SectionVertex::new(base + du + dv, [umax, vmax], light, dir, material),
        SectionVertex::new(base + dv, [0, vmax], light, dir, material),
    ];
    if du.cross(dv).dot(dir.step().as_vec3()) < 0.0 {
        corners.swap(1, 3);
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every face winds counter-clockwise around its outward normal.
    #[test]
    fn test_face_quad_winding_matches_normal() {
        for dir in FaceDirection::ALL {
            let quad = face_quad(Vec3::ZERO, Vec3::ONE, dir, 0, 0);
            let a = quad[1].pos() - quad[0].pos();
            let b = quad[2].pos() - quad[0].pos();
            let normal = a.cross(b).normalize();
            assert_eq!(normal, dir.step().as_vec3(), "{dir:?}");
        }
    }

    /// Positive faces sit on the far side of the box.
    #[test]
    fn test_face_quad_plane_position() {
        let quad = face_quad(Vec3::new(2.0, 3.0, 4.0), Vec3::new(1.0, 0.5, 1.0), FaceDirection::PosY, 0, 0);
        assert!(quad.iter().all(|v| v.position[1] == 3.5));
        let quad = face_quad(Vec3::new(2.0, 3.0, 4.0), Vec3::ONE, FaceDirection::NegX, 0, 0);
        assert!(quad.iter().all(|v| v.position[0] == 2.0));
    }

    #[test]
    fn test_static_renderers_lookup() {
        let renderers = StaticBlockEntityRenderers::new()
            .with("chest", BlockEntityRenderMode::InSection)
            .with("beacon", BlockEntityRenderMode::OffScreen);
        let entity = |kind: &str| BlockEntity {
            pos: IVec3::ZERO,
            kind: kind.into(),
        };
        assert_eq!(
            renderers.render_mode(&entity("beacon")),
            Some(BlockEntityRenderMode::OffScreen)
        );
        assert_eq!(renderers.render_mode(&entity("sign")), None);
    }
}
