//! Render layers and the mapping from block/fluid states onto them.

use nebula_voxel::{BlockDef, Fluid, FluidState, Transparency};

/// A geometry bucket with its own pipeline and sort policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderLayer {
    /// Opaque geometry; draw order is irrelevant.
    Solid,
    /// Alpha-tested geometry; draw order is irrelevant.
    Cutout,
    /// Alpha-blended geometry; must be drawn back to front.
    Translucent,
}

impl RenderLayer {
    /// All layers in draw order.
    pub const ALL: [RenderLayer; 3] = [Self::Solid, Self::Cutout, Self::Translucent];

    /// Dense index (0–2).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Debug label for GPU buffers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Solid => "solid",
            Self::Cutout => "cutout",
            Self::Translucent => "translucent",
        }
    }
}

/// Pure mapping from block and fluid states to a render layer.
pub trait LayerClassifier: Send + Sync {
    /// Layer for a block's model geometry.
    fn block_layer(&self, def: &BlockDef) -> RenderLayer;

    /// Layer for fluid geometry.
    fn fluid_layer(&self, fluid: FluidState) -> RenderLayer;
}

/// Classifies by [`Transparency`]; water is translucent, lava solid.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransparencyLayers;

impl LayerClassifier for TransparencyLayers {
    fn block_layer(&self, def: &BlockDef) -> RenderLayer {
        match def.transparency {
            Transparency::Opaque | Transparency::Invisible => RenderLayer::Solid,
            Transparency::Cutout => RenderLayer::Cutout,
            Transparency::Translucent => RenderLayer::Translucent,
        }
    }

    fn fluid_layer(&self, fluid: FluidState) -> RenderLayer {
        match fluid.fluid {
            Fluid::Water => RenderLayer::Translucent,
            Fluid::Lava | Fluid::Empty => RenderLayer::Solid,
        }
    }
}
