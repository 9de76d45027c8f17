//! Errors raised while compiling a section.

use glam::IVec3;
use nebula_voxel::{BlockStateId, SectionPos};
use thiserror::Error;

/// A compile that could not produce geometry.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A voxel holds a state the registry doesn't know.
    #[error("unknown block state {state:?} at {pos}")]
    UnknownBlockState {
        /// World block position.
        pos: IVec3,
        /// Offending state.
        state: BlockStateId,
    },

    /// The snapshot was built around a different section.
    #[error("region centered on {actual:?} cannot compile section {expected:?}")]
    RegionMismatch {
        /// Section the compile was asked for.
        expected: SectionPos,
        /// Section the snapshot is centered on.
        actual: SectionPos,
    },

    /// A geometry provider rejected a block.
    #[error("geometry for block at {pos} failed: {message}")]
    Geometry {
        /// World block position.
        pos: IVec3,
        /// Provider message.
        message: String,
    },
}
