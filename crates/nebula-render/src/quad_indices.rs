//! Shared index buffers for layers drawn in emission order.
//!
//! Only the translucent layer needs a per-section index list. Every other
//! layer draws its quads `0..n` in order, so one buffer per index width,
//! sized for the largest layer seen so far, serves every section.

use nebula_mesh::{CompileResults, IndexData, IndexType};

use crate::gpu::{BufferKind, GpuBackend, GpuBuffer, GpuError};

/// Smallest shared buffer, in quads.
pub const MIN_SHARED_QUADS: u32 = 1024;

/// Quads addressable with 16-bit indices.
const MAX_U16_QUADS: u32 = (u16::MAX as u32 + 1) / 4;

/// The sequential quad index buffers, one per [`IndexType`].
#[derive(Debug, Default)]
pub struct QuadIndexBuffers {
    u16: Option<(GpuBuffer, u32)>,
    u32: Option<(GpuBuffer, u32)>,
}

impl QuadIndexBuffers {
    /// No buffers yet; they are created on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer for `index_type`, if one was created.
    pub fn buffer(&self, index_type: IndexType) -> Option<&GpuBuffer> {
        self.slot(index_type).as_ref().map(|(buffer, _)| buffer)
    }

    /// Quads the `index_type` buffer covers (0 before it exists).
    pub fn quad_capacity(&self, index_type: IndexType) -> u32 {
        self.slot(index_type).as_ref().map_or(0, |&(_, quads)| quads)
    }

    /// Grows the buffers so every unindexed layer in `results` can be drawn.
    ///
    /// Replaced buffers are pushed onto `retired` for the caller to close.
    pub fn reserve_for<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        results: &CompileResults,
        retired: &mut Vec<GpuBuffer>,
    ) -> Result<(), GpuError> {
        for mesh in results.meshes.values().filter(|m| m.indices.is_none()) {
            self.reserve(backend, mesh.index_type, mesh.quad_count() as u32, retired)?;
        }
        Ok(())
    }

    /// Makes the `index_type` buffer cover at least `quads` quads.
    pub fn reserve<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        index_type: IndexType,
        quads: u32,
        retired: &mut Vec<GpuBuffer>,
    ) -> Result<(), GpuError> {
        if quads <= self.quad_capacity(index_type) {
            return Ok(());
        }
        let mut target = quads.next_power_of_two().max(MIN_SHARED_QUADS);
        if index_type == IndexType::U16 {
            target = target.min(MAX_U16_QUADS).max(quads);
        }
        let indices = IndexData::sequential(target, index_type);
        let buffer = backend.create_buffer("shared quad indices", BufferKind::Index, indices.as_bytes())?;
        tracing::debug!("Shared {index_type:?} quad indices grown to {target} quads");
        if let Some((old, _)) = self.slot_mut(index_type).replace((buffer, target)) {
            retired.push(old);
        }
        Ok(())
    }

    /// Takes every buffer out, leaving the set empty.
    pub fn take_buffers(&mut self) -> Vec<GpuBuffer> {
        [self.u16.take(), self.u32.take()]
            .into_iter()
            .flatten()
            .map(|(buffer, _)| buffer)
            .collect()
    }

    fn slot(&self, index_type: IndexType) -> &Option<(GpuBuffer, u32)> {
        match index_type {
            IndexType::U16 => &self.u16,
            IndexType::U32 => &self.u32,
        }
    }

    fn slot_mut(&mut self, index_type: IndexType) -> &mut Option<(GpuBuffer, u32)> {
        match index_type {
            IndexType::U16 => &mut self.u16,
            IndexType::U32 => &mut self.u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::MemoryBackend;

    /// Small layers share one minimum-size buffer.
    #[test]
    fn test_first_reserve_uses_minimum_size() {
        let mut backend = MemoryBackend::new();
        let mut shared = QuadIndexBuffers::new();
        let mut retired = Vec::new();
        shared.reserve(&mut backend, IndexType::U16, 6, &mut retired).unwrap();
        shared.reserve(&mut backend, IndexType::U16, 900, &mut retired).unwrap();

        assert_eq!(shared.quad_capacity(IndexType::U16), MIN_SHARED_QUADS);
        assert!(shared.buffer(IndexType::U32).is_none());
        assert!(retired.is_empty());
        assert_eq!(backend.created_count(), 1);

        let bytes = backend.contents(shared.buffer(IndexType::U16).unwrap()).unwrap();
        let expected = IndexData::sequential(2, IndexType::U16);
        assert_eq!(&bytes[..expected.as_bytes().len()], expected.as_bytes());
    }

    /// Growing retires the old buffer, and 16-bit buffers stop at the
    /// addressable limit.
    #[test]
    fn test_growth_retires_previous_buffer() {
        let mut backend = MemoryBackend::new();
        let mut shared = QuadIndexBuffers::new();
        let mut retired = Vec::new();
        shared.reserve(&mut backend, IndexType::U16, 10, &mut retired).unwrap();
        let first = shared.buffer(IndexType::U16).unwrap().id();

        shared.reserve(&mut backend, IndexType::U16, 12_000, &mut retired).unwrap();
        assert_eq!(shared.quad_capacity(IndexType::U16), MAX_U16_QUADS);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].id(), first);

        for buffer in retired.drain(..).chain(shared.take_buffers()) {
            backend.close_buffer(buffer);
        }
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(shared.quad_capacity(IndexType::U16), 0);
    }
}
