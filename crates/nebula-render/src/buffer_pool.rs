//! Fixed-size pool of staging buffer packs.
//!
//! The pool's free count is the compile concurrency limit: a task only starts
//! after taking a pack, and the pack comes back once the task's upload (or
//! failure, or cancellation) has been handled.

use crossbeam_channel::{Receiver, Sender, bounded};
use nebula_mesh::SectionBufferPack;

/// Packs larger than this are dropped on release instead of kept.
pub const MAX_RETAINED_PACK_BYTES: usize = 16 * 1024 * 1024;

/// Lends [`SectionBufferPack`]s to compile tasks.
pub struct SectionBufferPool {
    free: Receiver<SectionBufferPack>,
    returns: Sender<SectionBufferPack>,
    capacity: usize,
}

impl SectionBufferPool {
    /// Creates a pool holding `capacity` packs (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (returns, free) = bounded(capacity);
        for _ in 0..capacity {
            let _ = returns.try_send(SectionBufferPack::new());
        }
        tracing::debug!("Section buffer pool created with {capacity} packs");
        Self {
            free,
            returns,
            capacity,
        }
    }

    /// Takes a free pack, or `None` when all are lent out.
    pub fn acquire(&self) -> Option<SectionBufferPack> {
        self.free.try_recv().ok()
    }

    /// Clears a pack and returns it to the pool.
    ///
    /// A pack that grew past [`MAX_RETAINED_PACK_BYTES`] is replaced by a
    /// fresh one.
    pub fn release(&self, mut pack: SectionBufferPack) {
        if pack.capacity_bytes() > MAX_RETAINED_PACK_BYTES {
            self.discard(pack);
            return;
        }
        pack.clear_all();
        if self.returns.try_send(pack).is_err() {
            tracing::warn!("Section buffer pool over capacity, dropping pack");
        }
    }

    /// Drops a pack whose contents can't be trusted and puts a fresh one in
    /// its slot.
    pub fn discard(&self, pack: SectionBufferPack) {
        drop(pack);
        if self.returns.try_send(SectionBufferPack::new()).is_err() {
            tracing::warn!("Section buffer pool over capacity, dropping pack");
        }
    }

    /// Packs available right now.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total packs owned by the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
