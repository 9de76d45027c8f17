//! The GPU buffer surface the section pipeline writes through.
//!
//! [`GpuBackend`] is deliberately tiny: create a buffer from bytes, overwrite
//! part of one, close one. Every call happens on the thread that owns the
//! backend, which is the thread draining uploads. [`WgpuBackend`] maps it onto
//! a wgpu device/queue; [`MemoryBackend`] keeps the bytes in memory so tests
//! and headless runs can inspect exactly what would have been uploaded.

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

/// Errors raised by a [`GpuBackend`].
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// The handle was already closed or came from another backend.
    #[error("buffer {0:?} is not live")]
    UnknownBuffer(BufferId),

    /// A write would run past the end of the buffer.
    #[error("write of {len} bytes at offset {offset} overflows buffer {id:?} ({size} bytes)")]
    WriteOutOfBounds {
        /// Target buffer.
        id: BufferId,
        /// Write offset in bytes.
        offset: u64,
        /// Write length in bytes.
        len: u64,
        /// Buffer size in bytes.
        size: u64,
    },

    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex data.
    Vertex,
    /// Index data.
    Index,
}

impl BufferKind {
    fn usage(self) -> wgpu::BufferUsages {
        match self {
            Self::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            Self::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        }
    }
}

/// Backend-local buffer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Owning handle to a live GPU buffer.
///
/// Not `Clone`: the only way to release it is [`GpuBackend::close_buffer`],
/// which consumes the handle, so a buffer is closed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct GpuBuffer {
    id: BufferId,
    size: u64,
    kind: BufferKind,
}

impl GpuBuffer {
    /// Backend identifier.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Binding kind.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

/// Buffer operations the pipeline needs from the GPU.
pub trait GpuBackend {
    /// Creates a buffer initialised with `contents`.
    fn create_buffer(
        &mut self,
        label: &str,
        kind: BufferKind,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError>;

    /// Overwrites `bytes` at `offset` within `buffer`.
    fn write_buffer(&mut self, buffer: &GpuBuffer, offset: u64, bytes: &[u8])
    -> Result<(), GpuError>;

    /// Releases a buffer.
    fn close_buffer(&mut self, buffer: GpuBuffer);

    /// Number of buffers currently open.
    fn live_buffers(&self) -> usize;
}

fn check_write(buffer: &GpuBuffer, offset: u64, bytes: &[u8]) -> Result<(), GpuError> {
    let len = bytes.len() as u64;
    if offset.saturating_add(len) > buffer.size {
        return Err(GpuError::WriteOutOfBounds {
            id: buffer.id,
            offset,
            len,
            size: buffer.size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// wgpu
// ---------------------------------------------------------------------------

/// [`GpuBackend`] over a wgpu device and queue.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: FxHashMap<BufferId, wgpu::Buffer>,
    next_id: u64,
}

impl WgpuBackend {
    /// Wraps an existing device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Requests a headless adapter and device, blocking on the futures.
    pub fn request_headless() -> Result<Self, GpuError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|_| GpuError::NoAdapter)?;
            let info = adapter.get_info();
            tracing::info!("GPU adapter: {} ({:?})", info.name, info.backend);
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("section-pipeline"),
                    ..Default::default()
                })
                .await?;
            Ok(Self::new(device, queue))
        })
    }

    /// The wgpu buffer behind a handle, for binding in a render pass.
    pub fn buffer(&self, handle: &GpuBuffer) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle.id)
    }

    /// The device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(
        &mut self,
        label: &str,
        kind: BufferKind,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: kind.usage(),
            });
        let id = BufferId(self.next_id);
        self.next_id += 1;
        let size = buffer.size();
        self.buffers.insert(id, buffer);
        Ok(GpuBuffer { id, size, kind })
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        check_write(buffer, offset, bytes)?;
        let target = self
            .buffers
            .get(&buffer.id)
            .ok_or(GpuError::UnknownBuffer(buffer.id))?;
        self.queue.write_buffer(target, offset, bytes);
        Ok(())
    }

    fn close_buffer(&mut self, buffer: GpuBuffer) {
        match self.buffers.remove(&buffer.id) {
            Some(target) => target.destroy(),
            None => tracing::warn!("close of unknown buffer {:?}", buffer.id),
        }
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`GpuBackend`] that stores buffer contents in host memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buffers: FxHashMap<BufferId, Vec<u8>>,
    next_id: u64,
    created: usize,
    writes: usize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a buffer.
    pub fn contents(&self, handle: &GpuBuffer) -> Option<&[u8]> {
        self.buffers.get(&handle.id).map(Vec::as_slice)
    }

    /// Total buffers ever created.
    pub fn created_count(&self) -> usize {
        self.created
    }

    /// Total in-place writes performed.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl GpuBackend for MemoryBackend {
    fn create_buffer(
        &mut self,
        _label: &str,
        kind: BufferKind,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.buffers.insert(id, contents.to_vec());
        Ok(GpuBuffer {
            id,
            size: contents.len() as u64,
            kind,
        })
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        check_write(buffer, offset, bytes)?;
        let target = self
            .buffers
            .get_mut(&buffer.id)
            .ok_or(GpuError::UnknownBuffer(buffer.id))?;
        let start = offset as usize;
        target[start..start + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn close_buffer(&mut self, buffer: GpuBuffer) {
        if self.buffers.remove(&buffer.id).is_none() {
            tracing::warn!("close of unknown buffer {:?}", buffer.id);
        }
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}
