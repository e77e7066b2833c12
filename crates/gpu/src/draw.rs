use bytemuck::{Pod, Zeroable};
use wrapworld_render::{DrawCall, GpuBackend, RenderError, RenderResult};

/// One object-list draw as the culling shader reads it.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArgs {
    pub list_address: u32,
    pub count: u32,
    _pad: [u32; 2],
}

impl DrawArgs {
    pub fn pack(call: DrawCall) -> RenderResult<Self> {
        let list_address = u32::try_from(call.list_address)
            .map_err(|_| RenderError::Backend(format!("list address {} exceeds u32", call.list_address)))?;
        let count = u32::try_from(call.count)
            .map_err(|_| RenderError::Backend(format!("list count {} exceeds u32", call.count)))?;
        Ok(Self {
            list_address,
            count,
            _pad: [0; 2],
        })
    }
}

/// [`GpuBackend`] that batches draws into a storage buffer of [`DrawArgs`],
/// written once per frame by [`submit`](Self::submit).
#[derive(Debug)]
pub struct IndirectDrawBackend {
    buffer: wgpu::Buffer,
    capacity: usize,
    pending: Vec<DrawArgs>,
}

impl IndirectDrawBackend {
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("draw_args"),
            size: (capacity * std::mem::size_of::<DrawArgs>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            capacity,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn pending(&self) -> &[DrawArgs] {
        &self.pending
    }

    /// Write this frame's draws to the GPU and start a new batch. Returns
    /// how many draws were written.
    pub fn submit(&mut self, queue: &wgpu::Queue) -> usize {
        let n = self.pending.len();
        if n > 0 {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&self.pending));
        }
        self.pending.clear();
        n
    }
}

impl GpuBackend for IndirectDrawBackend {
    fn draw(&mut self, call: DrawCall) -> RenderResult<()> {
        if self.pending.len() == self.capacity {
            return Err(RenderError::Backend(format!("more than {} draws in one frame", self.capacity)));
        }
        self.pending.push(DrawArgs::pack(call)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_args_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<DrawArgs>(), 16);
        let args = DrawArgs::pack(DrawCall {
            list_address: 3072,
            count: 7,
        })
        .unwrap();
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&args));
        assert_eq!(words, &[3072, 7, 0, 0]);
    }

    #[test]
    fn oversized_addresses_are_rejected() {
        let call = DrawCall {
            list_address: usize::MAX,
            count: 1,
        };
        assert!(matches!(DrawArgs::pack(call), Err(RenderError::Backend(_))));
    }
}
