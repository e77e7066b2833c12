use wrapworld_mem::{PageArena, PageSink, UploadError};

use crate::error::{GpuError, GpuResult};

/// Bytes needed to mirror `max_pages` pages of `page_size`, checked against
/// wgpu's copy alignment and the device's buffer limit.
pub fn mirror_size(page_size: usize, max_pages: usize, limit: u64) -> GpuResult<u64> {
    if page_size == 0 || page_size as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(GpuError::UnalignedPage(page_size));
    }
    let bytes = page_size as u64 * max_pages as u64;
    if bytes > limit {
        return Err(GpuError::ArenaTooLarge { bytes, limit });
    }
    Ok(bytes)
}

/// GPU storage buffer holding a copy of the physical page arena.
///
/// Sized for the arena's page ceiling up front, so a page's offset never
/// moves and shaders address records by physical offset.
#[derive(Debug)]
pub struct GpuPageMirror {
    buffer: wgpu::Buffer,
    page_size: usize,
    size: u64,
}

impl GpuPageMirror {
    pub fn new(device: &wgpu::Device, arena: &PageArena) -> GpuResult<Self> {
        let limits = device.limits();
        let limit = limits.max_buffer_size.min(u64::from(limits.max_storage_buffer_binding_size));
        let size = mirror_size(arena.page_size(), arena.max_pages(), limit)?;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("page_arena"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        tracing::debug!(size, page_size = arena.page_size(), "page arena mirrored on gpu");
        Ok(Self {
            buffer,
            page_size: arena.page_size(),
            size,
        })
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Page sink writing through `queue`. Borrowed per flush.
    pub fn sink<'a>(&'a self, queue: &'a wgpu::Queue) -> QueueSink<'a> {
        QueueSink { mirror: self, queue }
    }
}

/// [`PageSink`] that stages page writes on a wgpu queue.
pub struct QueueSink<'a> {
    mirror: &'a GpuPageMirror,
    queue: &'a wgpu::Queue,
}

impl PageSink for QueueSink<'_> {
    fn upload(&mut self, physical_page: usize, offset: usize, bytes: &[u8]) -> Result<(), UploadError> {
        let end = offset as u64 + bytes.len() as u64;
        if bytes.len() != self.mirror.page_size || end > self.mirror.size {
            return Err(UploadError {
                page: physical_page,
                reason: format!("range {offset}..{end} outside mirror of {} bytes", self.mirror.size),
            });
        }
        self.queue.write_buffer(&self.mirror.buffer, offset as u64, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_size_checks_alignment_and_limit() {
        assert_eq!(mirror_size(1536, 4, u64::MAX).unwrap(), 6144);
        assert!(matches!(mirror_size(6, 4, u64::MAX), Err(GpuError::UnalignedPage(6))));
        assert!(matches!(mirror_size(0, 4, u64::MAX), Err(GpuError::UnalignedPage(0))));
        assert!(matches!(
            mirror_size(1536, 1000, 4096),
            Err(GpuError::ArenaTooLarge { bytes: 1_536_000, limit: 4096 })
        ));
    }
}
