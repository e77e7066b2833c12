/// Errors from setting up GPU-side resources.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("page size {0} is not a multiple of the copy alignment")]
    UnalignedPage(usize),
    #[error("arena of {bytes} bytes exceeds the device buffer limit of {limit}")]
    ArenaTooLarge { bytes: u64, limit: u64 },
}

pub type GpuResult<T> = Result<T, GpuError>;
