use thiserror::Error;

use crate::volume::Dimensions;

pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Volume dimensions must be non-zero, got {0}")]
    EmptyVolume(Dimensions),

    #[error("No slices provided")]
    NoSlices,

    #[error("Slice {index} is {found:?}, expected {expected:?}")]
    InconsistentSliceDimensions {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Slice {index} has {found} samples, expected {expected}")]
    SampleCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value range: min {min} must be finite and below max {max}")]
    InvalidRange { min: f32, max: f32 },

    #[error("Step size must be positive, got {0}")]
    InvalidStepSize(f32),

    #[error("Max steps must be at least 1, got {0}")]
    InvalidMaxSteps(i32),

    #[error("Opacity scale must lie in [0, 1], got {0}")]
    InvalidOpacityScale(f32),

    #[error("Invalid workgroup size {size:?}: {reason}")]
    InvalidWorkgroupSize {
        size: (u32, u32, u32),
        reason: &'static str,
    },

    #[error("Rescale parameters must be finite, got slope {slope} and intercept {intercept}")]
    InvalidRescale { slope: f32, intercept: f32 },

    #[error("Gradient scale must be finite, got {0}")]
    InvalidGradientScale(f32),

    #[error("Input texture is {input}, output texture is {output}")]
    MismatchedTextures { input: Dimensions, output: Dimensions },

    #[error("Pass was built for {expected}, got {found}")]
    TransformKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Output texture has format {found:?}, expected {expected:?}")]
    OutputFormat {
        expected: wgpu::TextureFormat,
        found: wgpu::TextureFormat,
    },

    #[error("Cannot read back render targets of format {0:?}")]
    UnsupportedReadbackFormat(wgpu::TextureFormat),

    #[error("Render target must be non-empty, got {width}x{height}")]
    EmptyTarget { width: u32, height: u32 },

    #[error("Read back {found} bytes, expected {expected}")]
    ReadbackSize { expected: usize, found: usize },

    #[error("{what} of {requested} exceeds the device limit of {limit}")]
    ResourceLimit {
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error("No suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("Backend {0:?} cannot write 3D storage textures past the first slice")]
    UnsupportedBackend(wgpu::Backend),

    #[error("Device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("Buffer mapping was dropped before completion")]
    MapCanceled,

    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("No reduction has been recorded on this reducer")]
    ReductionNotRecorded,

    #[error("Reduction found no finite value")]
    NoFiniteValues,
}
