//! # DICOM ray marching library
//!
//! This crate renders stacks of DICOM slices as volumes on the GPU using
//! WGPU compute and render pipelines.
//!
//! Slices are assembled into a [`VolumeField`], either from
//! [`FileDicomObject<InMemDicomObject>`]s or from a folder where each ".dcm"
//! file is read. The [`VolumeProcessor`] then prepares the field on the
//! device:
//!  - Rescale (`value * slope + intercept`) into a float volume
//!  - Min/max reduction yielding the range used for normalization
//!  - Optional central-difference gradient volume for shading
//!
//! The prepared textures are drawn by the [`VolumeRayMarcher`], which
//! rasterizes a proxy cube and composites samples front to back along one
//! ray per fragment.
//!
//! Every GPU pass has a host counterpart in [`VoxelKernels`] built on
//! ndarray and rayon, selected with [`Processor::Cpu`]. DICOM files are
//! assumed to have the following attributes:
//!   - Axial data set
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series (Series Instance UID); slices of other
//!     series are skipped
//!
//! # Examples
//!
//! ## Rendering a DICOM directory
//!
//! ```no_run
//! # use dicom_raymarch::{
//! #     ProcessorConfig, ProxyMesh, RenderConfig, SliceLoader, SortBy, VolumeProcessor,
//! #     VolumeRayMarcher, WGPU,
//! # };
//! # use glam::{Mat4, Vec3};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let wgpu = WGPU::request_headless().await?;
//! let mut field = SliceLoader::load_from_directory("dicom", SortBy::InstanceNumber)?
//!     .into_volume_field()?;
//! let mut processor = VolumeProcessor::new(&wgpu, ProcessorConfig::default())?;
//! let prepared = processor.prepare(&mut field).await?;
//!
//! let config = RenderConfig::default();
//! let marcher = VolumeRayMarcher::new(
//!     &wgpu,
//!     config,
//!     &prepared.scalar,
//!     prepared.shading.as_ref(),
//!     &ProxyMesh::unit_cube(),
//! )?;
//! let camera = Vec3::new(0.0, 0.0, 3.5);
//! marcher.update_uniforms(&config.uniforms(
//!     field.model_matrix(),
//!     Mat4::look_at_rh(camera, Vec3::ZERO, Vec3::Y),
//!     Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0),
//!     camera,
//!     prepared.value_range()?,
//! ))?;
//! marcher.render_to_image(512, 512).await?.save("result.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! [`FileDicomObject<InMemDicomObject>`]: https://docs.rs/dicom-object/latest/dicom_object/struct.FileDicomObject.html

pub mod compute;
pub mod config;
pub mod enums;
pub mod error;
pub mod gpu;
pub mod kernels;
pub mod processor;
pub mod render;
pub mod slice_loader;
pub mod volume;

pub use compute::{MinMaxReducer, TexturePass, TextureTransform, TransformTarget, WorkgroupSize};
pub use config::{GradientConfig, ProcessorConfig, RenderConfig};
pub use enums::{Processor, SortBy};
pub use error::{Result, VolumeError};
pub use gpu::{VOLUME_BACKENDS, VolumeTexture, WGPU};
pub use kernels::VoxelKernels;
pub use processor::{PreparedVolume, VolumeProcessor};
pub use render::{
    ProxyMesh, TransferFunction, VolumeRayMarcher, VolumeRendererUniforms, march_ray,
};
pub use slice_loader::{LoadedSeries, SliceLoader, SliceLoaderError};
pub use volume::{Dimensions, MinMax, Rescale, SliceRecord, ValueRange, VolumeField};
