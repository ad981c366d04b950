use wgpu::util::DeviceExt;

use super::{WorkgroupSize, create_compute_pipeline, texture_entry, uniform_entry};
use crate::error::{Result, VolumeError};
use crate::gpu::{VolumeTexture, WGPU};
use crate::volume::{Dimensions, Rescale, ValueRange};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RescaleParams {
    slope: f32,
    intercept: f32,
    _padding: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GradientParams {
    min_value: f32,
    max_value: f32,
    gradient_scale: f32,
    _padding: f32,
}

/// A per-voxel transform from one volume texture into another.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TextureTransform {
    /// `out = in * slope + intercept` into an R32Float volume.
    Rescale(Rescale),
    /// Central-difference gradient of the normalized field plus the
    /// normalized value, into an Rgba16Float volume.
    Gradient { range: ValueRange, scale: f32 },
}

impl TextureTransform {
    pub fn label(&self) -> &'static str {
        match self {
            TextureTransform::Rescale(_) => "Rescale Transform",
            TextureTransform::Gradient { .. } => "Gradient Shading Transform",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TextureTransform::Rescale(rescale) => {
                Rescale::new(rescale.slope, rescale.intercept)?;
            }
            TextureTransform::Gradient { range, scale } => {
                range.validate()?;
                if !scale.is_finite() {
                    return Err(VolumeError::InvalidGradientScale(*scale));
                }
            }
        }
        Ok(())
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        match self {
            TextureTransform::Rescale(_) => wgpu::TextureFormat::R32Float,
            TextureTransform::Gradient { .. } => wgpu::TextureFormat::Rgba16Float,
        }
    }

    /// WGSL source for the given workgroup size. Deterministic: parameters
    /// travel in a uniform buffer, only the workgroup size is baked in.
    pub fn shader_source(&self, workgroup: WorkgroupSize) -> String {
        let body = match self {
            TextureTransform::Rescale(_) => include_str!("../shaders/rescale.wgsl"),
            TextureTransform::Gradient { .. } => include_str!("../shaders/gradient.wgsl"),
        };
        workgroup.shader_header() + body
    }

    /// Input volume, output storage volume, parameter uniform.
    pub fn bind_group_layout_entries(&self) -> [wgpu::BindGroupLayoutEntry; 3] {
        [
            texture_entry(0),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: self.output_format(),
                    view_dimension: wgpu::TextureViewDimension::D3,
                },
                count: None,
            },
            uniform_entry(2),
        ]
    }

    fn params(&self) -> Vec<u8> {
        match *self {
            TextureTransform::Rescale(rescale) => bytemuck::bytes_of(&RescaleParams {
                slope: rescale.slope,
                intercept: rescale.intercept,
                _padding: [0.0; 2],
            })
            .to_vec(),
            TextureTransform::Gradient { range, scale } => bytemuck::bytes_of(&GradientParams {
                min_value: range.min,
                max_value: range.max,
                gradient_scale: scale,
                _padding: 0.0,
            })
            .to_vec(),
        }
    }
}

/// Textures a pass reads from and writes to. Both are borrowed for the
/// duration of the recording only.
#[derive(Clone, Copy, Debug)]
pub struct TransformTarget<'a> {
    pub input: &'a VolumeTexture,
    pub output: &'a VolumeTexture,
}

/// A [`TextureTransform`] with its bind group layout and pipeline built
/// once at construction.
pub struct TexturePass {
    wgpu: WGPU,
    transform: TextureTransform,
    workgroup: WorkgroupSize,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl TexturePass {
    pub fn new(wgpu: &WGPU, transform: TextureTransform, workgroup: WorkgroupSize) -> Result<Self> {
        transform.validate()?;
        workgroup.validate(&wgpu.device.limits())?;
        let bind_group_layout = Self::create_bind_group_layout(&wgpu.device, &transform);
        let pipeline =
            Self::create_pipeline(&wgpu.device, &transform, workgroup, &bind_group_layout);

        Ok(Self {
            wgpu: wgpu.clone(),
            transform,
            workgroup,
            bind_group_layout,
            pipeline,
        })
    }

    pub fn create_bind_group_layout(
        device: &wgpu::Device,
        transform: &TextureTransform,
    ) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(transform.label()),
            entries: &transform.bind_group_layout_entries(),
        })
    }

    /// Pure with respect to its inputs: calling it again yields a pipeline
    /// with identical dispatch behaviour.
    pub fn create_pipeline(
        device: &wgpu::Device,
        transform: &TextureTransform,
        workgroup: WorkgroupSize,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::ComputePipeline {
        create_compute_pipeline(
            device,
            transform.label(),
            transform.shader_source(workgroup),
            bind_group_layout,
        )
    }

    /// Swap the transform parameters. The pipeline only depends on the
    /// variant, so it is kept as is.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::TransformKind`] if `transform` is a different
    /// variant than the one this pass was built for.
    pub fn set_transform(&mut self, transform: TextureTransform) -> Result<()> {
        transform.validate()?;
        if std::mem::discriminant(&transform) != std::mem::discriminant(&self.transform) {
            return Err(VolumeError::TransformKind {
                expected: self.transform.label(),
                found: transform.label(),
            });
        }
        self.transform = transform;
        Ok(())
    }

    pub fn transform(&self) -> &TextureTransform {
        &self.transform
    }

    pub fn workgroup(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Allocate an output volume in the format this pass writes.
    pub fn create_output(&self, dimensions: Dimensions) -> Result<VolumeTexture> {
        self.wgpu.create_volume_texture(
            self.transform.label(),
            dimensions,
            self.transform.output_format(),
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        )
    }

    /// Bind `target` to this pass. Rebuild whenever the textures change.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::MismatchedTextures`] if input and output
    /// differ in size and [`VolumeError::OutputFormat`] if the output is
    /// not in [`TextureTransform::output_format`].
    pub fn create_bind_group(&self, target: &TransformTarget<'_>) -> Result<wgpu::BindGroup> {
        if target.input.dimensions != target.output.dimensions {
            return Err(VolumeError::MismatchedTextures {
                input: target.input.dimensions,
                output: target.output.dimensions,
            });
        }
        let expected = self.transform.output_format();
        if target.output.format != expected {
            return Err(VolumeError::OutputFormat {
                expected,
                found: target.output.format,
            });
        }

        let params_buffer = self
            .wgpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Transform Params Buffer"),
                contents: &self.transform.params(),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        Ok(self
            .wgpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(self.transform.label()),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&target.input.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&target.output.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            }))
    }

    /// Record the pass into `encoder`. Results are visible once the
    /// encoder has been submitted.
    pub fn execute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &TransformTarget<'_>,
    ) -> Result<()> {
        target.input.dimensions.validate()?;
        let bind_group = self.create_bind_group(target)?;
        let (x, y, z) = self.workgroup.dispatch_extents(target.input.dimensions);
        log::debug!(
            "{}: dispatching {x}x{y}x{z} workgroups over {}",
            self.transform.label(),
            target.input.dimensions
        );

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.transform.label()),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(x, y, z);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_source_is_deterministic() {
        let transform = TextureTransform::Rescale(Rescale::new(2.0, -5.0).unwrap());
        let size = WorkgroupSize::new(4, 4, 4);
        assert_eq!(transform.shader_source(size), transform.shader_source(size));
        assert!(transform.shader_source(size).contains("texture_storage_3d<r32float, write>"));
    }

    #[test]
    fn gradient_writes_rgba16_float() {
        let transform = TextureTransform::Gradient {
            range: ValueRange::new(0.0, 1.0).unwrap(),
            scale: 1.0,
        };
        assert_eq!(transform.output_format(), wgpu::TextureFormat::Rgba16Float);
        let entries = transform.bind_group_layout_entries();
        assert!(matches!(
            entries[1].ty,
            wgpu::BindingType::StorageTexture {
                format: wgpu::TextureFormat::Rgba16Float,
                ..
            }
        ));
        assert!(transform.shader_source(WorkgroupSize::default()).contains("rgba16float"));
    }

    #[test]
    fn params_match_uniform_layout() {
        let rescale = TextureTransform::Rescale(Rescale::new(2.0, -5.0).unwrap());
        let bytes = rescale.params();
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 2.0);
        assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into().unwrap()), -5.0);

        let gradient = TextureTransform::Gradient {
            range: ValueRange::new(-5.0, 135.0).unwrap(),
            scale: 0.5,
        };
        let bytes = gradient.params();
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32::from_ne_bytes(bytes[8..12].try_into().unwrap()), 0.5);
    }

    #[test]
    fn rejects_non_finite_parameters() {
        let rescale = TextureTransform::Rescale(Rescale {
            slope: f32::NAN,
            intercept: 0.0,
        });
        assert!(rescale.validate().is_err());
        let gradient = TextureTransform::Gradient {
            range: ValueRange { min: 1.0, max: 1.0 },
            scale: 1.0,
        };
        assert!(gradient.validate().is_err());
    }
}
