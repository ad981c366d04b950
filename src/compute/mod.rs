//! Compute passes mapped over 3D volume textures.
//!
//! Per-voxel transforms are a closed set of [`TextureTransform`] variants
//! run through one [`TexturePass`]. The min/max reduction owns a scratch
//! buffer and lives in its own [`MinMaxReducer`].

mod min_max;
mod transform;

pub use min_max::{MinMaxReducer, merge_partials};
pub use transform::{TexturePass, TextureTransform, TransformTarget};

use crate::error::{Result, VolumeError};
use crate::volume::Dimensions;

/// Invocations per workgroup along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn invocations(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// `ceil(dim / size)` per axis, so every voxel is covered at least once.
    pub fn dispatch_extents(&self, dimensions: Dimensions) -> (u32, u32, u32) {
        (
            dimensions.width.div_ceil(self.x),
            dimensions.height.div_ceil(self.y),
            dimensions.depth.div_ceil(self.z),
        )
    }

    /// Check the size against the device's compute limits.
    pub fn validate(&self, limits: &wgpu::Limits) -> Result<()> {
        let size = (self.x, self.y, self.z);
        if self.x == 0 || self.y == 0 || self.z == 0 {
            return Err(VolumeError::InvalidWorkgroupSize {
                size,
                reason: "every axis must be at least 1",
            });
        }
        if self.x > limits.max_compute_workgroup_size_x
            || self.y > limits.max_compute_workgroup_size_y
            || self.z > limits.max_compute_workgroup_size_z
        {
            return Err(VolumeError::InvalidWorkgroupSize {
                size,
                reason: "an axis exceeds the device limit",
            });
        }
        if u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
            > u64::from(limits.max_compute_invocations_per_workgroup)
        {
            return Err(VolumeError::InvalidWorkgroupSize {
                size,
                reason: "too many invocations per workgroup",
            });
        }
        Ok(())
    }

    /// Constants prepended to every compute shader.
    pub(crate) fn shader_header(&self) -> String {
        format!(
            "const WG_X: u32 = {}u;\nconst WG_Y: u32 = {}u;\nconst WG_Z: u32 = {}u;\nconst TILE_SIZE: u32 = {}u;\n\n",
            self.x,
            self.y,
            self.z,
            self.invocations()
        )
    }
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        Self::new(4, 4, 4)
    }
}

/// Build a compute pipeline with a single bind group.
pub(crate) fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: String,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });
    log::debug!("Creating compute pipeline {label}");
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

pub(crate) fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_partial_workgroups() {
        let size = WorkgroupSize::new(8, 8, 4);
        assert_eq!(size.dispatch_extents(Dimensions::new(1, 1, 1)), (1, 1, 1));
        assert_eq!(size.dispatch_extents(Dimensions::new(8, 9, 4)), (1, 2, 1));
        assert_eq!(size.dispatch_extents(Dimensions::new(512, 512, 94)), (64, 64, 24));
    }

    #[test]
    fn validates_against_limits() {
        let limits = wgpu::Limits::default();
        assert!(WorkgroupSize::new(8, 8, 4).validate(&limits).is_ok());
        assert!(WorkgroupSize::new(0, 8, 4).validate(&limits).is_err());
        assert!(WorkgroupSize::new(16, 16, 2).validate(&limits).is_err());
        assert!(WorkgroupSize::new(1, 1, 65).validate(&limits).is_err());
    }

    #[test]
    fn shader_header_declares_tile_constants() {
        let header = WorkgroupSize::new(8, 8, 4).shader_header();
        assert!(header.contains("const WG_X: u32 = 8u;"));
        assert!(header.contains("const WG_Z: u32 = 4u;"));
        assert!(header.contains("const TILE_SIZE: u32 = 256u;"));
    }
}
