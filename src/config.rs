use glam::{Mat4, Vec3};

use crate::compute::WorkgroupSize;
use crate::enums::Processor;
use crate::error::{Result, VolumeError};
use crate::render::{TransferFunction, VolumeRendererUniforms};
use crate::volume::ValueRange;

/// Settings of the optional gradient shading pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientConfig {
    /// Multiplier applied to the central differences.
    pub scale: f32,
    /// Normalization range. Defaults to the reduced range of the volume.
    pub range: Option<ValueRange>,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            range: None,
        }
    }
}

impl GradientConfig {
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_range(mut self, range: ValueRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() {
            return Err(VolumeError::InvalidGradientScale(self.scale));
        }
        if let Some(range) = &self.range {
            range.validate()?;
        }
        Ok(())
    }
}

/// How a [`VolumeField`](crate::VolumeField) is turned into render-ready
/// textures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessorConfig {
    pub processor: Processor,
    /// Workgroup of the per-voxel rescale and gradient passes.
    pub transform_workgroup: WorkgroupSize,
    /// Tile of the min/max reduction. Needs a power-of-two invocation count.
    pub reduction_tile: WorkgroupSize,
    pub gradient: Option<GradientConfig>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processor: Processor::default(),
            transform_workgroup: WorkgroupSize::new(4, 4, 4),
            reduction_tile: WorkgroupSize::new(8, 8, 4),
            gradient: None,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processor(mut self, processor: Processor) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_transform_workgroup(mut self, workgroup: WorkgroupSize) -> Self {
        self.transform_workgroup = workgroup;
        self
    }

    pub fn with_reduction_tile(mut self, tile: WorkgroupSize) -> Self {
        self.reduction_tile = tile;
        self
    }

    pub fn with_gradient(mut self, gradient: GradientConfig) -> Self {
        self.gradient = Some(gradient);
        self
    }

    /// Checks that do not need a device. Workgroup limits are checked when
    /// the pipelines are built.
    pub fn validate(&self) -> Result<()> {
        let tile = self.reduction_tile;
        if tile.invocations() == 0 || !tile.invocations().is_power_of_two() {
            return Err(VolumeError::InvalidWorkgroupSize {
                size: (tile.x, tile.y, tile.z),
                reason: "reduction tiles need a power-of-two invocation count",
            });
        }
        let workgroup = self.transform_workgroup;
        if workgroup.invocations() == 0 {
            return Err(VolumeError::InvalidWorkgroupSize {
                size: (workgroup.x, workgroup.y, workgroup.z),
                reason: "every axis must be at least 1",
            });
        }
        if let Some(gradient) = &self.gradient {
            gradient.validate()?;
        }
        Ok(())
    }
}

/// Render target formats and ray marching parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderConfig {
    pub color_format: wgpu::TextureFormat,
    /// The marcher writes fragment depth, so a depth attachment is required.
    pub depth_format: wgpu::TextureFormat,
    pub transfer: TransferFunction,
    pub step_size: f32,
    pub max_steps: i32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            depth_format: wgpu::TextureFormat::Depth32Float,
            transfer: TransferFunction::default(),
            step_size: 0.01,
            max_steps: 384,
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    pub fn with_depth_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = format;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferFunction) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_max_steps(mut self, max_steps: i32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err(VolumeError::InvalidStepSize(self.step_size));
        }
        if self.max_steps < 1 {
            return Err(VolumeError::InvalidMaxSteps(self.max_steps));
        }
        if !self.depth_format.has_depth_aspect() {
            return Err(VolumeError::OutputFormat {
                expected: wgpu::TextureFormat::Depth32Float,
                found: self.depth_format,
            });
        }
        self.transfer.validate()
    }

    /// Frame uniforms using this config's step size and step limit.
    pub fn uniforms(
        &self,
        model_matrix: Mat4,
        view_matrix: Mat4,
        projection_matrix: Mat4,
        camera_position: Vec3,
        range: ValueRange,
    ) -> VolumeRendererUniforms {
        VolumeRendererUniforms {
            model_matrix,
            view_matrix,
            projection_matrix,
            camera_position,
            step_size: self.step_size,
            max_steps: self.max_steps,
            min_value: range.min,
            max_value: range.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let processor = ProcessorConfig::default();
        assert_eq!(processor.processor, Processor::Gpu);
        assert_eq!(processor.reduction_tile.invocations(), 256);
        assert!(processor.validate().is_ok());

        let render = RenderConfig::default();
        assert_eq!(render.max_steps, 384);
        assert_eq!(render.depth_format, wgpu::TextureFormat::Depth32Float);
        assert!(render.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_tiles() {
        let config = ProcessorConfig::new().with_reduction_tile(WorkgroupSize::new(3, 3, 3));
        assert!(matches!(
            config.validate(),
            Err(VolumeError::InvalidWorkgroupSize { .. })
        ));
        let config = ProcessorConfig::new().with_reduction_tile(WorkgroupSize::new(16, 4, 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_gradient_settings() {
        let config = ProcessorConfig::new()
            .with_gradient(GradientConfig::default().with_scale(f32::INFINITY));
        assert!(matches!(
            config.validate(),
            Err(VolumeError::InvalidGradientScale(_))
        ));
        let config = ProcessorConfig::new().with_gradient(GradientConfig {
            scale: 1.0,
            range: Some(ValueRange { min: 3.0, max: 3.0 }),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_march_parameters() {
        assert!(matches!(
            RenderConfig::new().with_step_size(-0.1).validate(),
            Err(VolumeError::InvalidStepSize(_))
        ));
        assert!(matches!(
            RenderConfig::new().with_max_steps(0).validate(),
            Err(VolumeError::InvalidMaxSteps(0))
        ));
        assert!(
            RenderConfig::new()
                .with_depth_format(wgpu::TextureFormat::Rgba8Unorm)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn uniforms_carry_march_parameters() {
        let config = RenderConfig::new().with_step_size(0.02).with_max_steps(64);
        let range = ValueRange::new(-5.0, 135.0).unwrap();
        let uniforms =
            config.uniforms(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::Z, range);
        assert_eq!(uniforms.step_size, 0.02);
        assert_eq!(uniforms.max_steps, 64);
        assert_eq!(uniforms.range(), range);
        assert!(uniforms.validate().is_ok());
    }
}
