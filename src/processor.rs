use web_time::Instant;

use crate::compute::{MinMaxReducer, TexturePass, TextureTransform, TransformTarget};
use crate::config::{GradientConfig, ProcessorConfig};
use crate::enums::Processor;
use crate::error::{Result, VolumeError};
use crate::gpu::{VolumeTexture, WGPU};
use crate::kernels::VoxelKernels;
use crate::volume::{Dimensions, MinMax, Rescale, ValueRange, VolumeField, scalar_texture_usages};

/// Device textures ready for the ray marcher.
#[derive(Debug)]
pub struct PreparedVolume {
    pub dimensions: Dimensions,
    /// Rescaled scalar field, R32Float.
    pub scalar: VolumeTexture,
    /// Authoritative post-rescale range.
    pub range: MinMax,
    /// Gradient and normalized value, Rgba16Float.
    pub shading: Option<VolumeTexture>,
}

impl PreparedVolume {
    /// The range as used for normalization.
    ///
    /// # Errors
    ///
    /// A constant volume has no usable range and yields
    /// [`VolumeError::InvalidRange`].
    pub fn value_range(&self) -> Result<ValueRange> {
        self.range.to_range()
    }
}

struct GpuPasses {
    rescale: TexturePass,
    reducer: MinMaxReducer,
    gradient: Option<TexturePass>,
}

/// Turns an assembled [`VolumeField`] into render-ready textures: rescale,
/// reduce to the authoritative range, then optionally derive the gradient
/// volume used for shading.
pub struct VolumeProcessor {
    wgpu: WGPU,
    config: ProcessorConfig,
    passes: Option<GpuPasses>,
}

impl VolumeProcessor {
    /// Validate `config` and, for [`Processor::Gpu`], build every pipeline.
    pub fn new(wgpu: &WGPU, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let passes = match config.processor {
            Processor::Cpu => None,
            Processor::Gpu => {
                let rescale = TexturePass::new(
                    wgpu,
                    TextureTransform::Rescale(Rescale::IDENTITY),
                    config.transform_workgroup,
                )?;
                let reducer = MinMaxReducer::new(wgpu, config.reduction_tile)?;
                let gradient = config
                    .gradient
                    .map(|gradient| {
                        TexturePass::new(
                            wgpu,
                            TextureTransform::Gradient {
                                range: gradient.range.unwrap_or(ValueRange { min: 0.0, max: 1.0 }),
                                scale: gradient.scale,
                            },
                            config.transform_workgroup,
                        )
                    })
                    .transpose()?;
                Some(GpuPasses {
                    rescale,
                    reducer,
                    gradient,
                })
            }
        };

        Ok(Self {
            wgpu: wgpu.clone(),
            config,
            passes,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process `field` and store the reduced range back into it.
    pub async fn prepare(&mut self, field: &mut VolumeField) -> Result<PreparedVolume> {
        let started = Instant::now();
        let processor = self.config.processor;
        let gradient = self.config.gradient;
        let prepared = match self.passes.as_mut() {
            Some(passes) => Self::prepare_gpu(&self.wgpu, passes, gradient, field).await?,
            None => Self::prepare_cpu(&self.wgpu, gradient, field)?,
        };
        field.set_value_range(prepared.range);
        log::info!(
            "Prepared {} volume on {:?} in {:?}, range [{}, {}]",
            prepared.dimensions,
            processor,
            started.elapsed(),
            prepared.range.min,
            prepared.range.max
        );
        Ok(prepared)
    }

    async fn prepare_gpu(
        wgpu: &WGPU,
        passes: &mut GpuPasses,
        gradient: Option<GradientConfig>,
        field: &VolumeField,
    ) -> Result<PreparedVolume> {
        let dimensions = field.dimensions();
        let raw = field.upload(wgpu)?;
        let rescale = field.rescale();

        let mut encoder = wgpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Volume Processing Encoder"),
            });
        let scalar = if rescale == Rescale::IDENTITY {
            log::debug!("Identity rescale, reducing the uploaded field directly");
            raw
        } else {
            passes.rescale.set_transform(TextureTransform::Rescale(rescale))?;
            let output = passes.rescale.create_output(dimensions)?;
            passes.rescale.execute(
                &mut encoder,
                &TransformTarget {
                    input: &raw,
                    output: &output,
                },
            )?;
            output
        };
        passes.reducer.execute(&mut encoder, &scalar)?;
        let submission = wgpu.queue.submit(Some(encoder.finish()));
        let range = passes.reducer.read_min_max(submission).await?;

        let shading = match (gradient, passes.gradient.as_mut()) {
            (Some(config), Some(pass)) => {
                let normalization = match config.range {
                    Some(range) => range,
                    None => range.to_range()?,
                };
                pass.set_transform(TextureTransform::Gradient {
                    range: normalization,
                    scale: config.scale,
                })?;
                let output = pass.create_output(dimensions)?;
                let mut encoder = wgpu
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Gradient Encoder"),
                    });
                pass.execute(
                    &mut encoder,
                    &TransformTarget {
                        input: &scalar,
                        output: &output,
                    },
                )?;
                wgpu.queue.submit(Some(encoder.finish()));
                Some(output)
            }
            _ => None,
        };

        Ok(PreparedVolume {
            dimensions,
            scalar,
            range,
            shading,
        })
    }

    fn prepare_cpu(
        wgpu: &WGPU,
        gradient: Option<GradientConfig>,
        field: &VolumeField,
    ) -> Result<PreparedVolume> {
        let dimensions = field.dimensions();
        let data = VoxelKernels::rescale(field.data(), field.rescale());
        let range = VoxelKernels::min_max(&data).ok_or(VolumeError::NoFiniteValues)?;

        let scalar = wgpu.create_volume_texture(
            "Volume Field Texture",
            dimensions,
            wgpu::TextureFormat::R32Float,
            scalar_texture_usages(),
        )?;
        let voxels: Vec<f32> = data.iter().copied().collect();
        wgpu.write_voxels(&scalar, &voxels);

        let shading = match gradient {
            Some(config) => {
                let normalization = match config.range {
                    Some(range) => range,
                    None => range.to_range()?,
                };
                let texels: Vec<half::f16> =
                    VoxelKernels::gradient(&data, normalization, config.scale)
                        .iter()
                        .flatten()
                        .map(|&component| half::f16::from_f32(component))
                        .collect();
                let output = wgpu.create_volume_texture(
                    "Gradient Shading Texture",
                    dimensions,
                    wgpu::TextureFormat::Rgba16Float,
                    wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_DST
                        | wgpu::TextureUsages::COPY_SRC,
                )?;
                wgpu.write_texels(&output, bytemuck::cast_slice(&texels));
                Some(output)
            }
            None => None,
        };

        Ok(PreparedVolume {
            dimensions,
            scalar,
            range,
            shading,
        })
    }
}
