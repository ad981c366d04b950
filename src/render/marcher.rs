use image::RgbaImage;

use super::compositing::{DEFAULT_DEPTH, DEPTH_ALPHA, SATURATION_ALPHA, TransferFunction};
use super::mesh::{GpuMesh, ProxyMesh};
use super::uniforms::{UNIFORM_BUFFER_SIZE, VolumeRendererUniforms};
use crate::config::RenderConfig;
use crate::error::{Result, VolumeError};
use crate::gpu::{VolumeTexture, WGPU};
use crate::volume::Dimensions;

/// Rasterizes a proxy mesh and marches one ray per covered fragment
/// through the scalar volume, compositing front to back.
///
/// Bind group 0 holds the [`VolumeRendererUniforms`], bind group 1 the
/// scalar volume and the gradient volume used for shading. Without a
/// gradient volume a 1x1x1 placeholder is bound and shading is compiled out.
pub struct VolumeRayMarcher {
    wgpu: WGPU,
    config: RenderConfig,
    shading_enabled: bool,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    volume_bind_group: wgpu::BindGroup,
    mesh: GpuMesh,
}

impl VolumeRayMarcher {
    pub fn new(
        wgpu: &WGPU,
        config: RenderConfig,
        volume: &VolumeTexture,
        shading: Option<&VolumeTexture>,
        mesh: &ProxyMesh,
    ) -> Result<Self> {
        config.validate()?;
        volume.dimensions.validate()?;
        if let Some(shading) = shading {
            if shading.dimensions != volume.dimensions {
                return Err(VolumeError::MismatchedTextures {
                    input: volume.dimensions,
                    output: shading.dimensions,
                });
            }
        }

        let device = &wgpu.device;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ray March Uniform Buffer"),
            size: UNIFORM_BUFFER_SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Ray March Uniform Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(UNIFORM_BUFFER_SIZE as u64),
                    },
                    count: None,
                }],
            });
        let volume_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Ray March Volume Bind Group Layout"),
                entries: &[fragment_texture_entry(0), fragment_texture_entry(1)],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray March Uniform Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let placeholder;
        let shading_view = match shading {
            Some(shading) => &shading.view,
            None => {
                placeholder = wgpu.create_volume_texture(
                    "Shading Placeholder",
                    Dimensions::new(1, 1, 1),
                    wgpu::TextureFormat::Rgba16Float,
                    wgpu::TextureUsages::TEXTURE_BINDING,
                )?;
                &placeholder.view
            }
        };
        let volume_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray March Volume Bind Group"),
            layout: &volume_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&volume.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(shading_view),
                },
            ],
        });

        let shading_enabled = shading.is_some();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ray March Shader"),
            source: wgpu::ShaderSource::Wgsl(
                Self::shader_source(&config.transfer, shading_enabled).into(),
            ),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray March Pipeline Layout"),
            bind_group_layouts: &[&uniform_bind_group_layout, &volume_bind_group_layout],
            push_constant_ranges: &[],
        });
        log::debug!(
            "Creating ray march pipeline for {:?} (shading {})",
            config.color_format,
            if shading_enabled { "on" } else { "off" }
        );
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Ray March Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[GpuMesh::vertex_buffer_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.color_format,
                    // compositing output is premultiplied
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: config.depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            wgpu: wgpu.clone(),
            config,
            shading_enabled,
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            volume_bind_group,
            mesh: GpuMesh::new(wgpu, mesh),
        })
    }

    /// WGSL source with the transfer function and compositing thresholds
    /// baked in as constants.
    pub fn shader_source(transfer: &TransferFunction, shading_enabled: bool) -> String {
        format!(
            "{}const SHADING_ENABLED: bool = {shading_enabled};\nconst SATURATION_ALPHA: f32 = {SATURATION_ALPHA:?};\nconst DEPTH_ALPHA: f32 = {DEPTH_ALPHA:?};\nconst DEFAULT_DEPTH: f32 = {DEFAULT_DEPTH:?};\n\n{}",
            transfer.shader_constants(),
            include_str!("../shaders/ray_march.wgsl")
        )
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn shading_enabled(&self) -> bool {
        self.shading_enabled
    }

    /// Validate and upload the frame uniforms. Takes effect for draws
    /// submitted afterwards.
    pub fn update_uniforms(&self, uniforms: &VolumeRendererUniforms) -> Result<()> {
        uniforms.validate()?;
        self.wgpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, &uniforms.to_bytes());
        Ok(())
    }

    /// Record the draw into a pass that targets [`RenderConfig::color_format`]
    /// with a [`RenderConfig::depth_format`] depth attachment.
    pub fn render(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        render_pass.set_bind_group(1, &self.volume_bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.mesh.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.draw_indexed(0..self.mesh.index_count, 0, 0..1);
    }

    /// Render one frame offscreen with the current uniforms and read it
    /// back. The colour format must be an 8-bit RGBA format.
    pub async fn render_to_image(&self, width: u32, height: u32) -> Result<RgbaImage> {
        let (color, _) = self.draw(width, height, false)?;
        self.read_image(&color, width, height).await
    }

    /// Like [`Self::render_to_image`], also reading back the depth
    /// attachment row by row. Requires a `Depth32Float` depth format.
    pub async fn render_with_depth(
        &self,
        width: u32,
        height: u32,
    ) -> Result<(RgbaImage, Vec<f32>)> {
        let depth_format = self.config.depth_format;
        if depth_format != wgpu::TextureFormat::Depth32Float {
            return Err(VolumeError::UnsupportedReadbackFormat(depth_format));
        }
        let (color, depth) = self.draw(width, height, true)?;
        let image = self.read_image(&color, width, height).await?;
        let bytes = self.wgpu.read_texture(&depth).await?;
        let depth: Vec<f32> = bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let expected = width as usize * height as usize;
        if depth.len() != expected {
            return Err(VolumeError::ReadbackSize {
                expected,
                found: depth.len(),
            });
        }
        Ok((image, depth))
    }

    /// Record and submit one frame into fresh targets.
    fn draw(
        &self,
        width: u32,
        height: u32,
        readable_depth: bool,
    ) -> Result<(wgpu::Texture, wgpu::Texture)> {
        let format = self.config.color_format;
        if !matches!(
            format,
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
        ) {
            return Err(VolumeError::UnsupportedReadbackFormat(format));
        }
        if width == 0 || height == 0 {
            return Err(VolumeError::EmptyTarget { width, height });
        }
        let limit = self.wgpu.device.limits().max_texture_dimension_2d;
        if width.max(height) > limit {
            return Err(VolumeError::ResourceLimit {
                what: "2D texture dimension",
                requested: width.max(height).into(),
                limit: limit.into(),
            });
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = self.create_target("Ray March Color Target", size, format, true);
        let depth = self.create_target(
            "Ray March Depth Target",
            size,
            self.config.depth_format,
            readable_depth,
        );
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .wgpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Ray March Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Ray March Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(DEFAULT_DEPTH),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
            self.render(&mut render_pass);
        }
        self.wgpu.queue.submit(Some(encoder.finish()));
        Ok((color, depth))
    }

    async fn read_image(
        &self,
        color: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage> {
        let bytes = self.wgpu.read_texture(color).await?;
        let expected = width as usize * height as usize * 4;
        let found = bytes.len();
        RgbaImage::from_raw(width, height, bytes)
            .ok_or(VolumeError::ReadbackSize { expected, found })
    }

    fn create_target(
        &self,
        label: &str,
        size: wgpu::Extent3d,
        format: wgpu::TextureFormat,
        readable: bool,
    ) -> wgpu::Texture {
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if readable {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        self.wgpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        })
    }
}

fn fragment_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_header_bakes_constants() {
        let source = VolumeRayMarcher::shader_source(&TransferFunction::default(), false);
        assert!(source.starts_with("const OPACITY_SCALE: f32 = 0.95;\n"));
        assert!(source.contains("const SHADING_ENABLED: bool = false;"));
        assert!(source.contains("const SATURATION_ALPHA: f32 = 0.99;"));
        assert!(source.contains("const DEPTH_ALPHA: f32 = 0.95;"));
        assert!(source.contains("const DEFAULT_DEPTH: f32 = 1.0;"));
        assert!(source.contains("fn fs_main"));

        let shaded = VolumeRayMarcher::shader_source(&TransferFunction::default(), true);
        assert!(shaded.contains("const SHADING_ENABLED: bool = true;"));
    }

    #[test]
    fn uniform_struct_pads_camera_position() {
        let source = include_str!("../shaders/ray_march.wgsl");
        let camera = source.find("camera_position: vec3<f32>").unwrap();
        let pad = source.find("_pad0: f32").unwrap();
        let step = source.find("step_size: f32").unwrap();
        assert!(camera < pad && pad < step);
    }
}
