use wgpu::PollType;

use crate::error::{Result, VolumeError};
use crate::volume::Dimensions;

/// Device and queue handed to every GPU component. Both handles are
/// reference counted by wgpu, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// A 3D texture on the device together with its default view.
#[derive(Debug)]
pub struct VolumeTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub dimensions: Dimensions,
    pub format: wgpu::TextureFormat,
}

/// Backends whose compute stage writes every slice of a `texture_storage_3d`.
/// GL only reaches depth slice 0.
pub const VOLUME_BACKENDS: wgpu::Backends = wgpu::Backends::PRIMARY;

pub fn supports_volume_storage(backend: wgpu::Backend) -> bool {
    VOLUME_BACKENDS.contains(backend.into())
}

impl WGPU {
    /// Wrap an existing device. It should come from an adapter accepted by
    /// [`supports_volume_storage`].
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Acquire an adapter without a surface and request a device with the
    /// default limits.
    ///
    /// Only [`VOLUME_BACKENDS`] are considered, a GL adapter is never
    /// returned.
    pub async fn request_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: VOLUME_BACKENDS,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let info = adapter.get_info();
        if !supports_volume_storage(info.backend) {
            return Err(VolumeError::UnsupportedBackend(info.backend));
        }
        log::info!("Using adapter {:?} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("dicom-raymarch device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        Ok(Self { device, queue })
    }

    /// Create an empty 3D texture sized to `dimensions`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::EmptyVolume`] for a zero-sized axis and
    /// [`VolumeError::ResourceLimit`] if any axis exceeds the device's 3D
    /// texture limit.
    pub fn create_volume_texture(
        &self,
        label: &str,
        dimensions: Dimensions,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Result<VolumeTexture> {
        dimensions.validate()?;
        let limit = self.device.limits().max_texture_dimension_3d;
        let largest = dimensions.width.max(dimensions.height).max(dimensions.depth);
        if largest > limit {
            return Err(VolumeError::ResourceLimit {
                what: "3D texture dimension",
                requested: largest.into(),
                limit: limit.into(),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: dimensions.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(VolumeTexture {
            texture,
            view,
            dimensions,
            format,
        })
    }

    /// Write single-channel f32 voxels, x fastest, into an R32Float volume.
    pub fn write_voxels(&self, target: &VolumeTexture, voxels: &[f32]) {
        self.write_texels(target, bytemuck::cast_slice(voxels));
    }

    /// Write tightly packed texels, x fastest, covering the whole volume.
    pub fn write_texels(&self, target: &VolumeTexture, texels: &[u8]) {
        let dimensions = target.dimensions;
        let bytes_per_texel = target.format.block_copy_size(None).unwrap_or(4);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dimensions.width * bytes_per_texel),
                rows_per_image: Some(dimensions.height),
            },
            dimensions.extent(),
        );
    }

    /// Create a storage buffer, checking the requested size against the
    /// device limits first.
    pub fn create_storage_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer> {
        let limits = self.device.limits();
        let limit = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size.into());
        if size > limit {
            return Err(VolumeError::ResourceLimit {
                what: "Buffer size",
                requested: size,
                limit,
            });
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    }

    /// Copy a whole buffer into a staging buffer, submit, and return its
    /// bytes once the mapping is ready.
    pub async fn read_buffer(&self, source: &wgpu::Buffer) -> Result<Vec<u8>> {
        let size = source.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        self.map_read(&staging).await
    }

    /// Read a texture back to the host as tightly packed rows.
    pub async fn read_texture(&self, texture: &wgpu::Texture) -> Result<Vec<u8>> {
        let size = texture.size();
        let aspect = if texture.format().has_depth_aspect() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let bytes_per_texel = texture.format().block_copy_size(Some(aspect)).unwrap_or(4);
        let unpadded_row = size.width * bytes_per_texel;
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let rows = size.height * size.depth_or_array_layers;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Buffer"),
            size: u64::from(padded_row) * u64::from(rows),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        self.queue.submit(Some(encoder.finish()));

        let padded = self.map_read(&staging).await?;
        Ok(padded
            .chunks_exact(padded_row as usize)
            .flat_map(|row| &row[..unpadded_row as usize])
            .copied()
            .collect())
    }

    /// Read an R32Float volume back as voxels, x fastest.
    pub async fn read_voxels(&self, volume: &VolumeTexture) -> Result<Vec<f32>> {
        let bytes = self.read_texture(&volume.texture).await?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    async fn map_read(&self, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
        let buffer_slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        receiver.await.map_err(|_| VolumeError::MapCanceled)??;

        let data = buffer_slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_is_excluded_from_volume_backends() {
        assert!(!supports_volume_storage(wgpu::Backend::Gl));
        assert!(!VOLUME_BACKENDS.contains(wgpu::Backends::GL));
        assert!(supports_volume_storage(wgpu::Backend::Vulkan));
        assert!(supports_volume_storage(wgpu::Backend::Metal));
    }
}
