use web_time::Instant;
use wgpu::util::DeviceExt;

use super::{WorkgroupSize, create_compute_pipeline, texture_entry, uniform_entry};
use crate::error::{Result, VolumeError};
use crate::gpu::{VolumeTexture, WGPU};
use crate::volume::MinMax;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ReductionParams {
    dimensions: [u32; 3],
    identity_min: f32,
    identity_max: f32,
    _padding: [f32; 3],
}

/// Per-workgroup `(min, max)` pairs of the last recorded reduction, laid
/// out `x + y * groups.x + z * groups.x * groups.y`.
struct PartialBuffer {
    buffer: wgpu::Buffer,
    groups: (u32, u32, u32),
}

/// Global min/max of a volume: a tree reduction inside each tile on the
/// device, then a host-side fold over the per-tile partials.
pub struct MinMaxReducer {
    wgpu: WGPU,
    tile: WorkgroupSize,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    partials: Option<PartialBuffer>,
}

impl MinMaxReducer {
    /// # Errors
    ///
    /// The tile must fit the device limits and hold a power-of-two number
    /// of invocations, otherwise the tree reduction would skip lanes.
    pub fn new(wgpu: &WGPU, tile: WorkgroupSize) -> Result<Self> {
        tile.validate(&wgpu.device.limits())?;
        if !tile.invocations().is_power_of_two() {
            return Err(VolumeError::InvalidWorkgroupSize {
                size: (tile.x, tile.y, tile.z),
                reason: "reduction tiles need a power-of-two invocation count",
            });
        }

        let bind_group_layout =
            wgpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Min Max Bind Group Layout"),
                    entries: &[
                        texture_entry(0),
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: false },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        uniform_entry(2),
                    ],
                });
        let pipeline = create_compute_pipeline(
            &wgpu.device,
            "Min Max Reduction",
            Self::shader_source(tile),
            &bind_group_layout,
        );

        Ok(Self {
            wgpu: wgpu.clone(),
            tile,
            bind_group_layout,
            pipeline,
            partials: None,
        })
    }

    pub fn shader_source(tile: WorkgroupSize) -> String {
        tile.shader_header() + include_str!("../shaders/min_max.wgsl")
    }

    pub fn tile(&self) -> WorkgroupSize {
        self.tile
    }

    /// Number of partial pairs produced by the last recorded reduction.
    pub fn partial_count(&self) -> Option<usize> {
        self.partials.as_ref().map(|partials| {
            let (x, y, z) = partials.groups;
            x as usize * y as usize * z as usize
        })
    }

    /// Record a reduction of `input` into `encoder`. The previous partial
    /// buffer is destroyed first, so at most one is alive per reducer.
    pub fn execute(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        input: &VolumeTexture,
    ) -> Result<()> {
        let dimensions = input.dimensions;
        dimensions.validate()?;

        let groups = self.tile.dispatch_extents(dimensions);
        let count = u64::from(groups.0) * u64::from(groups.1) * u64::from(groups.2);

        if let Some(previous) = self.partials.take() {
            previous.buffer.destroy();
        }
        let buffer = self.wgpu.create_storage_buffer(
            "Min Max Partials Buffer",
            count * std::mem::size_of::<MinMax>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;

        let params = ReductionParams {
            dimensions: [dimensions.width, dimensions.height, dimensions.depth],
            identity_min: MinMax::IDENTITY.min,
            identity_max: MinMax::IDENTITY.max,
            _padding: [0.0; 3],
        };
        let params_buffer = self
            .wgpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Min Max Params Buffer"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self
            .wgpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Min Max Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&input.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            });

        log::debug!(
            "Min Max Reduction: dispatching {}x{}x{} tiles of {} over {dimensions}",
            groups.0,
            groups.1,
            groups.2,
            self.tile.invocations()
        );
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Min Max Reduction"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups.0, groups.1, groups.2);
        }

        self.partials = Some(PartialBuffer { buffer, groups });
        Ok(())
    }

    /// Wait for `submission` (the one carrying the recorded reduction),
    /// read the partials back and fold them on the host.
    ///
    /// # Errors
    ///
    /// [`VolumeError::ReductionNotRecorded`] if [`Self::execute`] was never
    /// called, mapping errors, and [`VolumeError::NoFiniteValues`] if the
    /// partials hold no finite pair.
    pub async fn read_min_max(&self, submission: wgpu::SubmissionIndex) -> Result<MinMax> {
        let partials = self
            .partials
            .as_ref()
            .ok_or(VolumeError::ReductionNotRecorded)?;
        let started = Instant::now();
        self.wgpu.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        })?;

        let bytes = self.wgpu.read_buffer(&partials.buffer).await?;
        let pairs: Vec<MinMax> = bytes
            .chunks_exact(std::mem::size_of::<MinMax>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let result = merge_partials(&pairs)?;
        log::info!(
            "Reduced {} partials to [{}, {}] in {:?}",
            pairs.len(),
            result.min,
            result.max,
            started.elapsed()
        );
        Ok(result)
    }

    /// Record, submit and read back in one go.
    pub async fn reduce(&mut self, input: &VolumeTexture) -> Result<MinMax> {
        let mut encoder = self
            .wgpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Min Max Encoder"),
            });
        self.execute(&mut encoder, input)?;
        let submission = self.wgpu.queue.submit(Some(encoder.finish()));
        self.read_min_max(submission).await
    }
}

/// Fold per-tile partials into the global pair.
///
/// # Errors
///
/// Returns [`VolumeError::NoFiniteValues`] rather than a sentinel when the
/// fold does not end on a finite pair.
pub fn merge_partials(partials: &[MinMax]) -> Result<MinMax> {
    let merged = partials
        .iter()
        .fold(MinMax::IDENTITY, |acc, pair| acc.merge(*pair));
    if !merged.is_populated() || !merged.min.is_finite() || !merged.max.is_finite() {
        return Err(VolumeError::NoFiniteValues);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_folds_all_partials() {
        let partials = [
            MinMax::new(3.0, 9.0),
            MinMax::IDENTITY,
            MinMax::new(-5.0, 1.0),
            MinMax::new(0.0, 135.0),
        ];
        assert_eq!(merge_partials(&partials).unwrap(), MinMax::new(-5.0, 135.0));
    }

    #[test]
    fn merge_keeps_uniform_value() {
        let partials = [MinMax::new(42.0, 42.0); 6];
        assert_eq!(merge_partials(&partials).unwrap(), MinMax::new(42.0, 42.0));
    }

    #[test]
    fn merge_without_values_fails() {
        assert!(matches!(
            merge_partials(&[]),
            Err(VolumeError::NoFiniteValues)
        ));
        assert!(matches!(
            merge_partials(&[MinMax::IDENTITY; 3]),
            Err(VolumeError::NoFiniteValues)
        ));
    }

    #[test]
    fn params_layout_matches_shader() {
        // vec3<u32> dimensions, identity_min at 12, identity_max at 16,
        // struct rounded up to 32.
        assert_eq!(std::mem::size_of::<ReductionParams>(), 32);
        assert_eq!(std::mem::offset_of!(ReductionParams, identity_min), 12);
        assert_eq!(std::mem::offset_of!(ReductionParams, identity_max), 16);
    }

    #[test]
    fn shader_source_sizes_shared_arrays_to_tile() {
        let source = MinMaxReducer::shader_source(WorkgroupSize::new(8, 8, 4));
        assert!(source.starts_with("const WG_X: u32 = 8u;"));
        assert!(source.contains("array<f32, TILE_SIZE>"));
        assert!(source.contains("const TILE_SIZE: u32 = 256u;"));
    }
}
