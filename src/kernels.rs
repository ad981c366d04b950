use ndarray::{Array3, Zip};
use rayon::prelude::*;

use crate::volume::{MinMax, Rescale, ValueRange};

/// Host implementations of the per-voxel passes. They follow the GPU
/// shaders operation for operation and are used by [`crate::Processor::Cpu`]
/// and as the reference for the GPU results.
pub struct VoxelKernels;

impl VoxelKernels {
    /// `out = in * slope + intercept`, no clamping.
    pub fn rescale(data: &Array3<f32>, rescale: Rescale) -> Array3<f32> {
        let mut output = data.clone();
        output.par_mapv_inplace(|value| rescale.apply(value));
        output
    }

    /// Global min/max over all finite voxels, `None` if there is none.
    pub fn min_max(data: &Array3<f32>) -> Option<MinMax> {
        let pair = data
            .par_iter()
            .fold(|| MinMax::IDENTITY, |acc, &value| acc.include(value))
            .reduce(|| MinMax::IDENTITY, MinMax::merge);
        pair.is_populated().then_some(pair)
    }

    /// Central-difference gradient of the normalized field plus the
    /// normalized value, packed as `[gx, gy, gz, value]`. Neighbours are
    /// clamped to the volume, never wrapped.
    pub fn gradient(data: &Array3<f32>, range: ValueRange, scale: f32) -> Array3<[f32; 4]> {
        let (depth, height, width) = data.dim();
        let normalized = |z: usize, y: usize, x: usize| range.normalize(data[[z, y, x]]);
        let mut output = Array3::from_elem(data.dim(), [0.0f32; 4]);

        Zip::indexed(&mut output).par_for_each(|(z, y, x), texel| {
            let dx =
                normalized(z, y, (x + 1).min(width - 1)) - normalized(z, y, x.saturating_sub(1));
            let dy =
                normalized(z, (y + 1).min(height - 1), x) - normalized(z, y.saturating_sub(1), x);
            let dz =
                normalized((z + 1).min(depth - 1), y, x) - normalized(z.saturating_sub(1), y, x);
            *texel = [
                dx * 0.5 * scale,
                dy * 0.5 * scale,
                dz * 0.5 * scale,
                normalized(z, y, x),
            ];
        });

        output
    }
}
