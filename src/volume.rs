use std::fmt;

use glam::{Mat4, Vec3};
use ndarray::{Array3, s};
use rayon::prelude::*;

use crate::error::{Result, VolumeError};
use crate::gpu::{VolumeTexture, WGPU};
use crate::kernels::VoxelKernels;

/// Size of a volume in voxels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    /// Zero-sized axes are a configuration error, never an empty reduction.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(VolumeError::EmptyVolume(*self));
        }
        Ok(())
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth,
        }
    }

    /// Linear voxel index with x varying fastest.
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.height as usize + y as usize) * self.width as usize + x as usize
    }

    /// Shape for an ndarray indexed `(z, y, x)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.depth as usize,
            self.height as usize,
            self.width as usize,
        )
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Inclusive scalar range used for normalization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    /// Build a range usable for normalization.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidRange`] unless both bounds are finite and
    /// `min < max`.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(VolumeError::InvalidRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// `clamp((value - min) / (max - min), 0, 1)`
    pub fn normalize(&self, value: f32) -> f32 {
        ((value - self.min) / self.span()).clamp(0.0, 1.0)
    }

    pub fn merge(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// A `(min, max)` pair as produced by a reduction. Unlike [`ValueRange`]
/// the bounds may be equal. Layout matches the `MinMax` struct of the
/// reduction shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MinMax {
    pub min: f32,
    pub max: f32,
}

impl MinMax {
    /// Identity of the reduction: never wins a comparison.
    pub const IDENTITY: MinMax = MinMax {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Fold one sample in. Non-finite samples are ignored, matching the
    /// device reduction.
    #[inline]
    pub fn include(self, value: f32) -> Self {
        if !value.is_finite() {
            return self;
        }
        Self {
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }

    #[inline]
    pub fn merge(self, other: MinMax) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// True once at least one finite sample has been folded in.
    pub fn is_populated(&self) -> bool {
        self.min <= self.max
    }

    /// Use the pair as a normalization range.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidRange`] if `min >= max`.
    pub fn to_range(&self) -> Result<ValueRange> {
        ValueRange::new(self.min, self.max)
    }
}

/// One decoded slice as handed over by a loader.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceRecord {
    pub width: u32,
    pub height: u32,
    pub raw_samples: Vec<f32>,
    pub rescale_slope: f32,
    pub rescale_intercept: f32,
}

impl SliceRecord {
    pub fn new(width: u32, height: u32, raw_samples: Vec<f32>) -> Self {
        Self {
            width,
            height,
            raw_samples,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
        }
    }

    pub fn with_rescale(mut self, slope: f32, intercept: f32) -> Self {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self
    }
}

/// Linear remap applied to raw intensities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rescale {
    pub slope: f32,
    pub intercept: f32,
}

impl Rescale {
    pub const IDENTITY: Rescale = Rescale {
        slope: 1.0,
        intercept: 0.0,
    };

    pub fn new(slope: f32, intercept: f32) -> Result<Self> {
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(VolumeError::InvalidRescale { slope, intercept });
        }
        Ok(Self { slope, intercept })
    }

    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        value * self.slope + self.intercept
    }
}

/// The assembled scalar field. Voxel data is kept on the host as an
/// `Array3` indexed `(z, y, x)`; the device copy is created by
/// [`VolumeField::upload`].
#[derive(Clone, Debug)]
pub struct VolumeField {
    data: Array3<f32>,
    dimensions: Dimensions,
    rescale: Rescale,
    value_range: Option<MinMax>,
    provisional_range: Option<MinMax>,
    spacing: (f32, f32, f32),
}

impl VolumeField {
    /// Assemble a volume from slices already ordered by physical position.
    ///
    /// # Errors
    ///
    /// Returns an error if no slices are given, a slice is empty, slice
    /// sizes differ, a sample count does not match `width * height`, or a
    /// rescale pair is not finite.
    pub fn from_slices(slices: &[SliceRecord]) -> Result<Self> {
        let first = slices.first().ok_or(VolumeError::NoSlices)?;
        let dimensions = Dimensions::new(first.width, first.height, slices.len() as u32);
        dimensions.validate()?;
        Self::validate_slices(slices)?;

        let uniform_rescale = slices.iter().all(|slice| {
            slice.rescale_slope == first.rescale_slope
                && slice.rescale_intercept == first.rescale_intercept
        });
        let rescale = if uniform_rescale {
            Rescale::new(first.rescale_slope, first.rescale_intercept)?
        } else {
            log::debug!("Slices disagree on rescale parameters, rescaling on the host");
            Rescale::IDENTITY
        };

        let mut data = Array3::<f32>::zeros(dimensions.shape());
        for (i, slice) in slices.iter().enumerate() {
            let per_slice = Rescale::new(slice.rescale_slope, slice.rescale_intercept)?;
            let mut target = data.slice_mut(s![i, .., ..]);
            for (voxel, &raw) in target.iter_mut().zip(&slice.raw_samples) {
                *voxel = if uniform_rescale {
                    raw
                } else {
                    per_slice.apply(raw)
                };
            }
        }

        let provisional_range = VoxelKernels::min_max(&data);
        log::debug!(
            "Assembled {dimensions} volume, provisional range {:?}",
            provisional_range
        );

        Ok(Self {
            data,
            dimensions,
            rescale,
            value_range: None,
            provisional_range,
            spacing: (1.0, 1.0, 1.0),
        })
    }

    /// Wrap voxel data that is already assembled. No rescale is pending.
    pub fn from_array(data: Array3<f32>) -> Result<Self> {
        let (depth, height, width) = data.dim();
        let dimensions = Dimensions::new(width as u32, height as u32, depth as u32);
        dimensions.validate()?;
        let data = data.as_standard_layout().into_owned();
        let provisional_range = VoxelKernels::min_max(&data);
        Ok(Self {
            data,
            dimensions,
            rescale: Rescale::IDENTITY,
            value_range: None,
            provisional_range,
            spacing: (1.0, 1.0, 1.0),
        })
    }

    fn validate_slices(slices: &[SliceRecord]) -> Result<()> {
        let expected = (slices[0].width, slices[0].height);
        slices.par_iter().enumerate().try_for_each(|(index, slice)| {
            let found = (slice.width, slice.height);
            if found != expected {
                return Err(VolumeError::InconsistentSliceDimensions {
                    index,
                    expected,
                    found,
                });
            }
            let expected_samples = expected.0 as usize * expected.1 as usize;
            if slice.raw_samples.len() != expected_samples {
                return Err(VolumeError::SampleCountMismatch {
                    index,
                    expected: expected_samples,
                    found: slice.raw_samples.len(),
                });
            }
            Ok(())
        })
    }

    /// Physical voxel size `(x, y, z)`, e.g. pixel spacing and slice
    /// thickness in millimetres.
    pub fn with_spacing(mut self, spacing: (f32, f32, f32)) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Rescale still to be applied to the stored voxels.
    pub fn rescale(&self) -> Rescale {
        self.rescale
    }

    /// Min/max of the stored (pre-rescale) voxels, computed at assembly.
    /// `None` if no voxel is finite.
    pub fn provisional_range(&self) -> Option<MinMax> {
        self.provisional_range
    }

    /// Authoritative post-rescale range, once a reduction has run.
    pub fn value_range(&self) -> Option<MinMax> {
        self.value_range
    }

    pub fn set_value_range(&mut self, range: MinMax) {
        self.value_range = Some(range);
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Scale of the unit proxy cube so the longest physical axis spans
    /// `[-1, 1]`.
    pub fn model_matrix(&self) -> Mat4 {
        let extent = Vec3::new(
            self.dimensions.width as f32 * self.spacing.0,
            self.dimensions.height as f32 * self.spacing.1,
            self.dimensions.depth as f32 * self.spacing.2,
        );
        let longest = extent.max_element();
        if longest <= 0.0 || !longest.is_finite() {
            return Mat4::IDENTITY;
        }
        Mat4::from_scale(extent / longest)
    }

    /// Nearest-voxel lookup for a sample coordinate in `[0, 1]^3`.
    pub fn sample_nearest(&self, coord: Vec3) -> f32 {
        let dims = self.dimensions;
        let texel =
            |c: f32, size: u32| ((c * size as f32) as i64).clamp(0, size as i64 - 1) as usize;
        let x = texel(coord.x, dims.width);
        let y = texel(coord.y, dims.height);
        let z = texel(coord.z, dims.depth);
        self.data[[z, y, x]]
    }

    /// Create the device-resident R32Float texture and upload the voxels.
    pub fn upload(&self, wgpu: &WGPU) -> Result<VolumeTexture> {
        let texture = wgpu.create_volume_texture(
            "Volume Field Texture",
            self.dimensions,
            wgpu::TextureFormat::R32Float,
            scalar_texture_usages(),
        )?;
        match self.data.as_slice() {
            Some(voxels) => wgpu.write_voxels(&texture, voxels),
            None => {
                let voxels: Vec<f32> = self.data.iter().copied().collect();
                wgpu.write_voxels(&texture, &voxels);
            }
        }
        log::debug!("Uploaded {} volume field", self.dimensions);
        Ok(texture)
    }
}

/// Usages shared by every single-channel volume texture in the pipeline.
pub(crate) fn scalar_texture_usages() -> wgpu::TextureUsages {
    wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::STORAGE_BINDING
        | wgpu::TextureUsages::COPY_DST
        | wgpu::TextureUsages::COPY_SRC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(width: u32, height: u32, value: f32) -> SliceRecord {
        SliceRecord::new(width, height, vec![value; (width * height) as usize])
    }

    #[test]
    fn assembles_slices_in_order() {
        let slices = vec![
            SliceRecord::new(2, 1, vec![0.0, 1.0]),
            SliceRecord::new(2, 1, vec![2.0, 3.0]),
        ];
        let field = VolumeField::from_slices(&slices).unwrap();
        assert_eq!(field.dimensions(), Dimensions::new(2, 1, 2));
        assert_eq!(field.data().as_slice().unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(field.provisional_range(), Some(MinMax::new(0.0, 3.0)));
        assert!(field.value_range().is_none());
    }

    #[test]
    fn rejects_empty_and_mismatched_slices() {
        assert!(matches!(
            VolumeField::from_slices(&[]),
            Err(VolumeError::NoSlices)
        ));
        assert!(matches!(
            VolumeField::from_slices(&[slice(0, 4, 1.0)]),
            Err(VolumeError::EmptyVolume(_))
        ));
        assert!(matches!(
            VolumeField::from_slices(&[slice(2, 2, 1.0), slice(3, 2, 1.0)]),
            Err(VolumeError::InconsistentSliceDimensions { index: 1, .. })
        ));
        let short = SliceRecord::new(2, 2, vec![1.0; 3]);
        assert!(matches!(
            VolumeField::from_slices(&[slice(2, 2, 1.0), short]),
            Err(VolumeError::SampleCountMismatch {
                index: 1,
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn shared_rescale_is_deferred() {
        let slices = vec![
            slice(1, 1, 10.0).with_rescale(2.0, -5.0),
            slice(1, 1, 20.0).with_rescale(2.0, -5.0),
        ];
        let field = VolumeField::from_slices(&slices).unwrap();
        assert_eq!(field.rescale(), Rescale::new(2.0, -5.0).unwrap());
        assert_eq!(field.data().as_slice().unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn differing_rescale_is_applied_per_slice() {
        let slices = vec![
            slice(1, 1, 10.0).with_rescale(2.0, 0.0),
            slice(1, 1, 10.0).with_rescale(1.0, -1.0),
        ];
        let field = VolumeField::from_slices(&slices).unwrap();
        assert_eq!(field.rescale(), Rescale::IDENTITY);
        assert_eq!(field.data().as_slice().unwrap(), &[20.0, 9.0]);
    }

    #[test]
    fn value_range_normalizes_and_rejects_degenerate_bounds() {
        let range = ValueRange::new(-5.0, 135.0).unwrap();
        assert!((range.normalize(55.0) - 60.0 / 140.0).abs() < 1e-6);
        assert_eq!(range.normalize(-100.0), 0.0);
        assert_eq!(range.normalize(1000.0), 1.0);
        assert!(ValueRange::new(42.0, 42.0).is_err());
        assert!(ValueRange::new(1.0, 0.0).is_err());
        assert!(ValueRange::new(f32::NEG_INFINITY, 0.0).is_err());
    }

    #[test]
    fn min_max_ignores_non_finite_samples() {
        let pair = [3.0, f32::NAN, -1.0, f32::INFINITY]
            .into_iter()
            .fold(MinMax::IDENTITY, MinMax::include);
        assert_eq!(pair, MinMax::new(-1.0, 3.0));
        assert!(!MinMax::IDENTITY.is_populated());
        assert!(MinMax::new(42.0, 42.0).is_populated());
        assert!(MinMax::new(42.0, 42.0).to_range().is_err());
    }

    #[test]
    fn model_matrix_preserves_physical_aspect() {
        let field = VolumeField::from_array(Array3::zeros((10, 20, 20)))
            .unwrap()
            .with_spacing((0.5, 0.5, 2.0));
        // extent: x = 10, y = 10, z = 20
        let scale = field.model_matrix().to_scale_rotation_translation().0;
        assert!((scale - Vec3::new(0.5, 0.5, 1.0)).length() < 1e-6);
    }

    #[test]
    fn sample_nearest_clamps_to_bounds() {
        let data = Array3::from_shape_vec((1, 1, 4), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let field = VolumeField::from_array(data).unwrap();
        assert_eq!(field.sample_nearest(Vec3::new(0.0, 0.5, 0.5)), 0.0);
        assert_eq!(field.sample_nearest(Vec3::new(0.6, 0.5, 0.5)), 2.0);
        assert_eq!(field.sample_nearest(Vec3::new(1.0, 0.5, 0.5)), 3.0);
    }
}
