use glam::{Vec3, Vec4};

use super::uniforms::VolumeRendererUniforms;
use crate::error::{Result, VolumeError};

/// Samples no longer contribute once opacity passes this value.
pub const SATURATION_ALPHA: f32 = 0.99;
/// Depth is written at the first sample where opacity passes this value.
pub const DEPTH_ALPHA: f32 = 0.95;
/// Depth reported for rays that never become opaque enough.
pub const DEFAULT_DEPTH: f32 = 1.0;

/// Maps a normalized sample to a premultiplication-ready colour and opacity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferFunction {
    pub opacity_scale: f32,
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self {
            opacity_scale: 0.95,
        }
    }
}

impl TransferFunction {
    pub fn new(opacity_scale: f32) -> Result<Self> {
        let transfer = Self { opacity_scale };
        transfer.validate()?;
        Ok(transfer)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.opacity_scale.is_finite() || !(0.0..=1.0).contains(&self.opacity_scale) {
            return Err(VolumeError::InvalidOpacityScale(self.opacity_scale));
        }
        Ok(())
    }

    /// Grayscale ramp: intensity for colour, scaled intensity for opacity.
    pub fn apply(&self, normalized: f32) -> Vec4 {
        let intensity = normalized.clamp(0.0, 1.0);
        Vec4::new(intensity, intensity, intensity, intensity * self.opacity_scale)
    }

    /// WGSL constants baked into the ray marching shader.
    pub(crate) fn shader_constants(&self) -> String {
        format!("const OPACITY_SCALE: f32 = {:?};\n", self.opacity_scale)
    }
}

/// Result of marching one ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaySample {
    /// Premultiplied colour.
    pub color: Vec3,
    pub alpha: f32,
    pub depth: f32,
    pub iterations: u32,
}

/// Host reference of the per-fragment ray march, without shading.
///
/// `entry` is the world-space point where the ray enters the proxy mesh.
/// `sample` reads the scalar field at a coordinate in `[0, 1]^3`.
pub fn march_ray(
    uniforms: &VolumeRendererUniforms,
    transfer: &TransferFunction,
    entry: Vec3,
    sample: impl Fn(Vec3) -> f32,
) -> RaySample {
    let world_to_local = uniforms.model_matrix.inverse();
    let local_camera = world_to_local.transform_point3(uniforms.camera_position);
    let local_entry = world_to_local.transform_point3(entry);
    let direction = (local_entry - local_camera).normalize_or_zero();
    let model_view_projection =
        uniforms.projection_matrix * uniforms.view_matrix * uniforms.model_matrix;
    let range = uniforms.range();

    let mut local = local_entry;
    let mut color = Vec3::ZERO;
    let mut alpha = 0.0f32;
    let mut depth = DEFAULT_DEPTH;
    let mut depth_written = false;
    let mut iterations = 0;

    // The proxy cube spans [-1, 1] locally; the field is sampled over [0, 1].
    for _ in 0..uniforms.max_steps.max(0) {
        iterations += 1;
        let position = local * 0.5 + 0.5;
        let inside = position.cmpge(Vec3::ZERO).all() && position.cmple(Vec3::ONE).all();
        if inside && alpha <= SATURATION_ALPHA {
            let rgba = transfer.apply(range.normalize(sample(position)));
            let weight = (1.0 - alpha) * rgba.w;
            color += rgba.truncate() * weight;
            alpha += weight;

            if !depth_written && alpha > DEPTH_ALPHA {
                let clip = model_view_projection * local.extend(1.0);
                depth = clip.z / clip.w;
                depth_written = true;
            }
        }
        local += direction * uniforms.step_size;
    }

    RaySample {
        color,
        alpha,
        depth,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use glam::Mat4;

    use super::*;

    fn uniforms(max_steps: i32, step_size: f32) -> VolumeRendererUniforms {
        let camera = Vec3::new(0.0, 0.0, 4.0);
        VolumeRendererUniforms {
            model_matrix: Mat4::IDENTITY,
            view_matrix: Mat4::look_at_rh(camera, Vec3::ZERO, Vec3::Y),
            projection_matrix: Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0),
            camera_position: camera,
            step_size,
            max_steps,
            min_value: 0.0,
            max_value: 100.0,
        }
    }

    #[test]
    fn ray_missing_the_volume_is_transparent() {
        let uniforms = uniforms(64, 0.05);
        // Enters "outside" the cube and heads further away from it.
        let result = march_ray(
            &uniforms,
            &TransferFunction::default(),
            Vec3::new(3.0, 3.0, 3.0),
            |_| 100.0,
        );
        assert_eq!(result.alpha, 0.0);
        assert_eq!(result.color, Vec3::ZERO);
        assert_eq!(result.depth, DEFAULT_DEPTH);
        assert_eq!(result.iterations, 64);
    }

    #[test]
    fn iterations_are_bounded_by_max_steps() {
        for step_size in [1e-6, 0.001, 0.5, 10.0] {
            let uniforms = uniforms(17, step_size);
            let result = march_ray(
                &uniforms,
                &TransferFunction::default(),
                Vec3::new(0.0, 0.0, 1.0),
                |_| 1.0,
            );
            assert!(result.iterations <= 17);
        }
    }

    #[test]
    fn opaque_volume_saturates_and_writes_depth() {
        let uniforms = uniforms(256, 0.01);
        let result = march_ray(
            &uniforms,
            &TransferFunction::new(1.0).unwrap(),
            Vec3::new(0.0, 0.0, 1.0),
            |_| 100.0,
        );
        assert!(result.alpha > SATURATION_ALPHA);
        assert!(result.alpha <= 1.0);
        assert_eq!(result.iterations, 256);
        assert!(result.depth < DEFAULT_DEPTH);
        assert!(result.depth > 0.0);
        // premultiplied white
        assert!((result.color - Vec3::splat(result.alpha)).abs().max_element() < 1e-5);
    }

    #[test]
    fn saturated_rays_stop_accumulating() {
        let uniforms = uniforms(64, 0.05);
        let reads = Cell::new(0);
        let result = march_ray(
            &uniforms,
            &TransferFunction::new(1.0).unwrap(),
            Vec3::new(0.0, 0.0, 1.0),
            |_| {
                reads.set(reads.get() + 1);
                100.0
            },
        );
        // The first sample is fully opaque, later ones are skipped.
        assert_eq!(reads.get(), 1);
        assert_eq!(result.alpha, 1.0);
        assert_eq!(result.iterations, 64);
    }

    #[test]
    fn steps_are_taken_in_local_units() {
        // Straight down the z axis the ray crosses the [-1, 1] cube, a local
        // distance of 2.0, so a step of 0.1 samples it 21 times.
        let uniforms = uniforms(64, 0.1);
        let reads = Cell::new(0);
        let result = march_ray(
            &uniforms,
            &TransferFunction::new(0.0).unwrap(),
            Vec3::new(0.0, 0.0, 1.0),
            |position| {
                assert!(position.cmpge(Vec3::ZERO).all() && position.cmple(Vec3::ONE).all());
                reads.set(reads.get() + 1);
                50.0
            },
        );
        assert!((20..=21).contains(&reads.get()), "{} samples", reads.get());
        assert_eq!(result.alpha, 0.0);
    }

    #[test]
    fn default_step_budget_spans_the_cube_diagonal() {
        let config = crate::config::RenderConfig::default();
        assert!(config.max_steps as f32 * config.step_size >= 2.0 * 3f32.sqrt());
    }

    #[test]
    fn empty_volume_accumulates_nothing() {
        let uniforms = uniforms(256, 0.01);
        let result = march_ray(
            &uniforms,
            &TransferFunction::default(),
            Vec3::new(0.0, 0.0, 1.0),
            |_| 0.0,
        );
        assert_eq!(result.alpha, 0.0);
        assert_eq!(result.depth, DEFAULT_DEPTH);
    }

    #[test]
    fn transfer_function_is_grayscale() {
        let transfer = TransferFunction::default();
        assert_eq!(transfer.apply(0.5), Vec4::new(0.5, 0.5, 0.5, 0.475));
        assert_eq!(transfer.apply(2.0).x, 1.0);
        assert!(TransferFunction::new(f32::NAN).is_err());
        assert!(TransferFunction::new(1.5).is_err());
        assert_eq!(transfer.shader_constants(), "const OPACITY_SCALE: f32 = 0.95;\n");
    }
}
