use glam::{Mat4, Vec3};

use crate::error::{Result, VolumeError};
use crate::volume::ValueRange;

/// Byte size of the uniform block shared with `ray_march.wgsl`.
pub const UNIFORM_BUFFER_SIZE: usize = 224;

const MODEL_OFFSET: usize = 0;
const VIEW_OFFSET: usize = 64;
const PROJECTION_OFFSET: usize = 128;
const CAMERA_OFFSET: usize = 192;
const STEP_SIZE_OFFSET: usize = 208;
const MAX_STEPS_OFFSET: usize = 212;
const MIN_VALUE_OFFSET: usize = 216;
const MAX_VALUE_OFFSET: usize = 220;

/// Per-frame parameters of the ray marcher.
///
/// Serialized little endian as:
///
/// | offset | field                                  |
/// |--------|----------------------------------------|
/// | 0      | model matrix, 16 × f32, column major   |
/// | 64     | view matrix                            |
/// | 128    | projection matrix                      |
/// | 192    | camera position, 3 × f32 + 4 pad bytes |
/// | 208    | step size, f32                         |
/// | 212    | max steps, i32                         |
/// | 216    | min value, f32                         |
/// | 220    | max value, f32                         |
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeRendererUniforms {
    pub model_matrix: Mat4,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub camera_position: Vec3,
    pub step_size: f32,
    pub max_steps: i32,
    pub min_value: f32,
    pub max_value: f32,
}

impl VolumeRendererUniforms {
    /// # Errors
    ///
    /// Step size must be positive, max steps at least 1 and the value range
    /// non-degenerate.
    pub fn validate(&self) -> Result<()> {
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err(VolumeError::InvalidStepSize(self.step_size));
        }
        if self.max_steps < 1 {
            return Err(VolumeError::InvalidMaxSteps(self.max_steps));
        }
        ValueRange::new(self.min_value, self.max_value)?;
        Ok(())
    }

    pub fn range(&self) -> ValueRange {
        ValueRange {
            min: self.min_value,
            max: self.max_value,
        }
    }

    pub fn to_bytes(&self) -> [u8; UNIFORM_BUFFER_SIZE] {
        let mut bytes = [0u8; UNIFORM_BUFFER_SIZE];
        write_matrix(&mut bytes, MODEL_OFFSET, &self.model_matrix);
        write_matrix(&mut bytes, VIEW_OFFSET, &self.view_matrix);
        write_matrix(&mut bytes, PROJECTION_OFFSET, &self.projection_matrix);
        for (i, value) in self.camera_position.to_array().into_iter().enumerate() {
            write_f32(&mut bytes, CAMERA_OFFSET + i * 4, value);
        }
        write_f32(&mut bytes, STEP_SIZE_OFFSET, self.step_size);
        bytes[MAX_STEPS_OFFSET..MAX_STEPS_OFFSET + 4]
            .copy_from_slice(&self.max_steps.to_le_bytes());
        write_f32(&mut bytes, MIN_VALUE_OFFSET, self.min_value);
        write_f32(&mut bytes, MAX_VALUE_OFFSET, self.max_value);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; UNIFORM_BUFFER_SIZE]) -> Self {
        let mut max_steps = [0u8; 4];
        max_steps.copy_from_slice(&bytes[MAX_STEPS_OFFSET..MAX_STEPS_OFFSET + 4]);
        Self {
            model_matrix: read_matrix(bytes, MODEL_OFFSET),
            view_matrix: read_matrix(bytes, VIEW_OFFSET),
            projection_matrix: read_matrix(bytes, PROJECTION_OFFSET),
            camera_position: Vec3::new(
                read_f32(bytes, CAMERA_OFFSET),
                read_f32(bytes, CAMERA_OFFSET + 4),
                read_f32(bytes, CAMERA_OFFSET + 8),
            ),
            step_size: read_f32(bytes, STEP_SIZE_OFFSET),
            max_steps: i32::from_le_bytes(max_steps),
            min_value: read_f32(bytes, MIN_VALUE_OFFSET),
            max_value: read_f32(bytes, MAX_VALUE_OFFSET),
        }
    }
}

fn write_f32(bytes: &mut [u8], offset: usize, value: f32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_matrix(bytes: &mut [u8], offset: usize, matrix: &Mat4) {
    for (i, value) in matrix.to_cols_array().into_iter().enumerate() {
        write_f32(bytes, offset + i * 4, value);
    }
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut value = [0u8; 4];
    value.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(value)
}

fn read_matrix(bytes: &[u8], offset: usize) -> Mat4 {
    let mut columns = [0.0f32; 16];
    for (i, value) in columns.iter_mut().enumerate() {
        *value = read_f32(bytes, offset + i * 4);
    }
    Mat4::from_cols_array(&columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uniforms() -> VolumeRendererUniforms {
        VolumeRendererUniforms {
            model_matrix: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            view_matrix: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y),
            projection_matrix: Mat4::perspective_rh(1.047_197_6, 1.5, 0.1, 20.0),
            camera_position: Vec3::new(0.0, 0.0, 3.0),
            step_size: 0.01,
            max_steps: 100,
            min_value: -5.0,
            max_value: 135.0,
        }
    }

    #[test]
    fn serializes_to_documented_offsets() {
        let uniforms = sample_uniforms();
        let bytes = uniforms.to_bytes();
        assert_eq!(bytes.len(), 224);
        assert_eq!(bytes.len() % 16, 0);

        // column 3 of the model matrix carries the translation
        assert_eq!(read_f32(&bytes, 48), 1.0);
        assert_eq!(read_f32(&bytes, 52), 2.0);
        assert_eq!(read_f32(&bytes, 56), 3.0);
        assert_eq!(read_f32(&bytes, 200), 3.0);
        // vec3 padding stays zero
        assert_eq!(&bytes[204..208], &[0, 0, 0, 0]);
        assert_eq!(read_f32(&bytes, 208), 0.01);
        assert_eq!(i32::from_le_bytes(bytes[212..216].try_into().unwrap()), 100);
        assert_eq!(read_f32(&bytes, 216), -5.0);
        assert_eq!(read_f32(&bytes, 220), 135.0);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let uniforms = sample_uniforms();
        assert_eq!(VolumeRendererUniforms::from_bytes(&uniforms.to_bytes()), uniforms);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let valid = sample_uniforms();
        assert!(valid.validate().is_ok());
        assert!(matches!(
            VolumeRendererUniforms { step_size: 0.0, ..valid }.validate(),
            Err(VolumeError::InvalidStepSize(_))
        ));
        assert!(matches!(
            VolumeRendererUniforms { max_steps: 0, ..valid }.validate(),
            Err(VolumeError::InvalidMaxSteps(0))
        ));
        assert!(matches!(
            VolumeRendererUniforms {
                min_value: 1.0,
                max_value: 1.0,
                ..valid
            }
            .validate(),
            Err(VolumeError::InvalidRange { .. })
        ));
    }
}
