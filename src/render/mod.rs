//! Direct volume rendering of a scalar field by ray marching a proxy mesh.

mod compositing;
mod marcher;
mod mesh;
mod uniforms;

pub use compositing::{
    DEFAULT_DEPTH, DEPTH_ALPHA, RaySample, SATURATION_ALPHA, TransferFunction, march_ray,
};
pub use marcher::VolumeRayMarcher;
pub use mesh::{FLOATS_PER_VERTEX, GpuMesh, ProxyMesh, VERTEX_STRIDE, pack_interleaved};
pub use uniforms::{UNIFORM_BUFFER_SIZE, VolumeRendererUniforms};
