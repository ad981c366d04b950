use std::{env, error::Error, path::PathBuf};

use dicom_raymarch::{
    GradientConfig, ProcessorConfig, ProxyMesh, RenderConfig, SliceLoader, SortBy,
    VolumeProcessor, VolumeRayMarcher, WGPU,
};
use glam::{Mat4, Vec3};

const IMAGE_SIZE: u32 = 512;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let directory = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("dicom"), PathBuf::from);
    let wgpu = WGPU::request_headless().await?;

    let mut field = SliceLoader::load_from_directory(&directory, SortBy::default())?
        .into_volume_field()?;
    let config = ProcessorConfig::default().with_gradient(GradientConfig::default());
    let mut processor = VolumeProcessor::new(&wgpu, config)?;
    let prepared = processor.prepare(&mut field).await?;

    let render_config = RenderConfig::default();
    let marcher = VolumeRayMarcher::new(
        &wgpu,
        render_config,
        &prepared.scalar,
        prepared.shading.as_ref(),
        &ProxyMesh::unit_cube(),
    )?;

    // Orbit a quarter turn around the volume, looking slightly down.
    let angle = std::f32::consts::FRAC_PI_4;
    let camera = Vec3::new(angle.sin() * 3.5, 1.2, angle.cos() * 3.5);
    let uniforms = render_config.uniforms(
        field.model_matrix(),
        Mat4::look_at_rh(camera, Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0),
        camera,
        prepared.value_range()?,
    );
    marcher.update_uniforms(&uniforms)?;

    let image = marcher.render_to_image(IMAGE_SIZE, IMAGE_SIZE).await?;
    image.save("result.png")?;
    log::info!("Saved {IMAGE_SIZE}x{IMAGE_SIZE} rendering to result.png");
    Ok(())
}
