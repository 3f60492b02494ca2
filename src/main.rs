use std::{env, fs, path::PathBuf};

use dicom_volume_render::{
    GpuCompositor, MarchConfig, Processor, RecoveryPolicy, VolumeLoader, VolumeRenderer, WGPU,
};
use tracing::{error, info};

const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let directory = args.next().map(PathBuf::from).unwrap_or_else(|| "dicom".into());
    let processor = match args.next().as_deref() {
        Some("gpu") => Processor::GPU,
        _ => Processor::CPU,
    };
    let config = match fs::read_to_string("render.json") {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            error!("ignoring render.json: {e}");
            MarchConfig::default()
        }),
        Err(_) => MarchConfig::default(),
    };

    let volume = VolumeLoader::load_from_directory(&directory, RecoveryPolicy::Tolerant)
        .expect("should have loaded files from directory");
    info!(dimensions = ?volume.dimensions(), "volume ready");

    let renderer =
        VolumeRenderer::new(WIDTH, HEIGHT, config).expect("should have created renderer");
    if let Some((level, width)) = volume.window() {
        renderer.set_parameters(renderer.parameters().with_window(level, width));
    }

    let frame = match processor {
        Processor::CPU => {
            renderer.load(&volume);
            renderer.render()
        }
        Processor::GPU => {
            let wgpu = WGPU::request().await.expect("should have found a GPU adapter");
            let compositor = GpuCompositor::new(wgpu, config);
            compositor.load(&volume);
            compositor
                .render(&renderer.parameters(), WIDTH, HEIGHT)
                .await
                .expect("should have rendered on the GPU")
        }
    };

    let image = frame.to_image().expect("frame should match its dimensions");
    if let Err(e) = image.save("result.png") {
        error!("could not save result.png: {e}");
    }
}
