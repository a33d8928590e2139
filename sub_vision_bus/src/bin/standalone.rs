use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sub_vision::core_modules::annotator::Annotator;
use sub_vision::parallel_pipeline::DEFAULT_QUEUE_DEPTH;
use sub_vision::source::DirectorySource;
use sub_vision::{Camera, CameraPipeline, CameraWorkers, Publisher, VisionConfig};
use sub_vision_bus::{FrameBus, detection_json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Paths from env, like the other launchers on the vehicle
    let config_path = PathBuf::from(std::env::var("SV_CONFIG").unwrap_or_else(|_| "vision.toml".to_string()));
    let config = VisionConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let bus = FrameBus::new(8);
    let mut detections = bus.subscribe_detections();
    let mut frames = bus.subscribe_frames();

    // detections go to stdout as JSON lines
    let printer = tokio::spawn(async move {
        loop {
            match detections.recv().await {
                Ok(detection) => match detection_json(&detection) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to serialize detection"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "Detection subscriber lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    let frame_counter = tokio::spawn(async move {
        let mut count = 0u64;
        loop {
            match frames.recv().await {
                Ok(_) => count += 1,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        count
    });

    let annotator = Arc::new(Annotator::load(
        config.annotation_font.as_deref().map(|p| config.resolve(p)).as_deref(),
    )?);
    let mut sources = Vec::new();
    let mut pipelines = Vec::new();
    for (camera, var) in [(Camera::Forward, "SV_FORWARD_DIR"), (Camera::Downward, "SV_DOWNWARD_DIR")] {
        let Ok(dir) = std::env::var(var) else { continue };
        sources.push(DirectorySource::open(&PathBuf::from(dir), camera)?);
        pipelines.push(CameraPipeline::from_config(
            camera,
            &config,
            Arc::new(bus.clone()) as Arc<dyn Publisher>,
            annotator.clone(),
        )?);
    }
    anyhow::ensure!(!sources.is_empty(), "set SV_FORWARD_DIR and/or SV_DOWNWARD_DIR");
    drop(bus);

    let workers = CameraWorkers::spawn(pipelines, DEFAULT_QUEUE_DEPTH)?;
    for source in &sources {
        for frame in source.frames() {
            let frame = frame?;
            // live-style feed: drop frames while the camera is busy
            if !workers.try_submit(frame)? {
                tokio::task::yield_now().await;
            }
        }
    }
    workers.shutdown().await;

    printer.await.ok();
    let published = frame_counter.await.unwrap_or(0);
    info!(published, "Bus closed");
    Ok(())
}
