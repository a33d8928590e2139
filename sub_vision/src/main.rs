// Replays recorded camera frames through the vision engine.
//
// Each camera gets its own image directory. Frames are fed to the camera
// workers in file-name order; annotated frames and `detections.jsonl` land in
// the output directory.

use anyhow::{Context, bail};
use clap::Parser;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use sub_vision::core_modules::annotator::Annotator;
use sub_vision::parallel_pipeline::DEFAULT_QUEUE_DEPTH;
use sub_vision::publisher::DirectoryPublisher;
use sub_vision::source::DirectorySource;
use sub_vision::{Camera, CameraPipeline, CameraWorkers, Publisher, VisionConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sub_vision", about = "Replay camera frames through the vision pipeline")]
struct Args {
    /// Vision configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Directory of forward-camera frames
    #[arg(long)]
    forward: Option<PathBuf>,

    /// Directory of downward-camera frames
    #[arg(long)]
    downward: Option<PathBuf>,

    /// Where annotated frames and detections are written
    #[arg(short, long, default_value = "vision_out")]
    output: PathBuf,

    /// Threads for per-class work (defaults to the number of CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Classes to switch off for this run
    #[arg(long = "disable", value_name = "CLASS")]
    disabled: Vec<String>,

    /// Classes whose threshold mask is written for this run
    #[arg(long = "threshold", value_name = "CLASS")]
    thresholds: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to configure worker threads")?;

    let config = VisionConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let annotator = Arc::new(
        Annotator::load(config.annotation_font.as_deref().map(|p| config.resolve(p)).as_deref())
            .context("Failed to load annotation font")?,
    );
    let publisher = Arc::new(
        DirectoryPublisher::create(&args.output)
            .with_context(|| format!("Failed to create output {}", args.output.display()))?,
    );

    let mut sources = Vec::new();
    for (camera, dir) in [(Camera::Forward, &args.forward), (Camera::Downward, &args.downward)] {
        if let Some(dir) = dir {
            sources.push(DirectorySource::open(dir, camera)?);
        }
    }
    if sources.is_empty() {
        bail!("No frame directory given; pass --forward and/or --downward");
    }

    let mut pipelines = Vec::new();
    for source in &sources {
        let mut pipeline = CameraPipeline::from_config(
            source.camera(),
            &config,
            publisher.clone() as Arc<dyn Publisher>,
            annotator.clone(),
        )?;
        for name in &args.disabled {
            if pipeline.has_class(name) {
                pipeline.set_class_enabled(name, false)?;
            }
        }
        for name in &args.thresholds {
            if pipeline.has_class(name) {
                pipeline.set_threshold_published(name, true)?;
            }
        }
        pipelines.push(pipeline);
    }
    info!(threads, cameras = pipelines.len(), "Starting replay");

    let workers = CameraWorkers::spawn(pipelines, DEFAULT_QUEUE_DEPTH)?;
    let feeders = sources.iter().map(|source| {
        let workers = &workers;
        async move {
            for frame in source.frames() {
                match frame {
                    Ok(frame) => workers.submit(frame).await?,
                    Err(e) => warn!(camera = %source.camera(), error = %e, "Unreadable frame"),
                }
            }
            anyhow::Ok(())
        }
    });
    for fed in join_all(feeders).await {
        fed?;
    }

    for stats in workers.shutdown().await {
        info!(
            camera = ?stats.camera,
            processed = stats.processed,
            skipped = stats.skipped,
            detections = stats.detections,
            "Replay finished"
        );
    }
    publisher.flush().context("Failed to flush detections")?;
    Ok(())
}
