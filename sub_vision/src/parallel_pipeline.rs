// THEORY:
// `CameraWorkers` runs each camera's pipeline as its own tokio task. Cameras
// share nothing mutable, so they proceed fully in parallel, while frames of one
// camera are strictly serialized: the worker owns its `CameraPipeline` and pulls
// one command at a time from a bounded channel.
//
// The channel depth bounds latency. With the default depth of 1 at most one
// frame waits behind the one being processed. Producers choose what happens when
// the queue is full: `submit` waits for room, `try_submit` drops the frame.
//
// Frame processing is CPU-bound, so each frame is moved onto tokio's blocking
// pool together with the pipeline and both come back when it is done.

use crate::core_modules::frame::{Camera, Frame};
use crate::error::{Result, VisionError};
use crate::pipeline::{CameraPipeline, ClassFlags, ClassUpdate};
use futures::future::join_all;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Frames that may wait per camera behind the one in flight.
pub const DEFAULT_QUEUE_DEPTH: usize = 1;

enum WorkerCommand {
    Frame(Frame),
    UpdateClass {
        name: String,
        update: ClassUpdate,
        reply: oneshot::Sender<Result<ClassFlags>>,
    },
}

/// Totals reported by a worker when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub camera: Option<Camera>,
    pub processed: u64,
    pub skipped: u64,
    pub detections: u64,
}

pub struct CameraWorkers {
    senders: HashMap<Camera, mpsc::Sender<WorkerCommand>>,
    workers: Vec<JoinHandle<WorkerStats>>,
}

impl CameraWorkers {
    /// Starts one worker per pipeline. Must be called from within a tokio runtime.
    pub fn spawn(pipelines: Vec<CameraPipeline>, queue_depth: usize) -> Result<Self> {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for pipeline in pipelines {
            let camera = pipeline.camera();
            if senders.contains_key(&camera) {
                return Err(VisionError::Config(format!(
                    "more than one pipeline for the {camera} camera"
                )));
            }
            let (sender, receiver) = mpsc::channel(queue_depth.max(1));
            senders.insert(camera, sender);
            workers.push(tokio::spawn(run_worker(pipeline, receiver)));
            info!(camera = %camera, queue_depth, "Camera worker started");
        }

        Ok(Self { senders, workers })
    }

    pub fn cameras(&self) -> impl Iterator<Item = Camera> + '_ {
        self.senders.keys().copied()
    }

    fn sender(&self, camera: Camera) -> Result<&mpsc::Sender<WorkerCommand>> {
        self.senders
            .get(&camera)
            .ok_or_else(|| VisionError::Channel(format!("no worker for the {camera} camera")))
    }

    /// Queues a frame, waiting for room if the camera is busy.
    pub async fn submit(&self, frame: Frame) -> Result<()> {
        let camera = frame.camera;
        self.sender(camera)?
            .send(WorkerCommand::Frame(frame))
            .await
            .map_err(|_| VisionError::Channel(format!("{camera} worker has stopped")))
    }

    /// Queues a frame unless the camera is busy. Returns whether it was accepted.
    pub fn try_submit(&self, frame: Frame) -> Result<bool> {
        let camera = frame.camera;
        match self.sender(camera)?.try_send(WorkerCommand::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(camera = %camera, "Worker busy, dropping frame");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VisionError::Channel(format!(
                "{camera} worker has stopped"
            ))),
        }
    }

    /// Toggles a class on the worker that owns `camera`.
    pub async fn set_class_enabled(&self, camera: Camera, name: &str, enabled: bool) -> Result<()> {
        self.update_class(camera, name, ClassUpdate::Enabled(enabled))
            .await
            .map(|_| ())
    }

    /// Starts or stops publishing a class's threshold mask.
    pub async fn set_threshold_published(&self, camera: Camera, name: &str, on: bool) -> Result<()> {
        self.update_class(camera, name, ClassUpdate::PublishThreshold(on))
            .await
            .map(|_| ())
    }

    /// Changes a class's flags on the worker that owns `camera`. Takes effect
    /// from the next frame that worker picks up.
    pub async fn update_class(
        &self,
        camera: Camera,
        name: &str,
        update: ClassUpdate,
    ) -> Result<ClassFlags> {
        let (reply, response) = oneshot::channel();
        self.sender(camera)?
            .send(WorkerCommand::UpdateClass {
                name: name.to_string(),
                update,
                reply,
            })
            .await
            .map_err(|_| VisionError::Channel(format!("{camera} worker has stopped")))?;
        response
            .await
            .map_err(|_| VisionError::Channel(format!("{camera} worker dropped the request")))?
    }

    /// Closes every queue, lets the workers drain what is already queued, and
    /// collects their totals.
    pub async fn shutdown(self) -> Vec<WorkerStats> {
        drop(self.senders);
        join_all(self.workers)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(stats) => Some(stats),
                Err(e) => {
                    error!(error = %e, "Camera worker failed");
                    None
                }
            })
            .collect()
    }
}

async fn run_worker(
    mut pipeline: CameraPipeline,
    mut receiver: mpsc::Receiver<WorkerCommand>,
) -> WorkerStats {
    let camera = pipeline.camera();
    let mut stats = WorkerStats {
        camera: Some(camera),
        ..Default::default()
    };

    while let Some(command) = receiver.recv().await {
        match command {
            WorkerCommand::Frame(frame) => {
                let joined = tokio::task::spawn_blocking(move || {
                    let result = pipeline.process(frame);
                    (pipeline, result)
                })
                .await;
                match joined {
                    Ok((returned, result)) => {
                        pipeline = returned;
                        match result {
                            Ok(report) => {
                                stats.processed += 1;
                                stats.detections += report.detections.len() as u64;
                            }
                            Err(e) => {
                                stats.skipped += 1;
                                warn!(camera = %camera, error = %e, "Skipping frame");
                            }
                        }
                    }
                    Err(e) => {
                        error!(camera = %camera, error = %e, "Frame processing panicked, stopping worker");
                        return stats;
                    }
                }
            }
            WorkerCommand::UpdateClass {
                name,
                update,
                reply,
            } => {
                let _ = reply.send(pipeline.update_class(&name, update));
            }
        }
    }

    info!(
        camera = %camera,
        processed = stats.processed,
        skipped = stats.skipped,
        detections = stats.detections,
        "Camera worker stopped"
    );
    stats
}
