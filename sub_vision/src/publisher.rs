// THEORY:
// The engine never owns a transport. Whatever carries detections off the vehicle
// is injected into each camera pipeline as a `Publisher`. Delivery is
// fire-and-forget: a sink that cannot deliver logs the problem and the frame
// carries on, because the next frame supersedes this one anyway.
//
// Two sinks live here:
// - `DirectoryPublisher` writes detections as JSON lines plus one PNG per
//   annotated frame, which is what the replay tool uses.
// - `MemoryPublisher` keeps everything in memory for tests and embedders.

use crate::core_modules::frame::Camera;
use crate::error::Result;
use crate::pipeline::Detection;
use image::{GrayImage, RgbImage};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outgoing side of the pipeline.
pub trait Publisher: Send + Sync {
    /// One message per confirmed detection.
    fn publish_detection(&self, detection: &Detection);

    /// One annotated frame per processed input frame.
    fn publish_annotated_frame(&self, camera: Camera, frame: u64, image: &RgbImage);

    /// Debug view of a class's label grid. Only called for classes that ask for it.
    fn publish_threshold_mask(&self, _camera: Camera, _class: &str, _frame: u64, _mask: &GrayImage) {}
}

/// Writes `detections.jsonl` and PNG frames into one directory.
pub struct DirectoryPublisher {
    dir: PathBuf,
    detections: Mutex<BufWriter<File>>,
}

impl DirectoryPublisher {
    pub const DETECTIONS_FILE: &'static str = "detections.jsonl";

    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = File::create(dir.join(Self::DETECTIONS_FILE))?;
        info!(dir = %dir.display(), "Publishing to directory");
        Ok(Self {
            dir: dir.to_path_buf(),
            detections: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, camera: Camera, frame: u64) -> PathBuf {
        self.dir.join(format!("{camera}_{frame:06}.png"))
    }

    pub fn mask_path(&self, camera: Camera, class: &str, frame: u64) -> PathBuf {
        self.dir.join(format!("{camera}_{frame:06}_{class}_mask.png"))
    }

    pub fn flush(&self) -> Result<()> {
        self.detections.lock().flush()?;
        Ok(())
    }

    fn write_detection(&self, detection: &Detection) -> Result<()> {
        let mut writer = self.detections.lock();
        serde_json::to_writer(&mut *writer, detection)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl Publisher for DirectoryPublisher {
    fn publish_detection(&self, detection: &Detection) {
        if let Err(e) = self.write_detection(detection) {
            warn!(class = %detection.class_name, error = %e, "Failed to record detection");
        }
    }

    fn publish_annotated_frame(&self, camera: Camera, frame: u64, image: &RgbImage) {
        let path = self.frame_path(camera, frame);
        if let Err(e) = image.save(&path) {
            warn!(path = %path.display(), error = %e, "Failed to write annotated frame");
        }
    }

    fn publish_threshold_mask(&self, camera: Camera, class: &str, frame: u64, mask: &GrayImage) {
        let path = self.mask_path(camera, class, frame);
        if let Err(e) = mask.save(&path) {
            warn!(path = %path.display(), error = %e, "Failed to write threshold mask");
        }
    }
}

/// An annotated frame as seen by `MemoryPublisher`.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub camera: Camera,
    pub frame: u64,
    pub image: RgbImage,
}

/// Keeps everything it is handed.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    detections: Mutex<Vec<Detection>>,
    frames: Mutex<Vec<PublishedFrame>>,
    masks: Mutex<Vec<(Camera, String, u64)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.detections.lock().clone()
    }

    pub fn frames(&self) -> Vec<PublishedFrame> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// (camera, class, frame) of every mask published.
    pub fn masks(&self) -> Vec<(Camera, String, u64)> {
        self.masks.lock().clone()
    }
}

impl Publisher for MemoryPublisher {
    fn publish_detection(&self, detection: &Detection) {
        self.detections.lock().push(detection.clone());
    }

    fn publish_annotated_frame(&self, camera: Camera, frame: u64, image: &RgbImage) {
        self.frames.lock().push(PublishedFrame {
            camera,
            frame,
            image: image.clone(),
        });
    }

    fn publish_threshold_mask(&self, camera: Camera, class: &str, frame: u64, _mask: &GrayImage) {
        self.masks.lock().push((camera, class.to_string(), frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn detection(class_name: &str) -> Detection {
        Detection {
            class_id: 2,
            class_name: class_name.to_string(),
            camera: Camera::Forward,
            timestamp: SystemTime::UNIX_EPOCH,
            frame: 7,
            blob_index: 0,
            x: 1.5,
            y: -2.0,
            width: 10.0,
            height: 20.0,
            rotation_degrees: 90.0,
            confidence: 0.8,
            points: 40,
        }
    }

    #[test]
    fn directory_publisher_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DirectoryPublisher::create(dir.path()).unwrap();
        publisher.publish_detection(&detection("buoy"));
        publisher.publish_detection(&detection("gate"));
        publisher.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join(DirectoryPublisher::DETECTIONS_FILE)).unwrap();
        let lines: Vec<Detection> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![detection("buoy"), detection("gate")]);
    }

    #[test]
    fn directory_publisher_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DirectoryPublisher::create(&dir.path().join("out")).unwrap();
        publisher.publish_annotated_frame(Camera::Downward, 3, &RgbImage::new(4, 2));
        publisher.publish_threshold_mask(Camera::Downward, "paths", 3, &GrayImage::new(4, 2));

        let frame = image::open(publisher.frame_path(Camera::Downward, 3)).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert!(publisher.mask_path(Camera::Downward, "paths", 3).exists());
    }

    #[test]
    fn memory_publisher_keeps_everything() {
        let publisher = MemoryPublisher::new();
        publisher.publish_detection(&detection("buoy"));
        publisher.publish_annotated_frame(Camera::Forward, 0, &RgbImage::new(1, 1));
        publisher.publish_threshold_mask(Camera::Forward, "buoy", 0, &GrayImage::new(1, 1));
        assert_eq!(publisher.detections().len(), 1);
        assert_eq!(publisher.frame_count(), 1);
        assert_eq!(publisher.masks(), vec![(Camera::Forward, "buoy".to_string(), 0)]);
    }
}
