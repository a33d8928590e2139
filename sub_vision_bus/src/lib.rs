use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, RgbImage};
use sub_vision::core_modules::frame::Camera;
use sub_vision::{Detection, Publisher};
use tokio::sync::broadcast;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Png,
    Jpeg { quality: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Annotated,
    ThresholdMask { class: String },
}

/// An encoded image on its way to subscribers.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub camera: Camera,
    pub frame: u64,
    pub kind: FrameKind,
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Arc<[u8]>,
}

/// Fans pipeline output out to any number of subscribers. Slow subscribers lag
/// and lose the oldest messages; the pipeline never waits for them.
#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
    pub detections_tx: broadcast::Sender<Detection>,
    format: FrameFormat,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        let (detections_tx, _) = broadcast::channel::<Detection>(capacity.max(1));
        Self {
            frames_tx,
            detections_tx,
            format: FrameFormat::Jpeg { quality: 80 },
        }
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<FramePacket> {
        self.frames_tx.subscribe()
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<Detection> {
        self.detections_tx.subscribe()
    }

    fn send_image(
        &self,
        camera: Camera,
        frame: u64,
        kind: FrameKind,
        (width, height): (u32, u32),
        pixels: &[u8],
        color: ExtendedColorType,
    ) {
        if self.frames_tx.receiver_count() == 0 {
            return;
        }
        let data = match encode(pixels, width, height, color, self.format) {
            Ok(data) => data,
            Err(e) => {
                warn!(camera = %camera, frame, error = %e, "Failed to encode frame");
                return;
            }
        };
        let packet = FramePacket {
            camera,
            frame,
            kind,
            ts_millis: now_millis(),
            width,
            height,
            format: self.format,
            data: data.into(),
        };
        // only fails when every subscriber has gone away
        if self.frames_tx.send(packet).is_err() {
            trace!(camera = %camera, frame, "No frame subscribers");
        }
    }
}

impl Publisher for FrameBus {
    fn publish_detection(&self, detection: &Detection) {
        if self.detections_tx.send(detection.clone()).is_err() {
            trace!(class = %detection.class_name, "No detection subscribers");
        }
    }

    fn publish_annotated_frame(&self, camera: Camera, frame: u64, image: &RgbImage) {
        self.send_image(
            camera,
            frame,
            FrameKind::Annotated,
            image.dimensions(),
            image.as_raw(),
            ExtendedColorType::Rgb8,
        );
    }

    fn publish_threshold_mask(&self, camera: Camera, class: &str, frame: u64, mask: &GrayImage) {
        self.send_image(
            camera,
            frame,
            FrameKind::ThresholdMask {
                class: class.to_string(),
            },
            mask.dimensions(),
            mask.as_raw(),
            ExtendedColorType::L8,
        );
    }
}

pub fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
    format: FrameFormat,
) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        FrameFormat::Png => PngEncoder::new(&mut out).write_image(pixels, width, height, color)?,
        FrameFormat::Jpeg { quality } => {
            JpegEncoder::new_with_quality(&mut out, quality).write_image(pixels, width, height, color)?
        }
    }
    Ok(out)
}

/// One detection as a JSON line.
pub fn detection_json(detection: &Detection) -> serde_json::Result<String> {
    serde_json::to_string(detection)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
