// THEORY:
// The `pipeline` module is the top-level API of the vision engine. A
// `CameraPipeline` turns one camera's frames into confirmed detections and an
// annotated frame, running every stage in order:
//
//   normalize -> sample -> (per class: classify -> blobs -> shape -> confidence
//   -> track) -> annotate + publish -> end-of-frame bookkeeping
//
// All mutable state that has to survive between frames lives in two places:
// - `PipelineContext`: the rolling color average, the frame counter and the
//   sampling phase. One per camera, never shared.
// - `ClassRuntime`: each class's label grid and track list.
//
// The per-class stages are independent, so they run in parallel (rayon) over
// the classes while the sampled grid is shared read-only. Everything that
// touches shared output (the annotated frame, the publisher, the context) runs
// afterwards on a single thread, in class order.
//
// A frame is either processed completely or rejected before any state changes.

use crate::config::{ObjectClassConfig, Tunables, VisionConfig};
use crate::core_modules::annotator::{Annotator, render_threshold_mask};
use crate::core_modules::blob_detector::{BlobCriteria, blob_detector};
use crate::core_modules::classifier::{DecisionTree, PixelClassifier};
use crate::core_modules::confidence::{self, Confidence};
use crate::core_modules::frame::{Camera, Frame, normalize};
use crate::core_modules::grid_manager::{GridScanner, LabelGrid, RollingColorStats, SampleSet};
use crate::core_modules::smart_blob::{ShapeAnalysis, analyze_blob};
use crate::core_modules::tracker::{Track, TrackState, Tracker};
use crate::error::{Result, VisionError};
use crate::publisher::Publisher;
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, trace};

/// A confirmed detection as handed to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u8,
    pub class_name: String,
    pub camera: Camera,
    pub timestamp: SystemTime,
    pub frame: u64,
    /// Rank of the blob within its class on this frame, largest first.
    pub blob_index: usize,
    /// Frame-centered: origin at the image center, x right, y up.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Long axis measured from the image's vertical axis, in [0, 180). A
    /// horizontal bar reads 90.
    pub rotation_degrees: f64,
    pub confidence: f64,
    /// Sample points in the blob.
    pub points: usize,
}

/// Published degrees for a normalized long-axis rotation.
pub fn rotation_degrees(rotation: f64) -> f64 {
    (rotation + FRAC_PI_2).to_degrees()
}

/// Camera-scoped state carried from one frame to the next.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub color_stats: RollingColorStats,
    /// Frames processed so far; also the number of the frame in flight.
    pub frame_counter: u64,
    pub scanner: GridScanner,
}

impl PipelineContext {
    pub fn new(stride: u32) -> Self {
        Self {
            color_stats: RollingColorStats::default(),
            frame_counter: 0,
            scanner: GridScanner::new(stride),
        }
    }
}

/// Runtime switches of a class. As bits: 1 enables the class, 2 publishes its
/// threshold mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFlags {
    pub enabled: bool,
    pub publish_threshold: bool,
}

impl ClassFlags {
    pub const ENABLED: u32 = 1;
    pub const PUBLISH_THRESHOLD: u32 = 2;

    pub fn from_bits(bits: u32) -> Self {
        Self {
            enabled: bits & Self::ENABLED != 0,
            publish_threshold: bits & Self::PUBLISH_THRESHOLD != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.enabled {
            bits |= Self::ENABLED;
        }
        if self.publish_threshold {
            bits |= Self::PUBLISH_THRESHOLD;
        }
        bits
    }
}

/// A change to one class's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassUpdate {
    Enabled(bool),
    PublishThreshold(bool),
    Flags(ClassFlags),
}

impl ClassUpdate {
    fn apply(self, flags: &mut ClassFlags) {
        match self {
            ClassUpdate::Enabled(on) => flags.enabled = on,
            ClassUpdate::PublishThreshold(on) => flags.publish_threshold = on,
            ClassUpdate::Flags(new) => *flags = new,
        }
    }
}

/// Public view of a configured class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub id: u8,
    pub camera: Camera,
    pub flags: ClassFlags,
}

/// What happened to one class on one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSummary {
    pub class_id: u8,
    pub blobs: usize,
    /// Blobs whose shape or confidence could not be computed or was too low.
    pub rejected: usize,
    /// Accepted blobs whose track is not confirmed yet.
    pub provisional: usize,
    pub confirmed: usize,
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub camera: Camera,
    pub frame: u64,
    pub detections: Vec<Detection>,
    pub classes: Vec<ClassSummary>,
}

struct ClassRuntime {
    config: ObjectClassConfig,
    classifier: Box<dyn PixelClassifier>,
    grid: LabelGrid,
    tracker: Tracker,
    flags: ClassFlags,
}

/// A blob that survived every stage on this frame.
struct Confirmed {
    blob_index: usize,
    shape: ShapeAnalysis,
    confidence: f64,
}

struct ClassOutcome {
    summary: ClassSummary,
    confirmed: Vec<Confirmed>,
    mask: Option<GrayImage>,
}

impl ClassRuntime {
    /// Per-class stages for one frame. Touches only this class's own state.
    fn run(&mut self, samples: &SampleSet, tunables: &Tunables, frame: u64) -> ClassOutcome {
        let elongated = self.config.elongated;
        samples.classify_into(self.classifier.as_ref(), &mut self.grid);
        let mask = self
            .flags
            .publish_threshold
            .then(|| render_threshold_mask(&self.grid));

        let criteria = BlobCriteria {
            class_id: self.config.id,
            min_points: tunables.min_blob_points(elongated),
            max_blobs: self.config.max_blobs,
        };
        let blobs = blob_detector::find_blobs(&mut self.grid, samples.phase(), samples.stride(), &criteria);
        let threshold = tunables.min_confidence(elongated);

        let mut summary = ClassSummary {
            class_id: self.config.id,
            blobs: blobs.len(),
            ..Default::default()
        };
        let mut confirmed = Vec::new();

        for (blob_index, blob) in blobs.iter().enumerate() {
            let Some(shape) = analyze_blob(&self.config.shape_model, blob) else {
                summary.rejected += 1;
                continue;
            };

            let score = confidence::score(&self.config.confidence_model, &shape, samples.stride());
            let value = match score {
                Confidence::Score(value) if score.accepts(threshold) => value,
                Confidence::Score(value) => {
                    trace!(class = %self.config.name, value, threshold, "Blob below confidence threshold");
                    summary.rejected += 1;
                    continue;
                }
                Confidence::DegenerateGeometry | Confidence::UnknownModel => {
                    debug!(class = %self.config.name, ?score, points = shape.point_count, "Blob cannot be scored");
                    summary.rejected += 1;
                    continue;
                }
            };

            match self.tracker.observe(shape.center_x, shape.center_y, frame) {
                TrackState::Confirmed => {
                    summary.confirmed += 1;
                    confirmed.push(Confirmed {
                        blob_index,
                        shape,
                        confidence: value,
                    });
                }
                TrackState::Provisional => summary.provisional += 1,
            }
        }

        ClassOutcome {
            summary,
            confirmed,
            mask,
        }
    }
}

/// The whole vision engine for one camera.
pub struct CameraPipeline {
    camera: Camera,
    tunables: Tunables,
    classes: Vec<ClassRuntime>,
    context: PipelineContext,
    annotator: Arc<Annotator>,
    publisher: Arc<dyn Publisher>,
}

impl CameraPipeline {
    pub fn new(camera: Camera, tunables: Tunables, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            camera,
            context: PipelineContext::new(tunables.stride),
            tunables,
            classes: Vec::new(),
            annotator: Arc::new(Annotator::without_font()),
            publisher,
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<Annotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Builds the pipeline for `camera` from a validated configuration, loading
    /// one model per class. A class whose model cannot be loaded is left out; the
    /// others still run.
    pub fn from_config(
        camera: Camera,
        config: &VisionConfig,
        publisher: Arc<dyn Publisher>,
        annotator: Arc<Annotator>,
    ) -> Result<Self> {
        let mut pipeline =
            Self::new(camera, config.tunables.clone(), publisher).with_annotator(annotator);
        for class in config.classes_for(camera) {
            match DecisionTree::load(&class.name, &config.resolve(&class.model)) {
                Ok(tree) => pipeline.add_class(class.clone(), Box::new(tree))?,
                Err(e) => error!(class = %class.name, error = %e, "Class unavailable, model failed to load"),
            }
        }
        info!(camera = %camera, classes = pipeline.classes.len(), "Camera pipeline ready");
        Ok(pipeline)
    }

    /// Registers a class with its model.
    pub fn add_class(
        &mut self,
        config: ObjectClassConfig,
        classifier: Box<dyn PixelClassifier>,
    ) -> Result<()> {
        if config.camera != self.camera {
            return Err(VisionError::Config(format!(
                "class '{}' belongs to the {} camera, not {}",
                config.name, config.camera, self.camera
            )));
        }
        if self
            .classes
            .iter()
            .any(|c| c.config.name == config.name || c.config.id == config.id)
        {
            return Err(VisionError::Config(format!(
                "class '{}' (id {}) is already registered",
                config.name, config.id
            )));
        }
        self.classes.push(ClassRuntime {
            flags: ClassFlags {
                enabled: config.enabled,
                publish_threshold: config.publish_threshold,
            },
            tracker: Tracker::new(config.id, self.tunables.tracker_config()),
            grid: LabelGrid::new(0, 0),
            classifier,
            config,
        });
        Ok(())
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn classes(&self) -> Vec<ClassInfo> {
        self.classes
            .iter()
            .map(|c| ClassInfo {
                name: c.config.name.clone(),
                id: c.config.id,
                camera: c.config.camera,
                flags: c.flags,
            })
            .collect()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c.config.name == name)
    }

    /// Changes a class's flags for subsequent frames and returns the new flags.
    pub fn update_class(&mut self, name: &str, update: ClassUpdate) -> Result<ClassFlags> {
        let class = self
            .classes
            .iter_mut()
            .find(|c| c.config.name == name)
            .ok_or_else(|| VisionError::UnknownClass(name.to_string()))?;
        update.apply(&mut class.flags);
        info!(
            camera = %self.camera,
            class = name,
            enabled = class.flags.enabled,
            publish_threshold = class.flags.publish_threshold,
            "Class flags updated"
        );
        Ok(class.flags)
    }

    /// Switches a class on or off for subsequent frames.
    pub fn set_class_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        self.update_class(name, ClassUpdate::Enabled(enabled)).map(|_| ())
    }

    /// Starts or stops publishing a class's threshold mask.
    pub fn set_threshold_published(&mut self, name: &str, on: bool) -> Result<()> {
        self.update_class(name, ClassUpdate::PublishThreshold(on))
            .map(|_| ())
    }

    /// Replaces both flags at once.
    pub fn set_class_flags(&mut self, name: &str, flags: ClassFlags) -> Result<()> {
        self.update_class(name, ClassUpdate::Flags(flags)).map(|_| ())
    }

    /// Tracks currently held for a class.
    pub fn tracks(&self, name: &str) -> Option<&[Track]> {
        self.classes
            .iter()
            .find(|c| c.config.name == name)
            .map(|c| c.tracker.tracks())
    }

    /// Runs one frame through every stage and publishes the results.
    pub fn process(&mut self, frame: Frame) -> Result<FrameReport> {
        frame.validate()?;
        if frame.camera != self.camera {
            return Err(VisionError::MalformedFrame(format!(
                "{} frame delivered to the {} pipeline",
                frame.camera, self.camera
            )));
        }

        let frame_number = self.context.frame_counter;
        let timestamp = frame.timestamp;
        let normalized = normalize(frame);
        let (width, height) = (normalized.width(), normalized.height());
        let samples = self
            .context
            .scanner
            .scan(&normalized.hsv, self.context.color_stats);

        let tunables = &self.tunables;
        let outcomes: Vec<(usize, ClassOutcome)> = self
            .classes
            .par_iter_mut()
            .enumerate()
            .filter(|(_, class)| class.flags.enabled)
            .map(|(index, class)| (index, class.run(&samples, tunables, frame_number)))
            .collect();

        let mut annotated = normalized.rgb;
        let mut detections = Vec::new();
        let mut summaries = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes {
            let config = &self.classes[index].config;
            if let Some(mask) = &outcome.mask {
                self.publisher
                    .publish_threshold_mask(self.camera, &config.name, frame_number, mask);
            }
            for hit in outcome.confirmed {
                self.annotator.annotate(
                    &mut annotated,
                    config.annotation,
                    config.color,
                    &hit.shape,
                    hit.confidence,
                );
                let detection = Detection {
                    class_id: config.id,
                    class_name: config.name.clone(),
                    camera: self.camera,
                    timestamp,
                    frame: frame_number,
                    blob_index: hit.blob_index,
                    x: hit.shape.center_x - width as f64 / 2.0,
                    y: height as f64 / 2.0 - hit.shape.center_y,
                    width: hit.shape.width,
                    height: hit.shape.height,
                    rotation_degrees: rotation_degrees(hit.shape.rotation),
                    confidence: hit.confidence,
                    points: hit.shape.point_count,
                };
                debug!(
                    class = %detection.class_name,
                    x = detection.x,
                    y = detection.y,
                    confidence = detection.confidence,
                    "Detection confirmed"
                );
                self.publisher.publish_detection(&detection);
                detections.push(detection);
            }
            summaries.push(outcome.summary);
        }

        // single writer for everything shared across classes
        if let Some(stats) = samples.sums().finalize() {
            self.context.color_stats = stats;
        }
        for class in &mut self.classes {
            class.tracker.prune(frame_number);
        }
        self.context.frame_counter += 1;
        self.context.scanner.advance();

        self.publisher
            .publish_annotated_frame(self.camera, frame_number, &annotated);

        trace!(
            camera = %self.camera,
            frame = frame_number,
            samples = samples.samples().len(),
            detections = detections.len(),
            "Frame processed"
        );
        Ok(FrameReport {
            camera: self.camera,
            frame: frame_number,
            detections,
            classes: summaries,
        })
    }
}
