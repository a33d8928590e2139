// THEORY:
// The configuration is a static table of object classes plus a handful of global
// tunables, read once from TOML at startup. Everything that can be wrong with it
// is caught here, before a single frame is processed: unknown model ids,
// duplicate classes, nonsensical thresholds. A validated `VisionConfig` is never
// mutated afterwards; the only runtime switch (a class's enabled flag) lives in
// the pipeline, not here.

use crate::core_modules::annotator::AnnotationStyle;
use crate::core_modules::confidence::ConfidenceModel;
use crate::core_modules::frame::Camera;
use crate::core_modules::smart_blob::ShapeModel;
use crate::core_modules::tracker::TrackerConfig;
use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Global knobs shared by every class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    /// Grid stride S in pixels.
    #[serde(default = "default_stride")]
    pub stride: u32,
    #[serde(default = "default_confirmation_streak")]
    pub confirmation_streak: u32,
    #[serde(default = "default_staleness_window")]
    pub staleness_window: u64,
    /// Has no default: the right value depends on the vehicle and cameras.
    pub distance_tolerance: f64,
    #[serde(default = "default_min_blob_points")]
    pub min_blob_points: usize,
    #[serde(default = "default_min_blob_points_elongated")]
    pub min_blob_points_elongated: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_confidence_elongated")]
    pub min_confidence_elongated: f64,
}

fn default_stride() -> u32 {
    4
}

fn default_confirmation_streak() -> u32 {
    3
}

fn default_staleness_window() -> u64 {
    3
}

fn default_min_blob_points() -> usize {
    200
}

fn default_min_blob_points_elongated() -> usize {
    400
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_min_confidence_elongated() -> f64 {
    0.7
}

impl Tunables {
    /// Defaults for everything except the distance tolerance.
    pub fn with_distance_tolerance(distance_tolerance: f64) -> Self {
        Self {
            stride: default_stride(),
            confirmation_streak: default_confirmation_streak(),
            staleness_window: default_staleness_window(),
            distance_tolerance,
            min_blob_points: default_min_blob_points(),
            min_blob_points_elongated: default_min_blob_points_elongated(),
            min_confidence: default_min_confidence(),
            min_confidence_elongated: default_min_confidence_elongated(),
        }
    }

    pub fn min_blob_points(&self, elongated: bool) -> usize {
        if elongated {
            self.min_blob_points_elongated
        } else {
            self.min_blob_points
        }
    }

    pub fn min_confidence(&self, elongated: bool) -> f64 {
        if elongated {
            self.min_confidence_elongated
        } else {
            self.min_confidence
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            confirmation_streak: self.confirmation_streak,
            staleness_window: self.staleness_window,
            distance_tolerance: self.distance_tolerance,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(VisionError::Config("stride must be at least 1".to_string()));
        }
        if self.confirmation_streak == 0 {
            return Err(VisionError::Config(
                "confirmation_streak must be at least 1".to_string(),
            ));
        }
        if !self.distance_tolerance.is_finite() || self.distance_tolerance < 0.0 {
            return Err(VisionError::Config(format!(
                "distance_tolerance must be a non-negative number, got {}",
                self.distance_tolerance
            )));
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("min_confidence_elongated", self.min_confidence_elongated),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VisionError::Config(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// One detectable object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectClassConfig {
    pub name: String,
    /// Label the class's model emits; 0 is reserved for "no object".
    pub id: u8,
    pub camera: Camera,
    #[serde(default)]
    pub shape_model: ShapeModel,
    #[serde(default = "default_confidence_model")]
    pub confidence_model: ConfidenceModel,
    #[serde(default = "default_max_blobs")]
    pub max_blobs: usize,
    #[serde(default)]
    pub annotation: AnnotationStyle,
    /// RGB annotation color.
    #[serde(default = "default_color")]
    pub color: [u8; 3],
    /// Path-type objects use the stricter size and confidence limits.
    #[serde(default)]
    pub elongated: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub publish_threshold: bool,
    /// Decision-tree file, relative to the configuration file.
    pub model: PathBuf,
}

fn default_confidence_model() -> ConfidenceModel {
    ConfidenceModel::Rectangle
}

fn default_max_blobs() -> usize {
    1
}

fn default_color() -> [u8; 3] {
    [255, 255, 0]
}

fn default_enabled() -> bool {
    true
}

impl ObjectClassConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| VisionError::Config(format!("class '{}': {reason}", self.name));
        if self.name.trim().is_empty() {
            return Err(VisionError::Config("class name must not be empty".to_string()));
        }
        if self.id == 0 {
            return Err(invalid("id 0 is reserved for \"no object\"".to_string()));
        }
        if let ShapeModel::Unknown(id) = &self.shape_model {
            return Err(invalid(format!("unknown shape model '{id}'")));
        }
        if let ConfidenceModel::Unknown(id) = &self.confidence_model {
            return Err(invalid(format!("unknown confidence model '{id}'")));
        }
        if self.max_blobs == 0 {
            return Err(invalid("max_blobs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// The whole validated configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    pub tunables: Tunables,
    #[serde(default)]
    pub classes: Vec<ObjectClassConfig>,
    /// Caption font; captions are skipped when absent.
    #[serde(default)]
    pub annotation_font: Option<PathBuf>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl VisionConfig {
    /// Parses and validates a configuration. Relative paths resolve against the
    /// current directory.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: VisionConfig = toml::from_str(text)?;
        config.base_dir = PathBuf::from(".");
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(
            path = %path.display(),
            classes = config.classes.len(),
            stride = config.tunables.stride,
            "Loaded vision configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tunables.validate()?;
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for class in &self.classes {
            class.validate()?;
            if !names.insert(class.name.as_str()) {
                return Err(VisionError::Config(format!(
                    "duplicate class name '{}'",
                    class.name
                )));
            }
            if !ids.insert(class.id) {
                return Err(VisionError::Config(format!(
                    "duplicate class id {} ('{}')",
                    class.id, class.name
                )));
            }
        }
        Ok(())
    }

    /// Resolves a path from the file against the file's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn classes_for(&self, camera: Camera) -> impl Iterator<Item = &ObjectClassConfig> {
        self.classes.iter().filter(move |class| class.camera == camera)
    }
}
