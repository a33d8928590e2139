// THEORY:
// The confidence scorer asks one question of a fitted shape: given its size and
// the sampling stride, how many grid samples should a solid object of that shape
// have produced, and how many did it actually produce? A real object fills its
// outline; classifier noise leaves a sparse, scattered cluster.
//
// - rectangle: expected = (w * h) / S^2
// - circle:    expected = (pi * w * h) / (4 * S^2), the inscribed ellipse
//
// Expected counts are truncated to whole samples. The outcome is a
// discriminated value instead of an error: a numeric score in [0, 1], or one of
// two reasons the blob cannot be scored. Both reasons mean "reject this blob"
// and never abort the frame.

use crate::core_modules::smart_blob::ShapeAnalysis;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Statistical expectation of sample density for a fitted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConfidenceModel {
    Rectangle,
    Circle,
    Unknown(String),
}

impl From<String> for ConfidenceModel {
    fn from(id: String) -> Self {
        match id.as_str() {
            "rectangle" => ConfidenceModel::Rectangle,
            "circle" => ConfidenceModel::Circle,
            _ => ConfidenceModel::Unknown(id),
        }
    }
}

impl From<ConfidenceModel> for String {
    fn from(model: ConfidenceModel) -> Self {
        match model {
            ConfidenceModel::Rectangle => "rectangle".to_string(),
            ConfidenceModel::Circle => "circle".to_string(),
            ConfidenceModel::Unknown(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confidence {
    /// Observed over expected points, clamped to [0, 1].
    Score(f64),
    /// The shape is too small to expect even one sample.
    DegenerateGeometry,
    UnknownModel,
}

impl Confidence {
    pub fn value(&self) -> Option<f64> {
        match self {
            Confidence::Score(value) => Some(*value),
            _ => None,
        }
    }

    /// A detection passes only with a score strictly above `threshold`.
    pub fn accepts(&self, threshold: f64) -> bool {
        self.value().is_some_and(|value| value > threshold)
    }
}

/// Whole samples a solid shape of this size should produce, or `None` for an
/// unknown model.
pub fn expected_points(model: &ConfidenceModel, width: f64, height: f64, stride: u32) -> Option<i64> {
    let cell = (stride.max(1) as f64).powi(2);
    let expected = match model {
        ConfidenceModel::Rectangle => width * height / cell,
        ConfidenceModel::Circle => PI * width * height / (4.0 * cell),
        ConfidenceModel::Unknown(_) => return None,
    };
    Some(expected.floor() as i64)
}

pub fn score(model: &ConfidenceModel, shape: &ShapeAnalysis, stride: u32) -> Confidence {
    match expected_points(model, shape.width, shape.height, stride) {
        Some(expected) => score_points(shape.point_count, expected),
        None => Confidence::UnknownModel,
    }
}

pub fn score_points(observed: usize, expected: i64) -> Confidence {
    if expected <= 0 {
        return Confidence::DegenerateGeometry;
    }
    Confidence::Score((observed as f64 / expected as f64).min(1.0))
}
