// THEORY:
// The classifier adapter turns the five numbers describing one sampled pixel
// into a label: either "no object" or the numeric id of an object class. Each
// configured class owns one pretrained model. The engine treats a model as an
// opaque `PixelClassifier`; the only concrete model shipped here is a decision
// tree persisted as JSON and loaded once at startup.
//
// The feature vector mixes per-pixel color with context from the previous frame
// (its average saturation and brightness), which lets a tree compensate for the
// overall lighting of the water column.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

pub const FEATURE_COUNT: usize = 5;

/// Input to a classifier for a single sampled pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureVector {
    pub previous_saturation: u8,
    pub previous_brightness: u8,
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl FeatureVector {
    /// Feature order used by persisted models.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.previous_saturation as f64,
            self.previous_brightness as f64,
            self.hue as f64,
            self.saturation as f64,
            self.value as f64,
        ]
    }
}

/// Output of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Nothing,
    Object(u8),
}

impl Label {
    /// Raw model output: 0 is "no object", anything else a class id.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Label::Nothing,
            id => Label::Object(id),
        }
    }
}

/// Maps a feature vector to a label. Implementations are read-only after construction.
pub trait PixelClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> Label;
}

impl<F> PixelClassifier for F
where
    F: Fn(&FeatureVector) -> Label + Send + Sync,
{
    fn classify(&self, features: &FeatureVector) -> Label {
        self(features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNode {
    /// Go to `below` when `features[feature] <= threshold`, otherwise to `above`.
    Split {
        feature: usize,
        threshold: f64,
        below: usize,
        above: usize,
    },
    Leaf {
        label: u8,
    },
}

/// A binary decision tree stored as a flat node list, root first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTree")]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

#[derive(Deserialize)]
struct RawTree {
    nodes: Vec<TreeNode>,
}

impl TryFrom<RawTree> for DecisionTree {
    type Error = String;

    fn try_from(raw: RawTree) -> std::result::Result<Self, String> {
        Self::new(raw.nodes)
    }
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> std::result::Result<Self, String> {
        let tree = Self { nodes };
        tree.validate()?;
        Ok(tree)
    }

    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, String> {
        serde_json::from_reader(reader).map_err(|e| e.to_string())
    }

    /// Loads the model for `class` from disk. Any failure is reported as a model error
    /// for that class so the caller can drop just that class.
    pub fn load(class: &str, path: &Path) -> Result<Self> {
        let model_error = |reason: String| VisionError::Model {
            class: class.to_string(),
            reason,
        };
        let file =
            File::open(path).map_err(|e| model_error(format!("{}: {e}", path.display())))?;
        let tree = Self::from_reader(BufReader::new(file))
            .map_err(|e| model_error(format!("{}: {e}", path.display())))?;
        info!(class, path = %path.display(), nodes = tree.nodes.len(), "Loaded decision tree");
        Ok(tree)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Children must point strictly forward so every walk ends at a leaf.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                below,
                above,
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(format!("node {index} splits on unknown feature {feature}"));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {index} has a non-finite threshold"));
                }
                for child in [*below, *above] {
                    if child <= index || child >= self.nodes.len() {
                        return Err(format!("node {index} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

impl PixelClassifier for DecisionTree {
    fn classify(&self, features: &FeatureVector) -> Label {
        let values = features.as_array();
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { label } => return Label::from_raw(*label),
                TreeNode::Split {
                    feature,
                    threshold,
                    below,
                    above,
                } => {
                    index = if values[*feature] <= *threshold {
                        *below
                    } else {
                        *above
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // saturation > 100 and hue <= 10 => class 2
    const RED_TREE: &str = r#"{
        "nodes": [
            {"split": {"feature": 3, "threshold": 100.0, "below": 1, "above": 2}},
            {"leaf": {"label": 0}},
            {"split": {"feature": 2, "threshold": 10.0, "below": 3, "above": 4}},
            {"leaf": {"label": 2}},
            {"leaf": {"label": 0}}
        ]
    }"#;

    fn features(hue: u8, saturation: u8) -> FeatureVector {
        FeatureVector {
            hue,
            saturation,
            value: 200,
            ..Default::default()
        }
    }

    #[test]
    fn tree_walks_to_expected_leaf() {
        let tree = DecisionTree::from_reader(RED_TREE.as_bytes()).unwrap();
        assert_eq!(tree.classify(&features(5, 200)), Label::Object(2));
        assert_eq!(tree.classify(&features(60, 200)), Label::Nothing);
        assert_eq!(tree.classify(&features(5, 50)), Label::Nothing);
        // threshold is inclusive on the "below" side
        assert_eq!(tree.classify(&features(10, 101)), Label::Object(2));
    }

    #[test]
    fn backward_children_are_rejected() {
        let nodes = vec![
            TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                below: 0,
                above: 1,
            },
            TreeNode::Leaf { label: 0 },
        ];
        assert!(DecisionTree::new(nodes).is_err());
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let nodes = vec![
            TreeNode::Split {
                feature: FEATURE_COUNT,
                threshold: 1.0,
                below: 1,
                above: 2,
            },
            TreeNode::Leaf { label: 0 },
            TreeNode::Leaf { label: 1 },
        ];
        assert!(DecisionTree::new(nodes).is_err());
        assert!(DecisionTree::new(Vec::new()).is_err());
    }

    #[test]
    fn deserializing_checks_the_tree() {
        let dangling = r#"{"nodes": [{"split": {"feature": 0, "threshold": 1.0, "below": 1, "above": 9}}, {"leaf": {"label": 0}}]}"#;
        let err = serde_json::from_str::<DecisionTree>(dangling).unwrap_err();
        assert!(err.to_string().contains("invalid child 9"));
    }

    #[test]
    fn load_reports_class_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        match DecisionTree::load("paths", &missing) {
            Err(VisionError::Model { class, .. }) => assert_eq!(class, "paths"),
            other => panic!("expected model error, got {other:?}"),
        }

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ nodes: ").unwrap();
        assert!(matches!(
            DecisionTree::load("paths", &corrupt),
            Err(VisionError::Model { .. })
        ));
    }

    #[test]
    fn load_reads_tree_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RED_TREE.as_bytes()).unwrap();
        let tree = DecisionTree::load("buoy", file.path()).unwrap();
        assert_eq!(tree.nodes().len(), 5);
    }

    #[test]
    fn closures_are_classifiers() {
        let always = |_: &FeatureVector| Label::Object(7);
        let classifier: &dyn PixelClassifier = &always;
        assert_eq!(classifier.classify(&FeatureVector::default()), Label::Object(7));
    }
}
