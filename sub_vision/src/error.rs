// THEORY:
// One error enum covers both startup failures (bad configuration, unreadable
// models) and per-frame failures (malformed input), so callers can `?` through
// either. Normal rejections inside a frame, such as a sparse blob or a track
// that is not confirmed yet, are not errors and never show up here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error for class '{class}': {reason}")]
    Model { class: String, reason: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_names_class() {
        let err = VisionError::Model {
            class: "gate".to_string(),
            reason: "missing file".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("gate"));
        assert!(text.contains("missing file"));
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            other => panic!("Expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn error_from_toml() {
        let toml_err = toml::from_str::<toml::Table>("not = [valid").unwrap_err();
        let vision_err: VisionError = toml_err.into();
        assert!(matches!(vision_err, VisionError::Toml(_)));
    }
}
