// THEORY:
// The `source` module replays recorded image sequences from disk. A directory
// holds one camera's frames and the file names sort into capture order.

use crate::core_modules::frame::{Camera, Frame};
use crate::error::{Result, VisionError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct DirectorySource {
    camera: Camera,
    files: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn open(dir: &Path, camera: Camera) -> Result<Self> {
        if !dir.is_dir() {
            return Err(VisionError::Config(format!(
                "{camera} frame directory {} does not exist",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();

        info!(camera = %camera, dir = %dir.display(), frames = files.len(), "Opened frame directory");
        Ok(Self { camera, files })
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Decodes the `index`-th frame, stamped with the file's modification time.
    pub fn load(&self, index: usize) -> Result<Frame> {
        let path = self.files.get(index).ok_or_else(|| {
            VisionError::MalformedFrame(format!("no frame {index} for {} camera", self.camera))
        })?;
        let image = image::open(path)?.to_rgb8();
        let timestamp = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(Frame::with_timestamp(self.camera, timestamp, image))
    }

    pub fn frames(&self) -> impl Iterator<Item = Result<Frame>> + '_ {
        (0..self.files.len()).map(|index| self.load(index))
    }
}
