// THEORY:
// This file is the entry point of the `sub_vision` library crate. It exposes the
// per-camera `CameraPipeline`, the worker layer that runs one pipeline per
// camera, the configuration and the `Publisher` seam through which results
// leave the engine. The individual stages live under `core_modules` and are
// public so they can be tested and reused on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod publisher;
pub mod source;

pub use config::{ObjectClassConfig, Tunables, VisionConfig};
pub use core_modules::frame::{Camera, Frame};
pub use error::{Result, VisionError};
pub use parallel_pipeline::CameraWorkers;
pub use pipeline::{CameraPipeline, ClassFlags, ClassUpdate, Detection, FrameReport};
pub use publisher::Publisher;
