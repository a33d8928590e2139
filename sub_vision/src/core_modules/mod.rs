pub mod annotator;
pub mod blob_detector;
pub mod classifier;
pub mod confidence;
pub mod frame;
pub mod grid_manager;
pub mod smart_blob;
pub mod tracker;
