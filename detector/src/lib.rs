//! Real-time object detection on images, animated videos and webcam streams.

pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod meter;
pub mod object_url;
pub mod orchestrator;
pub mod sources;
pub mod state;
pub mod utils;

pub use config::DetectionConfig;
pub use engine::{Canvas, Detection, Detections, InferenceEngine, LoopExit, ModelHandle};
pub use error::DetectError;
pub use orchestrator::Detector;
