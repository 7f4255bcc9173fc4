//! Detection configuration.
//!
use std::path::PathBuf;

pub const MODEL_NAME: &str = "yolov8n";
pub const CONFIDENCE_THRESHOLD: f32 = 0.2;
pub const IOU_THRESHOLD: f32 = 0.45;
pub const MAX_BOXES: usize = 500;
pub const SCORE_THRESHOLD: f32 = 0.2;

/// Font used for box labels when nothing else is configured.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";
/// Pace of the frame loop, the equivalent of a display refresh.
pub const DEFAULT_REFRESH_HZ: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub model_name: String,
    /// Directory or `http(s)://` base the `models/` tree is served from.
    pub model_origin: String,
    /// Minimum score a detection needs to be drawn.
    pub confidence: f32,
    pub iou_threshold: f32,
    pub max_boxes: usize,
    /// Minimum score a candidate needs to enter suppression.
    pub score_threshold: f32,
    /// Square input size forced onto models exported with dynamic shapes.
    pub input_size: Option<u32>,
    pub font_path: PathBuf,
    pub refresh_hz: u32,
    /// Remote model artifacts are downloaded below this directory.
    pub cache_dir: PathBuf,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_name: MODEL_NAME.into(),
            model_origin: ".".into(),
            confidence: CONFIDENCE_THRESHOLD,
            iou_threshold: IOU_THRESHOLD,
            max_boxes: MAX_BOXES,
            score_threshold: SCORE_THRESHOLD,
            input_size: None,
            font_path: DEFAULT_FONT_PATH.into(),
            refresh_hz: DEFAULT_REFRESH_HZ,
            cache_dir: default_cache_dir(),
        }
    }
}

/// The user cache directory, or the temp dir where there is none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(env!("CARGO_PKG_NAME"))
}

impl DetectionConfig {
    /// Location of the model artifact below the origin.
    pub fn model_path(&self) -> String {
        format!(
            "{}/models/{}_web_model/model.onnx",
            self.model_origin.trim_end_matches('/'),
            self.model_name
        )
    }

    pub fn is_remote(&self) -> bool {
        self.model_origin.starts_with("http://") || self.model_origin.starts_with("https://")
    }
}
