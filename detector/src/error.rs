use thiserror::Error;
use webcam::WebcamError;

/// Errors of the detection pipeline and its sources.
#[derive(Error, Debug)]
pub enum DetectError {
    /// The artifact is unreachable, malformed, or the warm-up pass failed.
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    /// Detection was requested before the model finished loading.
    #[error("Model is not yet loaded")]
    ModelNotReady,
    /// An image or video could not be decoded.
    #[error("{0}")]
    SourceLoad(String),
    #[error("Camera API is not supported: {0}")]
    UnsupportedDevice(String),
    #[error("Failed to access webcam: {0}")]
    DeviceAccess(String),
    /// The model output does not match the expected layout.
    #[error("Malformed model output: {0}")]
    Decode(String),
}

impl From<WebcamError> for DetectError {
    fn from(err: WebcamError) -> Self {
        match err {
            WebcamError::Unsupported(msg) => DetectError::UnsupportedDevice(msg),
            WebcamError::DeviceAccess(msg) => DetectError::DeviceAccess(msg),
        }
    }
}

impl From<image::ImageError> for DetectError {
    fn from(err: image::ImageError) -> Self {
        DetectError::SourceLoad(err.to_string())
    }
}
