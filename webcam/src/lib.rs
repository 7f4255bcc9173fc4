//! Webcam access.
//!
//! A `Webcam` opens a camera stream and attaches it to a `VideoSink`, the place frames are read
//! from. Closing detaches and stops the stream again. The only backend shipped is Video4Linux
//! (feature `v4l`); without it every `open` fails with `WebcamError::Unsupported`.
use image::RgbImage;
use thiserror::Error;

#[cfg(feature = "v4l")]
pub mod sensors;
mod sink;

pub use sink::VideoSink;

/// Errors raised while acquiring a camera stream.
#[derive(Error, Debug)]
pub enum WebcamError {
    #[error("Camera API is not supported: {0}")]
    Unsupported(String),
    #[error("Failed to access webcam: {0}")]
    DeviceAccess(String),
}

/// Capture function of a started camera. Returns `None` once the device stops delivering frames.
pub type CaptureFn = Box<dyn FnMut() -> Option<RgbImage> + Send>;

/// Requested camera parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub device: String,
    pub format: String,
    /// Ideal resolution, the backend falls back to the largest supported one.
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)` seconds, fastest supported if `None`.
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: Some((1280, 720)),
            frame_rate: None,
        }
    }
}

/// Parameters the camera actually started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device: String,
    pub resolution: (u32, u32),
    pub frame_rate: (u32, u32),
}

/// A running camera stream.
///
/// Stopping drops the capture function, which releases the device. Stopping twice is a no-op.
pub struct MediaStream {
    info: StreamInfo,
    capture: Option<CaptureFn>,
}

impl MediaStream {
    pub fn new(info: StreamInfo, capture: CaptureFn) -> Self {
        Self {
            info,
            capture: Some(capture),
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Capture the next frame, `None` if the stream is stopped or the device failed.
    pub fn capture(&mut self) -> Option<RgbImage> {
        self.capture.as_mut().and_then(|capture| capture())
    }

    pub fn stop(&mut self) {
        if self.capture.take().is_some() {
            log::debug!("Stopped stream of {}", &self.info.device);
        }
    }
}

/// Something able to start camera streams.
pub trait CameraBackend: Send {
    /// Whether a device matching the config exists at all.
    fn is_available(&self, config: &CameraConfig) -> bool;

    fn start(&self, config: &CameraConfig) -> Result<MediaStream, WebcamError>;
}

/// Camera access for a single sink.
pub struct Webcam {
    config: CameraConfig,
    backend: Option<Box<dyn CameraBackend>>,
}

impl Webcam {
    /// Create an instance using the compiled-in backend, if any.
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            backend: default_backend(),
        }
    }

    pub fn with_backend(config: CameraConfig, backend: Box<dyn CameraBackend>) -> Self {
        Self {
            config,
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn is_supported(&self) -> bool {
        self.backend
            .as_ref()
            .map(|backend| backend.is_available(&self.config))
            .unwrap_or(false)
    }

    /// Start the camera and attach its stream to `sink`.
    ///
    /// A stream already attached to the sink is stopped first.
    pub fn open(&self, sink: &mut VideoSink) -> Result<StreamInfo, WebcamError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            WebcamError::Unsupported("no camera backend compiled in".to_owned())
        })?;
        if !backend.is_available(&self.config) {
            return Err(WebcamError::Unsupported(format!(
                "no camera device at {}",
                &self.config.device
            )));
        }

        self.close(sink);

        let stream = backend.start(&self.config)?;
        let info = stream.info().clone();
        log::info!(
            "Opened camera {} at {}x{}",
            &info.device,
            info.resolution.0,
            info.resolution.1
        );
        sink.attach(stream);

        Ok(info)
    }

    /// Stop and detach the stream of `sink`. Does nothing if no stream is attached.
    pub fn close(&self, sink: &mut VideoSink) {
        if let Some(mut stream) = sink.detach() {
            stream.stop();
            log::info!("Closed camera {}", &stream.info().device);
        }
    }
}

#[cfg(feature = "v4l")]
fn default_backend() -> Option<Box<dyn CameraBackend>> {
    Some(Box::new(sensors::V4lBackend))
}

#[cfg(not(feature = "v4l"))]
fn default_backend() -> Option<Box<dyn CameraBackend>> {
    None
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use image::Rgb;

    use super::*;

    /// Counts how often the capture function of a stream was dropped.
    struct DropCounter(Arc<AtomicUsize>);

    impl DropCounter {
        fn keep_alive(&self) {}
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedBackend {
        available: bool,
        fail_start: bool,
        stops: Arc<AtomicUsize>,
    }

    impl CameraBackend for ScriptedBackend {
        fn is_available(&self, _config: &CameraConfig) -> bool {
            self.available
        }

        fn start(&self, config: &CameraConfig) -> Result<MediaStream, WebcamError> {
            if self.fail_start {
                return Err(WebcamError::DeviceAccess("permission denied".into()));
            }
            let guard = DropCounter(self.stops.clone());
            let capture = move || {
                guard.keep_alive();
                Some(RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])))
            };
            Ok(MediaStream::new(
                StreamInfo {
                    device: config.device.clone(),
                    resolution: (4, 2),
                    frame_rate: (1, 30),
                },
                Box::new(capture),
            ))
        }
    }

    fn scripted(available: bool, fail_start: bool) -> (Webcam, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend {
            available,
            fail_start,
            stops: stops.clone(),
        };
        (
            Webcam::with_backend(CameraConfig::default(), Box::new(backend)),
            stops,
        )
    }

    #[cfg(not(feature = "v4l"))]
    #[test]
    fn open_without_backend_is_unsupported() {
        let webcam = Webcam::new(CameraConfig::default());
        let mut sink = VideoSink::new();

        assert!(!webcam.is_supported());
        assert!(matches!(
            webcam.open(&mut sink),
            Err(WebcamError::Unsupported(_))
        ));
        assert!(!sink.has_stream());
    }

    #[test]
    fn open_missing_device_is_unsupported() {
        let (webcam, _) = scripted(false, false);
        let mut sink = VideoSink::new();

        assert!(matches!(
            webcam.open(&mut sink),
            Err(WebcamError::Unsupported(_))
        ));
    }

    #[test]
    fn failing_start_is_device_access() {
        let (webcam, _) = scripted(true, true);
        let mut sink = VideoSink::new();

        assert!(matches!(
            webcam.open(&mut sink),
            Err(WebcamError::DeviceAccess(_))
        ));
        assert!(!sink.has_stream());
    }

    #[test]
    fn open_attaches_stream_to_sink() {
        let (webcam, _) = scripted(true, false);
        let mut sink = VideoSink::new();

        let info = webcam.open(&mut sink).unwrap();
        assert_eq!(info.resolution, (4, 2));
        assert!(sink.has_stream());

        let frame = sink.capture().unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
    }

    #[test]
    fn close_twice_is_a_noop() {
        let (webcam, stops) = scripted(true, false);
        let mut sink = VideoSink::new();
        webcam.open(&mut sink).unwrap();

        webcam.close(&mut sink);
        webcam.close(&mut sink);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!sink.has_stream());
        assert!(sink.capture().is_none());
    }

    #[test]
    fn reopen_stops_previous_stream() {
        let (webcam, stops) = scripted(true, false);
        let mut sink = VideoSink::new();

        webcam.open(&mut sink).unwrap();
        webcam.open(&mut sink).unwrap();

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(sink.has_stream());
    }
}
