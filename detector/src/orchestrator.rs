//! Sequencing of model loading, sources and detection.
//!
//! The `Detector` owns everything a detection session needs: the model, the canvas, the camera
//! and the state that observers subscribe to. Detection requests are rejected until the model is
//! loaded, and only one source is active at any time.
use std::{
    fs,
    path::{Path, PathBuf},
};

use image::RgbImage;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use webcam::{CameraConfig, VideoSink, Webcam};

use crate::{
    config::DetectionConfig,
    engine::{load_model, Canvas, Detections, InferenceEngine, LoopExit, ModelHandle, ModelLoader, OnnxLoader},
    error::DetectError,
    object_url::ObjectUrlRegistry,
    sources::{open_video, StillImage},
    state::{StateStore, StreamKind},
    utils::{cached_model_path, download_file},
};

pub struct Detector {
    config: DetectionConfig,
    engine: InferenceEngine,
    loader: Box<dyn ModelLoader>,
    model: Option<ModelHandle>,
    canvas: Canvas,
    webcam: Webcam,
    sink: VideoSink,
    urls: ObjectUrlRegistry,
    state: StateStore,
    liveness: CancellationToken,
    client: Client,
}

impl Detector {
    /// A detector loading ONNX models and using the compiled-in camera backend.
    pub fn new(config: DetectionConfig) -> Self {
        let loader = OnnxLoader {
            input_size: config.input_size,
        };
        let canvas = Canvas::with_font_file(&config.font_path);

        Self {
            engine: InferenceEngine::new(&config),
            loader: Box::new(loader),
            model: None,
            canvas,
            webcam: Webcam::new(CameraConfig::default()),
            sink: VideoSink::new(),
            urls: ObjectUrlRegistry::new(),
            state: StateStore::new(),
            liveness: CancellationToken::new(),
            client: Client::new(),
            config,
        }
    }

    pub fn with_loader(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_webcam(mut self, webcam: Webcam) -> Self {
        self.webcam = webcam;
        self
    }

    pub fn with_canvas(mut self, canvas: Canvas) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn object_urls(&self) -> &ObjectUrlRegistry {
        &self.urls
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn is_camera_open(&self) -> bool {
        self.sink.has_stream()
    }

    /// Cancellation handle of the current session. Cancelling it detaches the active source.
    pub fn liveness(&mut self) -> CancellationToken {
        if self.liveness.is_cancelled() {
            self.liveness = CancellationToken::new();
        }
        self.liveness.clone()
    }

    /// Load and warm up the model unless it is ready or already loading.
    pub async fn initialize_model(&mut self) -> Result<(), DetectError> {
        if self.model.is_some() || self.state.is_model_loading() {
            return Ok(());
        }
        self.state.clear_error();
        self.state.set_model_loading(0.0);

        match self.load().await {
            Ok(handle) => {
                self.state.set_model(handle.input_shape());
                self.model = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.state.set_model_failed();
                Err(self.report("Unable to load model", err))
            }
        }
    }

    async fn load(&self) -> Result<ModelHandle, DetectError> {
        let state = &self.state;
        if !self.config.is_remote() {
            let path = PathBuf::from(self.config.model_path());
            return load_model(self.loader.as_ref(), &path, &mut |progress| {
                state.set_model_loading(progress)
            });
        }

        let cached = cached_model_path(&self.config);
        if cached.exists() {
            log::info!("Using cached model {}", cached.display());
        } else {
            download_file(
                &self.client,
                &self.config.model_path(),
                &cached,
                &mut |progress| state.set_model_loading(progress * 0.5),
            )
            .await?;
        }

        let loaded = load_model(self.loader.as_ref(), &cached, &mut |progress| {
            state.set_model_loading(0.5 + progress * 0.5)
        });
        if loaded.is_err() {
            // Fetch again on the next attempt
            log::warn!("Discarding unusable cached model {}", cached.display());
            if let Err(err) = fs::remove_file(&cached) {
                log::warn!("Unable to remove {}: {}", cached.display(), err);
            }
        }

        loaded
    }

    fn ready_model(&self) -> Result<ModelHandle, DetectError> {
        match &self.model {
            Some(model) if self.state.is_model_ready() => Ok(model.clone()),
            _ => Err(DetectError::ModelNotReady),
        }
    }

    /// Detect objects on a still image.
    pub async fn detect_on_image<F>(
        &mut self,
        path: impl AsRef<Path>,
        mut on_rendered: F,
    ) -> Result<Detections, DetectError>
    where
        F: FnMut(&RgbImage, &Canvas, &Detections),
    {
        let model = self.ready_model()?;
        self.release_source();

        let url = self.urls.create(path);
        let image = match StillImage::open(url.path()) {
            Ok(image) => image,
            Err(err) => {
                url.revoke();
                return Err(self.report("Unable to load image", err));
            }
        };
        let result = self
            .engine
            .detect(image.image(), &model, &mut self.canvas)
            .await;
        url.revoke();

        match result {
            Ok(detections) => {
                self.state.set_stream(StreamKind::Image);
                on_rendered(image.image(), &self.canvas, &detections);
                Ok(detections)
            }
            Err(err) => Err(self.report("Failed to detect objects", err)),
        }
    }

    /// Detect objects on every frame of a video file until it ends or is detached.
    pub async fn detect_on_video<F>(
        &mut self,
        path: impl AsRef<Path>,
        on_rendered: F,
    ) -> Result<LoopExit, DetectError>
    where
        F: FnMut(&RgbImage, &Canvas, &Detections),
    {
        let model = self.ready_model()?;
        self.release_source();

        let url = self.urls.create(path);
        let mut video = match open_video(url.path()) {
            Ok(video) => video,
            Err(err) => {
                url.revoke();
                return Err(self.report("Unable to load video", err));
            }
        };
        self.state.set_stream(StreamKind::Video);

        let liveness = self.liveness();
        let result = self
            .engine
            .detect_video(video.as_mut(), &model, &mut self.canvas, &liveness, on_rendered)
            .await;
        drop(video);
        url.revoke();
        self.state.reset_stream();

        result.map_err(|err| self.report("Failed to detect objects", err))
    }

    /// Open the camera and detect on its frames until the stream stops or is detached.
    pub async fn start_webcam<F>(&mut self, on_rendered: F) -> Result<LoopExit, DetectError>
    where
        F: FnMut(&RgbImage, &Canvas, &Detections),
    {
        let model = self.ready_model()?;
        self.release_source();

        if let Err(err) = self.webcam.open(&mut self.sink) {
            return Err(self.report("Unable to open webcam", err.into()));
        }
        self.state.set_stream(StreamKind::Camera);

        let liveness = self.liveness();
        let result = self
            .engine
            .detect_video(&mut self.sink, &model, &mut self.canvas, &liveness, on_rendered)
            .await;
        self.stop_webcam();

        result.map_err(|err| self.report("Failed to detect objects", err))
    }

    /// Close the camera. Safe to call without an open camera.
    pub fn stop_webcam(&mut self) {
        self.webcam.close(&mut self.sink);
        self.state.reset_stream();
    }

    /// Release the active source and forget the stream.
    pub fn cleanup(&mut self) {
        self.release_source();
        self.canvas.clear();
    }

    fn release_source(&mut self) {
        self.webcam.close(&mut self.sink);
        if self.state.stream_kind().is_some() {
            self.state.reset_stream();
        }
    }

    /// Log the failure and publish it as user-facing message.
    fn report(&self, action: &str, err: DetectError) -> DetectError {
        let message = format!("{}: {}", action, err);
        log::error!("{}", message);
        self.state.set_error(message);
        err
    }
}
