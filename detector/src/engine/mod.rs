//! The detection pipeline.
//!
//! One `detect` call walks a frame through preprocessing, inference, decoding, suppression and
//! rendering. Buffers are owned by the stage that produced them and moved into the next one, so
//! a failing stage drops everything allocated so far.
//!
use std::{fmt, time::Duration};

use image::RgbImage;
use ndarray::{Array2, Array4};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{config::DetectionConfig, error::DetectError, meter::METER, sources::FrameSource};

pub mod decode;
pub mod model;
pub mod nms;
pub mod preprocess;
pub mod render;

pub use decode::{decode, transpose_output, Candidates};
pub use model::{load_model, InputShape, ModelHandle, ModelLoader, Network, OnnxLoader};
pub use nms::{suppress, SuppressParams};
pub use preprocess::{preprocess, Preprocessed};
pub use render::{render, Canvas};

/// A kept detection in model input coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// `[y1, x1, y2, x2]`
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_index: usize,
}

/// Detections of one frame, ordered by candidate index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    pub items: Vec<Detection>,
    pub x_ratio: f32,
    pub y_ratio: f32,
    /// Model input `(width, height)` the boxes are expressed in.
    pub input_size: (u32, u32),
}

impl Detections {
    /// Map a box from model input space onto a frame of `width` x `height` pixels.
    ///
    /// The frame was padded to a square of side `width * x_ratio` (equally `height * y_ratio`)
    /// before being resized to the model input, so each axis scales by `side / input`.
    pub fn to_frame(&self, bbox: [f32; 4], width: u32, height: u32) -> [f32; 4] {
        let (input_width, input_height) = self.input_size;
        let scale_x = self.x_ratio * width as f32 / input_width.max(1) as f32;
        let scale_y = self.y_ratio * height as f32 / input_height.max(1) as f32;
        let [y1, x1, y2, x2] = bbox;

        [y1 * scale_y, x1 * scale_x, y2 * scale_y, x2 * scale_x]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Where a `detect` call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Preprocessing,
    Inferring,
    Decoding,
    Suppressing,
    Rendering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Preprocessing => "preprocessing",
            Stage::Inferring => "inferring",
            Stage::Decoding => "decoding",
            Stage::Suppressing => "suppressing",
            Stage::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// How a frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The source ran out of pixel content.
    Ended,
    /// The liveness handle was cancelled.
    Detached,
}

/// Execute the network and lay the output out as one row per candidate.
pub fn run_inference(input: Array4<f32>, model: &ModelHandle) -> Result<Array2<f32>, DetectError> {
    transpose_output(model.execute(input)?)
}

pub struct InferenceEngine {
    params: SuppressParams,
    confidence: f32,
    refresh: Duration,
    stage: Stage,
}

impl InferenceEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            params: SuppressParams::from(config),
            confidence: config.confidence,
            refresh: Duration::from_secs_f64(1.0 / config.refresh_hz.max(1) as f64),
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        log::debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Run the full pipeline on one frame and render the result onto `canvas`.
    pub async fn detect(
        &mut self,
        frame: &RgbImage,
        model: &ModelHandle,
        canvas: &mut Canvas,
    ) -> Result<Detections, DetectError> {
        let result = self.run_stages(frame, model, canvas).await;
        if let Err(err) = &result {
            log::error!("Detection failed while {}: {}", self.stage, err);
        }
        self.enter(Stage::Idle);

        result
    }

    async fn run_stages(
        &mut self,
        frame: &RgbImage,
        model: &ModelHandle,
        canvas: &mut Canvas,
    ) -> Result<Detections, DetectError> {
        self.enter(Stage::Preprocessing);
        let shape = model.input_shape();
        let Preprocessed {
            input,
            x_ratio,
            y_ratio,
        } = preprocess(frame, shape.width as u32, shape.height as u32)?;

        self.enter(Stage::Inferring);
        let rows = run_inference(input, model)?;

        self.enter(Stage::Decoding);
        let candidates = decode(&rows)?;
        drop(rows);

        self.enter(Stage::Suppressing);
        let kept = suppress(&candidates.boxes, &candidates.scores, self.params).await;
        let detections = Detections {
            items: kept
                .into_iter()
                .map(|index| Detection {
                    bbox: candidates.boxes[index],
                    score: candidates.scores[index],
                    class_index: candidates.classes[index],
                })
                .collect(),
            x_ratio,
            y_ratio,
            input_size: (shape.width as u32, shape.height as u32),
        };
        drop(candidates);

        self.enter(Stage::Rendering);
        canvas.resize(frame.width(), frame.height());
        render(canvas, &detections, self.confidence)?;

        Ok(detections)
    }

    /// Detect on every frame of `source` until it runs dry or `liveness` is cancelled.
    ///
    /// Frames are processed strictly one after the other, the next frame is pulled on the
    /// refresh tick after the previous one was handed to `on_rendered`.
    pub async fn detect_video<S, F>(
        &mut self,
        source: &mut S,
        model: &ModelHandle,
        canvas: &mut Canvas,
        liveness: &CancellationToken,
        mut on_rendered: F,
    ) -> Result<LoopExit, DetectError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&RgbImage, &Canvas, &Detections),
    {
        let mut refresh = interval(self.refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames = 0_u64;

        let exit = loop {
            if liveness.is_cancelled() {
                break LoopExit::Detached;
            }
            let frame = match source.next_frame() {
                Some(frame) => frame,
                None => {
                    canvas.clear();
                    break LoopExit::Ended;
                }
            };

            let detections = self.detect(&frame, model, canvas).await?;
            METER.tick_frame(detections.len());
            frames += 1;
            on_rendered(&frame, canvas, &detections);

            tokio::select! {
                _ = liveness.cancelled() => break LoopExit::Detached,
                _ = refresh.tick() => {}
            }
        };
        log::info!("Frame loop stopped after {} frames: {:?}", frames, exit);

        Ok(exit)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use ndarray::{Array3, ArrayD};

    use super::*;
    use crate::sources::AnimatedVideo;

    /// Always reports one person in the top-left quarter of the input.
    struct OnePerson {
        calls: AtomicUsize,
    }

    impl Network for OnePerson {
        fn input_shape(&self) -> InputShape {
            InputShape {
                batch: 1,
                width: 64,
                height: 64,
                channels: 3,
            }
        }

        fn execute(&self, _input: Array4<f32>) -> Result<ArrayD<f32>, DetectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let row = |c: usize| match c {
                0 | 1 => 16.0,
                2 | 3 => 32.0,
                4 => 0.9,
                _ => 0.0,
            };
            Ok(Array3::from_shape_fn((1, 84, 1), |(_, c, _)| row(c)).into_dyn())
        }
    }

    struct Broken;

    impl Network for Broken {
        fn input_shape(&self) -> InputShape {
            InputShape {
                batch: 1,
                width: 32,
                height: 32,
                channels: 3,
            }
        }

        fn execute(&self, _input: Array4<f32>) -> Result<ArrayD<f32>, DetectError> {
            Ok(ArrayD::zeros(vec![1, 3, 8]))
        }
    }

    fn one_person() -> (Arc<OnePerson>, ModelHandle) {
        let net = Arc::new(OnePerson {
            calls: AtomicUsize::new(0),
        });
        (net.clone(), ModelHandle::new(net))
    }

    fn engine() -> InferenceEngine {
        InferenceEngine::new(&DetectionConfig {
            refresh_hz: 1000,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn detect_renders_kept_boxes() {
        let (_, model) = one_person();
        let mut engine = engine();
        let mut canvas = Canvas::new(None);

        let detections = engine
            .detect(&RgbImage::new(64, 64), &model, &mut canvas)
            .await
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections.items[0].bbox, [0.0, 0.0, 32.0, 32.0]);
        assert_eq!(detections.items[0].class_index, 0);
        assert_eq!(canvas.dimensions(), (64, 64));
        assert!(!canvas.is_blank());
        assert_eq!(engine.stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn failed_decode_returns_to_idle() {
        let model = ModelHandle::new(Arc::new(Broken));
        let mut engine = engine();
        let mut canvas = Canvas::new(None);

        let result = engine.detect(&RgbImage::new(8, 8), &model, &mut canvas).await;

        assert!(matches!(result, Err(DetectError::Decode(_))));
        assert_eq!(engine.stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn video_loop_ends_with_source() {
        let (net, model) = one_person();
        let mut engine = engine();
        let mut canvas = Canvas::new(None);
        let mut video = AnimatedVideo::from_frames(vec![RgbImage::new(64, 48); 3]).unwrap();
        let mut rendered = 0;

        let exit = engine
            .detect_video(
                &mut video,
                &model,
                &mut canvas,
                &CancellationToken::new(),
                |_, canvas, _| {
                    assert!(!canvas.is_blank());
                    rendered += 1;
                },
            )
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::Ended);
        assert_eq!(rendered, 3);
        assert_eq!(net.calls.load(Ordering::SeqCst), 3);
        assert!(canvas.is_blank());
    }

    #[tokio::test]
    async fn video_loop_stops_when_detached() {
        let (net, model) = one_person();
        let mut engine = engine();
        let mut canvas = Canvas::new(None);
        let mut video = AnimatedVideo::from_frames(vec![RgbImage::new(64, 48); 10]).unwrap();
        let liveness = CancellationToken::new();

        let exit = engine
            .detect_video(&mut video, &model, &mut canvas, &liveness, |_, _, _| {
                liveness.cancel()
            })
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::Detached);
        assert_eq!(net.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn video_loop_surfaces_frame_errors() {
        let model = ModelHandle::new(Arc::new(Broken));
        let mut engine = engine();
        let mut canvas = Canvas::new(None);
        let mut video = AnimatedVideo::from_frames(vec![RgbImage::new(8, 8); 2]).unwrap();

        let result = engine
            .detect_video(
                &mut video,
                &model,
                &mut canvas,
                &CancellationToken::new(),
                |_, _, _| {},
            )
            .await;

        assert!(matches!(result, Err(DetectError::Decode(_))));
    }
}
