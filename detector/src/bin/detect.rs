use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detector::{meter::spawn_meter_logger, Canvas, DetectionConfig, Detections, Detector};
use env_logger::TimestampPrecision;
use image::RgbImage;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    #[clap(subcommand)]
    source: Source,

    /// Model to load from `<origin>/models/<name>_web_model/model.onnx`
    #[clap(long, default_value = detector::config::MODEL_NAME)]
    model_name: String,

    /// Directory or http(s) URL the models are served from
    #[clap(long, default_value = ".")]
    model_origin: String,

    /// Minimum score of a drawn detection
    #[clap(long, default_value_t = detector::config::CONFIDENCE_THRESHOLD)]
    confidence: f32,

    /// Overlap above which the weaker of two boxes is suppressed
    #[clap(long, default_value_t = detector::config::IOU_THRESHOLD)]
    iou_threshold: f32,

    /// Maximum number of boxes per frame
    #[clap(long, default_value_t = detector::config::MAX_BOXES)]
    max_boxes: usize,

    /// Square input size for models without a fixed input shape
    #[clap(long)]
    input_size: Option<u32>,

    /// TrueType font used for labels
    #[clap(long, default_value = detector::config::DEFAULT_FONT_PATH)]
    font: PathBuf,

    /// Frame loop rate
    #[clap(long, default_value_t = detector::config::DEFAULT_REFRESH_HZ)]
    refresh_hz: u32,

    /// Directory annotated frames are written to
    #[clap(long, default_value = "detections")]
    output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Detect on a still image
    Image { path: PathBuf },
    /// Detect on every frame of a GIF, or any video file with the `ffmpeg` feature
    Video { path: PathBuf },
    /// Detect on the webcam stream until Ctrl-C
    Webcam,
}

impl Args {
    fn config(&self) -> DetectionConfig {
        DetectionConfig {
            model_name: self.model_name.clone(),
            model_origin: self.model_origin.clone(),
            confidence: self.confidence,
            iou_threshold: self.iou_threshold,
            max_boxes: self.max_boxes,
            input_size: self.input_size,
            font_path: self.font.clone(),
            refresh_hz: self.refresh_hz,
            ..Default::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Creating {}", args.output.display()))?;

    let mut detector = Detector::new(args.config());
    detector.initialize_model().await?;

    let liveness = detector.liveness();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Stopping on Ctrl-C");
            liveness.cancel();
        }
    });
    spawn_meter_logger();

    let mut written = 0_usize;
    let mut write_error = None;
    let output = args.output.clone();
    let mut on_rendered = |frame: &RgbImage, canvas: &Canvas, detections: &Detections| {
        let name = match args.source {
            Source::Webcam => "latest.png".to_owned(),
            _ => format!("frame-{:05}.png", written),
        };
        log::debug!("{} detections in {}", detections.len(), name);
        if let Err(err) = save_overlay(&output.join(name), frame, canvas) {
            write_error.get_or_insert(err);
        }
        written += 1;
    };

    match &args.source {
        Source::Image { path } => {
            let detections = detector.detect_on_image(path, &mut on_rendered).await?;
            log::info!("Found {} objects in {}", detections.len(), path.display());
        }
        Source::Video { path } => {
            let exit = detector.detect_on_video(path, &mut on_rendered).await?;
            log::info!("Video finished: {:?}", exit);
        }
        Source::Webcam => {
            let exit = detector.start_webcam(&mut on_rendered).await?;
            log::info!("Webcam finished: {:?}", exit);
        }
    }
    detector.cleanup();

    if let Some(err) = write_error {
        return Err(err);
    }
    log::info!("Wrote {} frames to {}", written, args.output.display());

    Ok(())
}

fn save_overlay(path: &Path, frame: &RgbImage, canvas: &Canvas) -> Result<()> {
    canvas
        .composite_onto(frame)
        .save(path)
        .with_context(|| format!("Writing {}", path.display()))
}
