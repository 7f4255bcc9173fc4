//! Frame sources: still images, video files and camera sinks.
//!
use std::{fs::File, io::BufReader, path::Path};

use image::{codecs::gif::GifDecoder, AnimationDecoder, DynamicImage, RgbImage};
use webcam::VideoSink;

use crate::error::DetectError;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegVideo;

/// Anything frames can be pulled from.
pub trait FrameSource {
    /// The current frame, `None` once the source has no pixel content.
    fn next_frame(&mut self) -> Option<RgbImage>;
}

/// A decoded still image. Every pull returns the same frame.
#[derive(Debug, Clone)]
pub struct StillImage {
    image: RgbImage,
}

impl StillImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectError> {
        let image = image::open(path.as_ref())?.to_rgb8();
        log::debug!(
            "Decoded image {} ({}x{})",
            path.as_ref().display(),
            image.width(),
            image.height()
        );
        Ok(Self::from(image))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl From<RgbImage> for StillImage {
    fn from(image: RgbImage) -> Self {
        Self { image }
    }
}

impl FrameSource for StillImage {
    fn next_frame(&mut self) -> Option<RgbImage> {
        Some(self.image.clone())
    }
}

/// Frames of an animated GIF, played once.
#[derive(Debug, Clone)]
pub struct AnimatedVideo {
    frames: Vec<RgbImage>,
    position: usize,
}

impl AnimatedVideo {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| DetectError::SourceLoad(format!("{}: {}", path.display(), err)))?;
        let decoder = GifDecoder::new(BufReader::new(file))?;
        let frames: Vec<RgbImage> = decoder
            .into_frames()
            .collect_frames()?
            .into_iter()
            .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8())
            .collect();
        log::debug!("Decoded {} frames from {}", frames.len(), path.display());

        Self::from_frames(frames)
    }

    pub fn from_frames(frames: Vec<RgbImage>) -> Result<Self, DetectError> {
        if frames.is_empty() {
            return Err(DetectError::SourceLoad("video has no frames".into()));
        }
        Ok(Self {
            frames,
            position: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn has_ended(&self) -> bool {
        self.position >= self.frames.len()
    }
}

impl FrameSource for AnimatedVideo {
    fn next_frame(&mut self) -> Option<RgbImage> {
        let frame = self.frames.get(self.position).cloned();
        self.position += 1;
        frame
    }
}

/// Open a video file: GIFs are decoded in-process, everything else needs the `ffmpeg` feature.
pub fn open_video(path: impl AsRef<Path>) -> Result<Box<dyn FrameSource>, DetectError> {
    let path = path.as_ref();
    let is_gif = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gif"))
        .unwrap_or(false);
    if is_gif {
        return Ok(Box::new(AnimatedVideo::open(path)?));
    }

    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(FfmpegVideo::open(path)?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(DetectError::SourceLoad(format!(
            "{}: unsupported video format, build with the `ffmpeg` feature",
            path.display()
        )))
    }
}

impl FrameSource for VideoSink {
    fn next_frame(&mut self) -> Option<RgbImage> {
        self.capture()
    }
}
