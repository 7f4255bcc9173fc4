//! Video files decoded by FFmpeg.
//!
//! Decoding runs on its own thread; frames are handed over through a bounded channel so the
//! decoder never runs more than a few frames ahead of the detection loop.
use std::{
    path::Path,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::{
    core::context::null_output::create_null_output,
    filter::{
        frame_filter::FrameFilter, frame_filter_context::FrameFilterContext,
        frame_pipeline_builder::FramePipelineBuilder,
    },
    AVMediaType, FfmpegContext, Frame, Input,
};
use image::RgbImage;

use super::FrameSource;
use crate::error::DetectError;

const BUFFERED_FRAMES: usize = 4;

/// Copies every packed RGB frame out of the pipeline.
struct RgbCapture {
    frames: Sender<RgbImage>,
}

impl FrameFilter for RgbCapture {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::debug!("Video decoding started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if frame.as_ptr().is_null() || frame.is_empty() {
            return Ok(None);
        }

        // SAFETY: the frame is non-null and owned by this call; the `format=rgb24` filter
        // guarantees one packed plane of `height` rows, each `linesize` bytes long.
        let image = unsafe {
            let raw = &*frame.as_ptr();
            let (width, height) = (raw.width as usize, raw.height as usize);
            let stride = raw.linesize[0] as usize;
            if raw.data[0].is_null() || width == 0 || height == 0 || stride < width * 3 {
                return Ok(None);
            }

            let mut pixels = Vec::with_capacity(width * height * 3);
            for row in 0..height {
                let line = std::slice::from_raw_parts(raw.data[0].add(row * stride), width * 3);
                pixels.extend_from_slice(line);
            }
            RgbImage::from_raw(width as u32, height as u32, pixels)
        };

        match image {
            Some(image) => self
                .frames
                .send(image)
                .map(|_| None)
                .map_err(|_| "frame receiver dropped".to_owned()),
            None => Ok(None),
        }
    }
}

/// A video file played once, in any container and codec FFmpeg can read.
pub struct FfmpegVideo {
    frames: Receiver<RgbImage>,
    decoder: Option<JoinHandle<()>>,
}

impl FfmpegVideo {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DetectError::SourceLoad(format!("{}: no such file", path.display())));
        }
        let url = path.to_string_lossy().into_owned();
        let (frame_tx, frames) = bounded(BUFFERED_FRAMES);
        let (ready_tx, ready) = bounded::<Result<(), String>>(1);

        let decoder = thread::Builder::new()
            .name("video-decoder".into())
            .spawn(move || decode(&url, frame_tx, ready_tx))
            .map_err(|err| DetectError::SourceLoad(err.to_string()))?;

        match ready.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(DetectError::SourceLoad(format!("{}: {}", path.display(), err)))
            }
            Err(_) => {
                return Err(DetectError::SourceLoad(format!(
                    "{}: decoder exited early",
                    path.display()
                )))
            }
        }
        log::debug!("Decoding {} with FFmpeg", path.display());

        Ok(Self {
            frames,
            decoder: Some(decoder),
        })
    }
}

fn decode(url: &str, frames: Sender<RgbImage>, ready: Sender<Result<(), String>>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb-capture", Box::new(RgbCapture { frames }));
    let out = create_null_output().add_frame_pipeline(pipe);

    let started = FfmpegContext::builder()
        .input(Input::new(url))
        .filter_descs(["format=rgb24"].into())
        .output(out)
        .build()
        .map_err(|err| format!("build failed: {}", err))
        .and_then(|ctx| ctx.start().map_err(|err| format!("start failed: {}", err)));

    match started {
        Ok(scheduler) => {
            let _ = ready.send(Ok(()));
            if let Err(err) = scheduler.wait() {
                log::debug!("Video decoding stopped: {}", err);
            }
        }
        Err(err) => {
            let _ = ready.send(Err(err));
        }
    }
}

impl FrameSource for FfmpegVideo {
    fn next_frame(&mut self) -> Option<RgbImage> {
        self.frames.recv().ok()
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        // The capture filter fails its next send once the receiver is gone.
        let (_, closed) = bounded(0);
        drop(std::mem::replace(&mut self.frames, closed));
        if let Some(decoder) = self.decoder.take() {
            if decoder.join().is_err() {
                log::warn!("Video decoder thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_is_source_load_error() {
        let result = FfmpegVideo::open("/nonexistent/clip.mp4");
        assert!(matches!(result, Err(DetectError::SourceLoad(_))));
    }

    #[test]
    fn garbage_file_is_source_load_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("garbage-{}.mp4", std::process::id()));
        std::fs::write(&path, b"definitely not a video container")?;

        let result = FfmpegVideo::open(&path);
        std::fs::remove_file(&path)?;

        assert!(matches!(result, Err(DetectError::SourceLoad(_))));
        Ok(())
    }
}
