use image::RgbImage;

use crate::MediaStream;

/// Slot a camera stream is attached to, frames are pulled from here.
#[derive(Default)]
pub struct VideoSink {
    stream: Option<MediaStream>,
}

impl VideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Capture the current frame of the attached stream.
    pub fn capture(&mut self) -> Option<RgbImage> {
        let frame = self.stream.as_mut()?.capture();
        if frame.is_none() {
            log::warn!("Attached stream delivered no frame");
        }
        frame
    }

    pub(crate) fn attach(&mut self, stream: MediaStream) {
        self.stream = Some(stream);
    }

    pub(crate) fn detach(&mut self) -> Option<MediaStream> {
        self.stream.take()
    }
}
