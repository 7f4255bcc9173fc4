//! Video4Linux camera backend.
//!
use std::path::Path;

use image::{ImageFormat, RgbImage};
use rscam::{Camera, Config};

use crate::{CameraBackend, CameraConfig, MediaStream, StreamInfo, WebcamError};

/// Cameras exposed as `/dev/video*` device nodes.
pub struct V4lBackend;

impl CameraBackend for V4lBackend {
    fn is_available(&self, config: &CameraConfig) -> bool {
        Path::new(&config.device).exists()
    }

    fn start(&self, config: &CameraConfig) -> Result<MediaStream, WebcamError> {
        let mut cam = Camera::new(&config.device).map_err(device_access)?;
        log_supported_formats(&cam, &config.format);
        let format = config.format.as_bytes();

        log::info!("Using camera {}", &config.device);

        let resolution = match config.resolution {
            Some(ideal) if supports_resolution(&cam, format, ideal)? => ideal,
            _ => get_max_resolution(&cam, format)?,
        };

        let frame_rate = config
            .frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })
        .map_err(device_access)?;

        let decode = frame_decoder(&config.format, resolution)?;
        let device = config.device.clone();
        let capture = move || match cam.capture() {
            Ok(frame) => decode(&frame[..]),
            Err(err) => {
                log::error!("Error capturing frame from {}: {}", &device, err);
                None
            }
        };

        Ok(MediaStream::new(
            StreamInfo {
                device: config.device.clone(),
                resolution,
                frame_rate,
            },
            Box::new(capture),
        ))
    }
}

fn device_access(err: impl std::fmt::Display) -> WebcamError {
    WebcamError::DeviceAccess(err.to_string())
}

type DecodeFn = Box<dyn Fn(&[u8]) -> Option<RgbImage> + Send>;

/// Get a decoder turning raw frames of the given fourcc into RGB images.
fn frame_decoder(format: &str, (width, height): (u32, u32)) -> Result<DecodeFn, WebcamError> {
    match format {
        "MJPG" => Ok(Box::new(|data: &[u8]| {
            image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|err| log::warn!("Dropping undecodable frame: {}", err))
                .ok()
                .map(|image| image.to_rgb8())
        })),
        "RGB3" => Ok(Box::new(move |data: &[u8]| {
            RgbImage::from_raw(width, height, data.to_vec())
        })),
        other => Err(WebcamError::Unsupported(format!(
            "frame format {} cannot be decoded",
            other
        ))),
    }
}

fn supports_resolution(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<bool, WebcamError> {
    let resolution_info = cam.resolutions(format).map_err(device_access)?;
    Ok(match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions.contains(&resolution),
        rscam::ResolutionInfo::Stepwise { min, max, step: _ } => {
            (min.0..=max.0).contains(&resolution.0) && (min.1..=max.1).contains(&resolution.1)
        }
    })
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), WebcamError> {
    let resolution_info = cam.resolutions(format).map_err(device_access)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Get the highest resolution in terms of number of pixels
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| WebcamError::DeviceAccess("no resolution found".to_owned()))
}

/// Get the fastest supported frame interval for the given format and resolution.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), WebcamError> {
    let interval_info = cam
        .intervals(format, resolution)
        .map_err(device_access)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            // Intervals are seconds per frame, the smallest one is the fastest
            .min_by(|a, b| (a.0 as u64 * b.1 as u64).cmp(&(b.0 as u64 * a.1 as u64)))
            .copied(),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| WebcamError::DeviceAccess("no frame rate found".to_owned()))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(Result::ok).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn get_cam_info_if_available() -> Result<(), WebcamError> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let format = b"MJPG";
                let selected_resolution = get_max_resolution(&cam, format)?;
                let frame_rate = get_max_frame_rate(&cam, format, selected_resolution)?;
                println!("Selected {selected_resolution:?} at {frame_rate:?}");
            }
        }

        Ok(())
    }

    #[test]
    fn unknown_fourcc_is_unsupported() {
        assert!(matches!(
            frame_decoder("YUYV", (2, 2)),
            Err(WebcamError::Unsupported(_))
        ));
    }

    #[test]
    fn raw_rgb_frames_are_decoded() {
        let decode = frame_decoder("RGB3", (2, 1)).unwrap();
        let image = decode(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [4, 5, 6]);
    }
}
