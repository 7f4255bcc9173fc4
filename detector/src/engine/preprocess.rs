//! Turn a frame into a model input.
//!
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;

use crate::error::DetectError;

/// Model input together with the factors mapping model space back to the source.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// `[1, model_height, model_width, 3]`, values in `[0, 1]`.
    pub input: Array4<f32>,
    pub x_ratio: f32,
    pub y_ratio: f32,
}

/// Pad the frame to a square on the bottom/right, resize it to the model size and normalize.
pub fn preprocess(
    frame: &RgbImage,
    model_width: u32,
    model_height: u32,
) -> Result<Preprocessed, DetectError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectError::SourceLoad("frame has no pixel content".into()));
    }
    if model_width == 0 || model_height == 0 {
        return Err(DetectError::ModelLoad(format!(
            "invalid model input size {}x{}",
            model_width, model_height
        )));
    }

    let side = width.max(height);
    let resized = {
        // Zero-filled, so the source lands in the top-left corner
        let mut square = RgbImage::new(side, side);
        imageops::replace(&mut square, frame, 0, 0);
        imageops::resize(&square, model_width, model_height, FilterType::Triangle)
    };

    let input = Array4::from_shape_fn(
        (1, model_height as usize, model_width as usize, 3),
        |(_, y, x, c)| resized[(x as u32, y as u32)][c] as f32 / 255.0,
    );

    Ok(Preprocessed {
        input,
        x_ratio: side as f32 / width as f32,
        y_ratio: side as f32 / height as f32,
    })
}
