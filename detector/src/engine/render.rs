//! Drawing detections onto the overlay canvas.
//!
use std::path::Path;

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::{
    engine::Detections,
    error::DetectError,
    labels::{class_color, class_name},
};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const STROKE_WIDTH: i32 = 2;
const MIN_FONT_PX: u32 = 14;
/// Advance per character assumed when no font is available.
const FALLBACK_ADVANCE: f32 = 0.6;

/// Overlay raster the detections are drawn on, sized like the frame it belongs to.
pub struct Canvas {
    raster: RgbaImage,
    font: Option<Font<'static>>,
}

impl Canvas {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self {
            raster: RgbaImage::new(0, 0),
            font,
        }
    }

    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        Self::new(load_font(path.as_ref()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Match the frame size. Resizing drops the previous content.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.raster.dimensions() != (width, height) {
            log::debug!("Canvas resized to {}x{}", width, height);
            self.raster = RgbaImage::new(width, height);
        }
    }

    pub fn clear(&mut self) {
        for pixel in self.raster.pixels_mut() {
            *pixel = TRANSPARENT;
        }
    }

    pub fn is_blank(&self) -> bool {
        self.raster.pixels().all(|pixel| pixel[3] == 0)
    }

    /// Blend the overlay over a frame of the same size.
    pub fn composite_onto(&self, frame: &RgbImage) -> RgbImage {
        let mut out = frame.clone();
        let (width, height) = self.raster.dimensions();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if x >= width || y >= height {
                continue;
            }
            let overlay = self.raster.get_pixel(x, y);
            let alpha = overlay[3] as u32;
            if alpha == 0 {
                continue;
            }
            let blend = |top: u8, bottom: u8| {
                ((top as u32 * alpha + bottom as u32 * (255 - alpha)) / 255) as u8
            };
            *pixel = Rgb([
                blend(overlay[0], pixel[0]),
                blend(overlay[1], pixel[1]),
                blend(overlay[2], pixel[2]),
            ]);
        }

        out
    }

    fn font_px(&self) -> u32 {
        let (width, height) = self.raster.dimensions();
        ((width.max(height) as f32 / 40.0).round() as u32).max(MIN_FONT_PX)
    }

    fn text_width(&self, text: &str, px: u32) -> i32 {
        match &self.font {
            Some(font) => text_size(Scale::uniform(px as f32), font, text).0,
            None => (text.chars().count() as f32 * px as f32 * FALLBACK_ADVANCE).ceil() as i32,
        }
    }
}

/// Load a TrueType font, `None` when the file is missing or unreadable.
pub fn load_font(path: &Path) -> Option<Font<'static>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            log::warn!("Unable to read font {}: {}", path.display(), err);
            return None;
        }
    };
    let font = Font::try_from_vec(data);
    if font.is_none() {
        log::warn!("{} is not a usable font", path.display());
    }

    font
}

/// Clear the canvas and draw every detection at or above `confidence`.
pub fn render(
    canvas: &mut Canvas,
    detections: &Detections,
    confidence: f32,
) -> Result<(), DetectError> {
    canvas.clear();
    let px = canvas.font_px();
    let (canvas_width, canvas_height) = canvas.dimensions();

    for detection in detections.items.iter() {
        let score = detection.score * 100.0;
        if score < confidence * 100.0 {
            continue;
        }

        let name = class_name(detection.class_index)?;
        let [r, g, b] = class_color(detection.class_index);
        let color = Rgba([r, g, b, 255]);

        let [y1, x1, y2, x2] =
            detections.to_frame(detection.bbox, canvas_width, canvas_height);
        let (left, top) = (x1.round() as i32, y1.round() as i32);
        let (width, height) = ((x2 - x1).round() as i32, (y2 - y1).round() as i32);

        stroke_rect(&mut canvas.raster, left, top, width, height, color);

        let label = format!("{} {:.1}%", name, score);
        let label_width = canvas.text_width(&label, px) + 10;
        let label_height = px as i32 + 4;
        draw_filled_rect_mut(
            &mut canvas.raster,
            Rect::at(left, top).of_size(label_width.max(1) as u32, label_height as u32),
            color,
        );

        if let Some(font) = &canvas.font {
            draw_text_mut(
                &mut canvas.raster,
                TEXT_COLOR,
                left + 5,
                top + 2,
                Scale::uniform(px as f32),
                font,
                &label,
            );
        }
    }

    Ok(())
}

/// A stroke of `STROKE_WIDTH` pixels centered on the rectangle outline.
fn stroke_rect(raster: &mut RgbaImage, left: i32, top: i32, width: i32, height: i32, color: Rgba<u8>) {
    let half = STROKE_WIDTH / 2;
    for inset in 0..STROKE_WIDTH {
        let offset = inset - half;
        let rect_width = (width - 2 * offset).max(1) as u32;
        let rect_height = (height - 2 * offset).max(1) as u32;
        draw_hollow_rect_mut(
            raster,
            Rect::at(left + offset, top + offset).of_size(rect_width, rect_height),
            color,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Detection;

    const PERSON: Rgba<u8> = Rgba([0xFF, 0x63, 0x84, 255]);

    fn detections(items: Vec<Detection>) -> Detections {
        Detections {
            items,
            x_ratio: 1.0,
            y_ratio: 1.0,
            input_size: (400, 400),
        }
    }

    fn person(score: f32) -> Detection {
        Detection {
            bbox: [100.0, 100.0, 300.0, 300.0],
            score,
            class_index: 0,
        }
    }

    #[test]
    fn draws_box_and_label_background() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);

        render(&mut canvas, &detections(vec![person(0.9)]), 0.2).unwrap();
        let raster = canvas.raster();

        assert_eq!(*raster.get_pixel(99, 200), PERSON);
        assert_eq!(*raster.get_pixel(100, 200), PERSON);
        assert_eq!(*raster.get_pixel(300, 200), PERSON);
        assert_eq!(*raster.get_pixel(200, 101), PERSON);
        assert_eq!(*raster.get_pixel(200, 200), TRANSPARENT);
        assert_eq!(*raster.get_pixel(150, 50), TRANSPARENT);
    }

    #[test]
    fn label_background_size_without_font() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);

        render(&mut canvas, &detections(vec![person(0.9)]), 0.2).unwrap();
        let raster = canvas.raster();

        // "person 90.0%" is 12 characters at 14 px: 101 px of text plus padding
        assert_eq!(*raster.get_pixel(210, 117), PERSON);
        assert_eq!(*raster.get_pixel(212, 110), TRANSPARENT);
        assert_eq!(*raster.get_pixel(150, 119), TRANSPARENT);
    }

    #[test]
    fn boxes_map_onto_source_pixels() {
        // A 400x200 frame padded to 400x400 and fed to a 200x200 model
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 200);
        let scaled = Detections {
            items: vec![Detection {
                bbox: [50.0, 50.0, 100.0, 100.0],
                score: 0.9,
                class_index: 0,
            }],
            x_ratio: 1.0,
            y_ratio: 2.0,
            input_size: (200, 200),
        };

        render(&mut canvas, &scaled, 0.2).unwrap();
        let raster = canvas.raster();

        assert_eq!(*raster.get_pixel(99, 150), PERSON);
        assert_eq!(*raster.get_pixel(200, 150), PERSON);
        assert_eq!(*raster.get_pixel(150, 199), PERSON);
        assert_eq!(*raster.get_pixel(150, 150), TRANSPARENT);
        assert_eq!(*raster.get_pixel(49, 75), TRANSPARENT);
    }

    #[test]
    fn to_frame_scales_each_axis() {
        let landscape = Detections {
            items: vec![],
            x_ratio: 1.0,
            y_ratio: 1280.0 / 720.0,
            input_size: (640, 640),
        };
        let mapped = landscape.to_frame([160.0, 460.0, 200.0, 500.0], 1280, 720);
        for (got, want) in mapped.iter().zip([320.0, 920.0, 400.0, 1000.0]) {
            assert!((got - want).abs() < 1e-3, "{:?}", mapped);
        }
    }

    #[test]
    fn below_confidence_is_not_drawn() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);
        render(&mut canvas, &detections(vec![person(0.19)]), 0.2).unwrap();
        assert!(canvas.is_blank());
    }

    #[test]
    fn render_clears_previous_content() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);
        render(&mut canvas, &detections(vec![person(0.9)]), 0.2).unwrap();
        assert!(!canvas.is_blank());

        render(&mut canvas, &detections(vec![]), 0.2).unwrap();
        assert!(canvas.is_blank());
    }

    #[test]
    fn unknown_class_is_decode_error() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);
        let mut unknown = person(0.9);
        unknown.class_index = 80;
        assert!(matches!(
            render(&mut canvas, &detections(vec![unknown]), 0.2),
            Err(DetectError::Decode(_))
        ));
    }

    #[test]
    fn font_size_scales_with_canvas() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 300);
        assert_eq!(canvas.font_px(), 14);
        canvas.resize(1280, 720);
        assert_eq!(canvas.font_px(), 32);
    }

    #[test]
    fn composite_keeps_transparent_pixels() {
        let mut canvas = Canvas::new(None);
        canvas.resize(400, 400);
        render(&mut canvas, &detections(vec![person(0.9)]), 0.2).unwrap();
        let frame = RgbImage::from_pixel(400, 400, Rgb([10, 20, 30]));

        let out = canvas.composite_onto(&frame);

        assert_eq!(*out.get_pixel(200, 200), Rgb([10, 20, 30]));
        assert_eq!(*out.get_pixel(99, 200), Rgb([0xFF, 0x63, 0x84]));
    }

    #[test]
    fn missing_font_file() {
        let canvas = Canvas::with_font_file("/nonexistent/font.ttf");
        assert!(!canvas.has_font());
    }
}
