//! Class labels and the drawing palette.
//!
use crate::error::DetectError;

/// COCO class names, indexed by the class channel of the model output.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Box colors, picked by `class_index % PALETTE.len()`.
pub const PALETTE: [[u8; 3]; 12] = [
    [0xFF, 0x63, 0x84],
    [0x36, 0xA2, 0xEB],
    [0xFF, 0xCE, 0x56],
    [0x4B, 0xC0, 0xC0],
    [0x99, 0x66, 0xFF],
    [0xFF, 0x9F, 0x40],
    [0xFF, 0x63, 0x84],
    [0xC9, 0xCB, 0xCF],
    [0x4B, 0xC0, 0xC0],
    [0xFF, 0x63, 0x84],
    [0x36, 0xA2, 0xEB],
    [0xFF, 0xCE, 0x56],
];

/// Look up the name of a class.
pub fn class_name(class_index: usize) -> Result<&'static str, DetectError> {
    COCO_LABELS.get(class_index).copied().ok_or_else(|| {
        DetectError::Decode(format!(
            "class index {} outside of the {} known labels",
            class_index,
            COCO_LABELS.len()
        ))
    })
}

pub fn class_color(class_index: usize) -> [u8; 3] {
    PALETTE[class_index % PALETTE.len()]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_in_range() {
        assert_eq!(class_name(0).unwrap(), "person");
        assert_eq!(class_name(79).unwrap(), "toothbrush");
    }

    #[test]
    fn lookup_out_of_range_is_decode_error() {
        assert!(matches!(class_name(80), Err(DetectError::Decode(_))));
    }

    #[test]
    fn colors_wrap_around_palette() {
        assert_eq!(class_color(0), [0xFF, 0x63, 0x84]);
        assert_eq!(class_color(13), class_color(1));
    }
}
