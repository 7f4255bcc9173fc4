//! Raw model output to candidate boxes.
//!
//! The network emits `[1, 4 + C, N]`: four box channels `cx, cy, w, h` followed by one score
//! channel per class, for `N` candidates in model input coordinates. Scores are taken as they
//! come, no activation is applied.
use ndarray::{Array2, ArrayD, Axis, Ix3};

use crate::{error::DetectError, labels::COCO_LABELS};

/// Decoded candidates, one entry per model candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    /// `[y1, x1, y2, x2]`
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub classes: Vec<usize>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Transpose `[1, 4 + C, N]` into one row per candidate, `[N, 4 + C]`.
pub fn transpose_output(raw: ArrayD<f32>) -> Result<Array2<f32>, DetectError> {
    let shape = raw.shape().to_vec();
    let raw = raw
        .into_dimensionality::<Ix3>()
        .map_err(|_| DetectError::Decode(format!("expected [1, 4+C, N] output, got {:?}", shape)))?;
    if raw.len_of(Axis(0)) != 1 {
        return Err(DetectError::Decode(format!(
            "expected a batch of one, got {:?}",
            shape
        )));
    }

    Ok(raw.index_axis_move(Axis(0), 0).reversed_axes())
}

/// Convert candidate rows `[cx, cy, w, h, s_0..s_C]` into boxes, best scores and classes.
pub fn decode(rows: &Array2<f32>) -> Result<Candidates, DetectError> {
    let columns = rows.ncols();
    if columns < 5 {
        return Err(DetectError::Decode(format!(
            "candidate rows need at least 5 columns, got {}",
            columns
        )));
    }

    let mut candidates = Candidates {
        boxes: Vec::with_capacity(rows.nrows()),
        scores: Vec::with_capacity(rows.nrows()),
        classes: Vec::with_capacity(rows.nrows()),
    };

    for row in rows.rows() {
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let x1 = cx - w / 2.0;
        let y1 = cy - h / 2.0;
        candidates.boxes.push([y1, x1, y1 + h, x1 + w]);

        let (class_index, score) = row
            .iter()
            .skip(4)
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (index, &score)| {
                if score > best.1 {
                    (index, score)
                } else {
                    best
                }
            });
        if class_index >= COCO_LABELS.len() {
            return Err(DetectError::Decode(format!(
                "class index {} outside of the {} known labels",
                class_index,
                COCO_LABELS.len()
            )));
        }
        candidates.scores.push(score);
        candidates.classes.push(class_index);
    }

    Ok(candidates)
}
