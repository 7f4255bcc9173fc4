//! Greedy non-maximum suppression.
//!
use crate::config::DetectionConfig;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressParams {
    pub iou_threshold: f32,
    pub score_threshold: f32,
    pub max_boxes: usize,
}

impl From<&DetectionConfig> for SuppressParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            score_threshold: config.score_threshold,
            max_boxes: config.max_boxes,
        }
    }
}

/// Run non-maximum suppression on candidate bounding boxes.
///
/// Candidates scoring below `score_threshold` are dropped. The rest are visited from most to
/// least confident, equal scores in candidate order. A candidate is selected unless its IoU with
/// an already selected box is above `iou_threshold`, and selection stops after `max_boxes`.
/// Returns the selected indices in ascending candidate order.
pub async fn suppress(boxes: &[[f32; 4]], scores: &[f32], params: SuppressParams) -> Vec<usize> {
    tokio::task::yield_now().await;
    let kept = select(boxes, scores, params);
    tokio::task::yield_now().await;

    kept
}

fn select(boxes: &[[f32; 4]], scores: &[f32], params: SuppressParams) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len().min(boxes.len()))
        .filter(|&index| scores[index] >= params.score_threshold)
        .collect();
    // Stable, so equal scores keep ascending index order
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut selected: Vec<usize> = vec![];
    'candidates: for index in order {
        if selected.len() >= params.max_boxes {
            break;
        }
        for &kept in selected.iter() {
            if iou(&boxes[index], &boxes[kept]) > params.iou_threshold {
                continue 'candidates;
            }
        }
        selected.push(index);
    }

    selected.sort_unstable();
    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
pub fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the corner points of the overlap box are ill defined and
    // its area is zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as `[y1, x1, y2, x2]`. If the bottom-right point is above or to the
/// left of the top-left point, the area is zero.
pub fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[3] - bbox[1];
    let height = bbox[2] - bbox[0];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}
