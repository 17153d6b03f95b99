use std::collections::BTreeMap;

use tracing::instrument;

use crate::{ocr::OcrWord, BoundingBox};

/// Line index (0-based, top to bottom discovery order) to its boxes sorted
/// left to right.
pub type Lines = BTreeMap<usize, Vec<BoundingBox>>;

/// Single top to bottom pass: a box opens a new line when its vertical centre
/// is more than `line_height_threshold` reference heights away from the
/// current line's reference box. Boxes are never moved back to earlier lines.
#[instrument(skip(boxes), level = "debug")]
pub fn group_boxes_into_lines(boxes: &[BoundingBox], line_height_threshold: f64) -> Lines {
    let mut lines = Lines::new();
    let mut sorted = boxes.to_vec();
    sorted.sort_by_key(|b| b.y);
    let Some(first) = sorted.first().copied() else {
        return lines;
    };

    let mut current_line = 0;
    let mut reference = first;
    for b in sorted {
        let center = b.y + b.height / 2;
        let reference_center = reference.y + reference.height / 2;
        if (center - reference_center).abs() as f64
            > reference.height as f64 * line_height_threshold
        {
            current_line += 1;
            reference = b;
        }
        lines.entry(current_line).or_default().push(b);
    }

    for line in lines.values_mut() {
        line.sort_by_key(|b| b.x);
    }
    log::debug!("Grouped {} boxes into {} lines", boxes.len(), lines.len());
    lines
}

/// Groups OCR words by the line key the engine reported, numbering lines in
/// reading order.
pub fn group_ocr_words(words: &[OcrWord]) -> Lines {
    let mut by_key = BTreeMap::<_, Vec<BoundingBox>>::new();
    for word in words {
        by_key.entry(word.line_key()).or_default().push(word.bounds);
    }
    by_key
        .into_values()
        .enumerate()
        .map(|(index, mut boxes)| {
            boxes.sort_by_key(|b| b.x);
            (index, boxes)
        })
        .collect()
}
