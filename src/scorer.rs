use float_ord::FloatOrd;
use ndarray::Array1;
use tracing::instrument;

use crate::{result::CanvasSizeAnalysis, util::round_to, BoundingBox, LineAnalysis};

/// `(upper bound, score)` pairs checked in order; the first bound the
/// statistic falls below wins.
type Bands = [(f64, f64); 4];

const SIZE_CONSISTENCY_BANDS: Bands = [(0.35, 1.0), (0.55, 0.9), (0.75, 0.7), (0.95, 0.4)];
const ALIGNMENT_BANDS: Bands = [(100.0, 1.0), (200.0, 0.8), (400.0, 0.6), (800.0, 0.3)];
const SPACING_BANDS: Bands = [(0.3, 1.0), (0.5, 0.8), (0.7, 0.6), (0.9, 0.3)];
const BASELINE_BANDS: Bands = [(0.15, 1.0), (0.25, 0.9), (0.4, 0.7), (0.6, 0.4)];
const WORST_BAND: f64 = 0.1;

const MICROGRAPHY_DEVIATION: f64 = 0.4;

fn band(value: f64, bands: &Bands) -> f64 {
    bands
        .iter()
        .find(|(limit, _)| value < *limit)
        .map(|(_, score)| *score)
        .unwrap_or(WORST_BAND)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by_key(|value| FloatOrd(*value));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Share of boxes whose height strays more than 40% from the median height,
/// escalated through four bands. Needs at least three boxes.
pub fn micrography_score(boxes: &[BoundingBox]) -> f64 {
    if boxes.len() < 3 {
        return 0.0;
    }
    let heights = boxes.iter().map(|b| b.height as f64).collect::<Vec<_>>();
    if heights.iter().all(|height| *height <= 0.0) {
        return 0.0;
    }

    let median_height = median(&heights);
    let threshold = median_height * MICROGRAPHY_DEVIATION;
    let anomalous = heights
        .iter()
        .filter(|height| (*height - median_height).abs() > threshold)
        .count();
    let ratio = anomalous as f64 / heights.len() as f64;

    if ratio < 0.1 {
        0.0
    } else if ratio < 0.3 {
        ratio * 0.5
    } else if ratio < 0.5 {
        ratio * 0.7
    } else {
        ratio.min(1.0)
    }
}

/// Horizontal gaps between neighbours of a left to right ordered line.
fn spacings(boxes: &[BoundingBox]) -> Vec<f64> {
    boxes
        .windows(2)
        .map(|pair| (pair[1].x - pair[0].right()) as f64)
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    mean: f64,
    variance: f64,
    std: f64,
}

fn moments(values: Vec<f64>) -> Moments {
    if values.is_empty() {
        return Moments::default();
    }
    let values = Array1::from_vec(values);
    Moments {
        mean: values.mean().unwrap_or(0.0),
        variance: values.var(0.0),
        std: values.std(0.0),
    }
}

/// Scores one line of left to right ordered boxes.
#[instrument(skip(boxes), level = "trace")]
pub fn analyze_line(boxes: &[BoundingBox], line_number: usize) -> LineAnalysis {
    if boxes.is_empty() {
        return LineAnalysis {
            micrography_score: 0.0,
            size_consistency: 0.0,
            alignment_quality: 0.0,
            spacing_regularity: 0.0,
            baseline_stability: 0.0,
            character_count: 0,
            avg_height: 0.0,
            avg_width: 0.0,
            height_variance: 0.0,
            width_variance: 0.0,
            baseline_variance: 0.0,
            spacing_variance: 0.0,
            overall_quality_score: 0.0,
            canvas_size_analysis: CanvasSizeAnalysis::NoCharacters,
            line_number,
        };
    }

    let height = moments(boxes.iter().map(|b| b.height as f64).collect());
    let width = moments(boxes.iter().map(|b| b.width as f64).collect());
    let baseline = moments(boxes.iter().map(|b| b.baseline_y() as f64).collect());

    let micrography = micrography_score(boxes);

    let size_consistency = if height.mean > 0.0 {
        band(height.std / height.mean, &SIZE_CONSISTENCY_BANDS)
    } else {
        0.0
    };

    let alignment_quality = if boxes.len() >= 2 {
        let centers = moments(boxes.iter().map(BoundingBox::center_y).collect());
        band(centers.variance, &ALIGNMENT_BANDS)
    } else {
        1.0
    };

    let (spacing_regularity, spacing_variance) = if boxes.len() >= 3 {
        let gaps = moments(spacings(boxes));
        // overlapping neighbours leave the coefficient undefined
        let score = if gaps.mean > 0.0 {
            band(gaps.std / gaps.mean, &SPACING_BANDS)
        } else {
            1.0
        };
        (score, gaps.variance)
    } else {
        (1.0, 0.0)
    };

    let (baseline_stability, baseline_variance) = if boxes.len() >= 2 {
        let score = if height.mean > 0.0 {
            band(baseline.std / height.mean, &BASELINE_BANDS)
        } else {
            0.0
        };
        (score, baseline.variance)
    } else {
        (1.0, 0.0)
    };

    let overall_quality =
        (size_consistency + alignment_quality + spacing_regularity + baseline_stability) * 0.25;

    LineAnalysis {
        micrography_score: round_to(micrography, 3),
        size_consistency: round_to(size_consistency, 3),
        alignment_quality: round_to(alignment_quality, 3),
        spacing_regularity: round_to(spacing_regularity, 3),
        baseline_stability: round_to(baseline_stability, 3),
        character_count: boxes.len(),
        avg_height: round_to(height.mean, 2),
        avg_width: round_to(width.mean, 2),
        height_variance: round_to(height.variance, 2),
        width_variance: round_to(width.variance, 2),
        baseline_variance: round_to(baseline_variance, 2),
        spacing_variance: round_to(spacing_variance, 2),
        overall_quality_score: round_to(overall_quality, 3),
        canvas_size_analysis: CanvasSizeAnalysis::OptimalSize,
        line_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_scores(analysis: &LineAnalysis) -> [f64; 6] {
        [
            analysis.micrography_score,
            analysis.size_consistency,
            analysis.alignment_quality,
            analysis.spacing_regularity,
            analysis.baseline_stability,
            analysis.overall_quality_score,
        ]
    }

    #[test]
    fn single_box_gets_vacuous_defaults() {
        let analysis = analyze_line(&[BoundingBox::new(10, 10, 12, 20)], 0);
        assert_eq!(analysis.alignment_quality, 1.0);
        assert_eq!(analysis.spacing_regularity, 1.0);
        assert_eq!(analysis.baseline_stability, 1.0);
        assert_eq!(analysis.micrography_score, 0.0);
        assert_eq!(analysis.size_consistency, 1.0);
        assert_eq!(analysis.character_count, 1);
    }

    #[test]
    fn empty_line_reports_no_characters() {
        let analysis = analyze_line(&[], 3);
        assert_eq!(analysis.character_count, 0);
        assert_eq!(analysis.canvas_size_analysis, CanvasSizeAnalysis::NoCharacters);
        assert_eq!(analysis.line_number, 3);
    }

    #[test]
    fn steady_line_scores_high() {
        let boxes = [18, 19, 20, 21]
            .iter()
            .enumerate()
            .map(|(i, h)| BoundingBox::new(i as i32 * 30, 100 - h, 20, *h))
            .collect::<Vec<_>>();
        let analysis = analyze_line(&boxes, 0);
        assert!(analysis.size_consistency >= 0.9);
        assert!(analysis.alignment_quality >= 0.8);
        assert!(analysis.overall_quality_score >= 0.8);
        assert_eq!(analysis.micrography_score, 0.0);
        assert_eq!(analysis.avg_height, 19.5);
        assert_eq!(analysis.height_variance, 1.25);
        assert_eq!(analysis.baseline_variance, 0.0);
        assert_eq!(analysis.spacing_variance, 0.0);
    }

    #[test]
    fn mixed_heights_raise_micrography() {
        let boxes = (0..10)
            .map(|i| {
                let height = if i < 6 { 20 } else { 8 };
                BoundingBox::new(i * 25, 100 - height, 15, height)
            })
            .collect::<Vec<_>>();
        assert!((micrography_score(&boxes) - 0.28).abs() < 1e-9);
        assert_eq!(analyze_line(&boxes, 0).micrography_score, 0.28);
    }

    #[test]
    fn micrography_bands() {
        let line = |small: usize, total: usize| {
            (0..total)
                .map(|i| {
                    let height = if i < small { 5 } else { 20 };
                    BoundingBox::new(i as i32 * 25, 0, 10, height)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(micrography_score(&line(0, 10)), 0.0);
        assert!((micrography_score(&line(2, 10)) - 0.1).abs() < 1e-9);
        assert!((micrography_score(&line(4, 10)) - 0.28).abs() < 1e-9);
        // median falls to 5 once the short boxes are the majority
        assert!((micrography_score(&line(6, 10)) - 0.4 * 0.7).abs() < 1e-9);
        assert_eq!(micrography_score(&line(1, 2)), 0.0);
    }

    #[test]
    fn step_functions_keep_exact_cut_points() {
        assert_eq!(band(0.349, &SIZE_CONSISTENCY_BANDS), 1.0);
        assert_eq!(band(0.35, &SIZE_CONSISTENCY_BANDS), 0.9);
        assert_eq!(band(0.95, &SIZE_CONSISTENCY_BANDS), 0.1);
        assert_eq!(band(99.9, &ALIGNMENT_BANDS), 1.0);
        assert_eq!(band(400.0, &ALIGNMENT_BANDS), 0.3);
        assert_eq!(band(0.69, &SPACING_BANDS), 0.6);
        assert_eq!(band(0.6, &BASELINE_BANDS), 0.1);
    }

    #[test]
    fn irregular_spacing_is_penalised() {
        let xs = [0, 25, 130, 145, 300];
        let boxes = xs
            .iter()
            .map(|x| BoundingBox::new(*x, 50, 10, 20))
            .collect::<Vec<_>>();
        let analysis = analyze_line(&boxes, 0);
        assert!(analysis.spacing_regularity <= 0.3);
        assert_eq!(analysis.alignment_quality, 1.0);
    }

    #[test]
    fn overlapping_boxes_keep_full_spacing_score() {
        let boxes = (0..4)
            .map(|i| BoundingBox::new(i * 5, 0, 10, 10))
            .collect::<Vec<_>>();
        assert_eq!(analyze_line(&boxes, 0).spacing_regularity, 1.0);
    }

    #[test]
    fn sub_scores_stay_in_unit_interval() {
        for seed in 1..60i32 {
            let boxes = (0..(seed % 13))
                .map(|i| {
                    let v = (seed * 31 + i * 17) % 97;
                    BoundingBox::new(i * (v % 40), (v * 7) % 300, 1 + v % 23, 1 + (v * 3) % 61)
                })
                .collect::<Vec<_>>();
            let analysis = analyze_line(&boxes, 0);
            for score in sub_scores(&analysis) {
                assert!((0.0..=1.0).contains(&score), "{score} out of range for {boxes:?}");
            }
        }
    }
}
