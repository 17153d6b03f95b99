use tracing::instrument;

use crate::{
    result::{
        AnalysisType, CanvasDebug, DebugInfo, DetectionMethod, DocumentSummary,
        HandwritingQuality, ImageMeta, Interpretation, MicrographySeverity, ReportStatus,
        UniversalTextNotes,
    },
    util::round_to,
    DocumentReport, LineAnalysis,
};

pub const NO_TEXT_MESSAGE: &str =
    "No handwriting or text detected. Please ensure the image contains clear handwritten text.";

pub fn classify_micrography(average: f64) -> MicrographySeverity {
    if average > 0.60 {
        MicrographySeverity::Severe
    } else if average > 0.4 {
        MicrographySeverity::Moderate
    } else if average > 0.15 {
        MicrographySeverity::Mild
    } else {
        MicrographySeverity::None
    }
}

pub fn classify_quality(average: f64) -> HandwritingQuality {
    if average < 0.25 {
        HandwritingQuality::Poor
    } else if average < 0.45 {
        HandwritingQuality::Fair
    } else if average < 0.65 {
        HandwritingQuality::Good
    } else {
        HandwritingQuality::Excellent
    }
}

fn mean_of(analyses: &[LineAnalysis], field: impl Fn(&LineAnalysis) -> f64) -> f64 {
    if analyses.is_empty() {
        return 0.0;
    }
    analyses.iter().map(field).sum::<f64>() / analyses.len() as f64
}

fn shape(meta: &ImageMeta) -> [u32; 3] {
    [meta.height, meta.width, meta.channels as u32]
}

/// Report returned when neither the detector nor the OCR fallback found text.
pub fn no_text_report(meta: &ImageMeta, detection_method: DetectionMethod) -> DocumentReport {
    DocumentReport {
        status: ReportStatus::Warning,
        message: Some(NO_TEXT_MESSAGE.to_string()),
        analysis_type: AnalysisType::Handwriting,
        total_lines_detected: 0,
        summary: None,
        line_analysis_results: Vec::new(),
        debug_info: DebugInfo {
            image_shape: shape(meta),
            preprocessing_applied: true,
            detection_method,
            font_optimization: None,
            canvas_size_analysis: None,
        },
    }
}

/// Merges per-line scores into document averages, severity bands and flags.
#[instrument(skip(analyses, meta), level = "debug")]
pub fn build_report(
    mut analyses: Vec<LineAnalysis>,
    meta: &ImageMeta,
    detection_method: DetectionMethod,
) -> DocumentReport {
    if analyses.is_empty() {
        return no_text_report(meta, detection_method);
    }
    analyses.sort_by_key(|analysis| analysis.line_number);

    let total_characters = analyses.iter().map(|a| a.character_count).sum();
    let micrography = mean_of(&analyses, |a| a.micrography_score);
    let quality = mean_of(&analyses, |a| a.overall_quality_score);
    let size_consistency = mean_of(&analyses, |a| a.size_consistency);
    let alignment = mean_of(&analyses, |a| a.alignment_quality);
    let spacing = mean_of(&analyses, |a| a.spacing_regularity);
    let baseline = mean_of(&analyses, |a| a.baseline_stability);

    let summary = DocumentSummary {
        total_characters_detected: total_characters,
        overall_micrography_score: round_to(micrography, 3),
        micrography_severity: classify_micrography(micrography),
        overall_quality_score: round_to(quality, 3),
        overall_handwriting_quality: classify_quality(quality),
        size_consistency_score: round_to(size_consistency, 3),
        alignment_quality_score: round_to(alignment, 3),
        spacing_regularity_score: round_to(spacing, 3),
        baseline_stability_score: round_to(baseline, 3),
        interpretation: Interpretation {
            micrography_detected: micrography > 0.1,
            good_size_consistency: size_consistency > 0.6,
            good_alignment: alignment > 0.6,
            regular_spacing: spacing > 0.5,
            stable_baseline: baseline > 0.6,
            overall_quality_good: quality > 0.6,
        },
        universal_text_notes: UniversalTextNotes::default(),
    };

    DocumentReport {
        status: ReportStatus::Success,
        message: None,
        analysis_type: AnalysisType::UniversalText,
        total_lines_detected: analyses.len(),
        summary: Some(summary),
        line_analysis_results: analyses,
        debug_info: DebugInfo {
            image_shape: shape(meta),
            preprocessing_applied: true,
            detection_method,
            font_optimization: Some("universal"),
            canvas_size_analysis: Some(CanvasDebug {
                original_size: format!("{}x{}", meta.width, meta.height),
                target_size: format!("{}x{}", meta.target_width, meta.target_height),
                resize_applied: if meta.resized { "yes" } else { "no" },
            }),
        },
    }
}
