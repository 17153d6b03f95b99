use serde::Serialize;

/// Axis-aligned box around one detected stroke or character, in pixels with
/// the origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0 {
            self.width as f64 / self.height as f64
        } else {
            0.0
        }
    }

    pub fn center_y(&self) -> f64 {
        self.y as f64 + self.height as f64 / 2.0
    }

    pub fn baseline_y(&self) -> i32 {
        self.y + self.height
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Intersection over union. Boxes that only touch have no intersection.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.baseline_y().min(other.baseline_y());
        if x1 >= x2 || y1 >= y2 {
            return 0.0;
        }
        let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }
}

/// Scores and descriptive statistics for one text line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineAnalysis {
    pub micrography_score: f64,
    pub size_consistency: f64,
    pub alignment_quality: f64,
    pub spacing_regularity: f64,
    pub baseline_stability: f64,
    pub character_count: usize,
    pub avg_height: f64,
    pub avg_width: f64,
    pub height_variance: f64,
    pub width_variance: f64,
    pub baseline_variance: f64,
    pub spacing_variance: f64,
    pub overall_quality_score: f64,
    pub canvas_size_analysis: CanvasSizeAnalysis,
    pub line_number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasSizeAnalysis {
    OptimalSize,
    NoCharacters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Reported when no text was found.
    Handwriting,
    UniversalText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrographySeverity {
    None,
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandwritingQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    EnhancedContour,
    Tesseract,
}

impl DetectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnhancedContour => "enhanced_contour",
            Self::Tesseract => "tesseract",
        }
    }
}

/// Terminal payload of one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub analysis_type: AnalysisType,
    pub total_lines_detected: usize,
    #[serde(flatten)]
    pub summary: Option<DocumentSummary>,
    pub line_analysis_results: Vec<LineAnalysis>,
    pub debug_info: DebugInfo,
}

/// Document-level averages, only present when at least one line was scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub total_characters_detected: usize,
    pub overall_micrography_score: f64,
    pub micrography_severity: MicrographySeverity,
    pub overall_quality_score: f64,
    pub overall_handwriting_quality: HandwritingQuality,
    pub size_consistency_score: f64,
    pub alignment_quality_score: f64,
    pub spacing_regularity_score: f64,
    pub baseline_stability_score: f64,
    pub interpretation: Interpretation,
    pub universal_text_notes: UniversalTextNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interpretation {
    pub micrography_detected: bool,
    pub good_size_consistency: bool,
    pub good_alignment: bool,
    pub regular_spacing: bool,
    pub stable_baseline: bool,
    pub overall_quality_good: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniversalTextNotes {
    pub optimized_for_all_fonts: bool,
    pub supports_multiple_languages: &'static str,
    pub natural_variation_expected: &'static str,
    pub baseline_flexibility: &'static str,
}

impl Default for UniversalTextNotes {
    fn default() -> Self {
        Self {
            optimized_for_all_fonts: true,
            supports_multiple_languages: "Supports any language and font type",
            natural_variation_expected: "Natural variations expected in any font type",
            baseline_flexibility: "Baseline flexibility for all font types",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    /// `[height, width, channels]` of the decoded upload.
    pub image_shape: [u32; 3],
    pub preprocessing_applied: bool,
    pub detection_method: DetectionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_optimization: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_size_analysis: Option<CanvasDebug>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasDebug {
    pub original_size: String,
    pub target_size: String,
    pub resize_applied: &'static str,
}

/// Dimensions of the decoded image and what the detector did with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub target_width: u32,
    pub target_height: u32,
    pub resized: bool,
}
