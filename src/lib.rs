use std::{
    any::Any,
    cell::Cell,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use detector::RegionDetector;
use image::{DynamicImage, GrayImage};
use lines::{group_boxes_into_lines, group_ocr_words};
use ocr::{OcrEngine, OcrError, OcrWord};
use thiserror::Error;
use tracing::{field, instrument, Span};

pub mod config;
pub mod detector;
pub mod lines;
pub mod ocr;
pub mod report;
mod result;
pub mod scorer;
pub mod server;
pub mod util;

pub use result::*;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether an upload name carries one of [`ACCEPTED_EXTENSIONS`].
pub fn is_supported_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ACCEPTED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Only PNG, JPG, and JPEG files are accepted")]
    UnsupportedFileType,
    #[error("Could not decode image. Please check the file format.")]
    Decode(#[source] image::ImageError),
    #[error("{0}")]
    Internal(String),
}

impl AnalyzeError {
    /// Errors caused by the upload itself rather than by the analyzer.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::UnsupportedFileType | Self::Decode(_))
    }
}

pub struct HandwritingAnalyzerBuilder {
    options: DetectionOptions,
    ocr: Option<Arc<dyn OcrEngine>>,
    ocr_timeout: Duration,
}

impl HandwritingAnalyzerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = timeout;
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> HandwritingAnalyzer {
        HandwritingAnalyzer {
            detector: RegionDetector::new(self.options),
            ocr: self.ocr,
            ocr_timeout: self.ocr_timeout,
        }
    }
}

impl Default for HandwritingAnalyzerBuilder {
    fn default() -> Self {
        Self {
            options: DetectionOptions::default(),
            ocr: None,
            ocr_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs detection, line grouping, scoring and aggregation for one image.
/// Holds no per-request state, so a single instance serves every request.
pub struct HandwritingAnalyzer {
    detector: RegionDetector,
    ocr: Option<Arc<dyn OcrEngine>>,
    ocr_timeout: Duration,
}

impl HandwritingAnalyzer {
    pub fn ocr_engine(&self) -> Option<&Arc<dyn OcrEngine>> {
        self.ocr.as_ref()
    }

    pub fn options(&self) -> &DetectionOptions {
        self.detector.options()
    }

    /// Checks the upload name before decoding and analyzing its bytes.
    pub fn analyze_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentReport, AnalyzeError> {
        if !is_supported_file_name(file_name) {
            return Err(AnalyzeError::UnsupportedFileType);
        }
        self.analyze_bytes(bytes)
    }

    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<DocumentReport, AnalyzeError> {
        let image = image::load_from_memory(bytes).map_err(AnalyzeError::Decode)?;
        let shape = image_shape(&image);
        log::info!("Image loaded successfully. Shape: {shape:?}");

        let attempted = Cell::new(DetectionMethod::EnhancedContour);
        catch_unwind(AssertUnwindSafe(|| self.run_pipeline(&image, &attempted))).map_err(
            |payload| {
                let reason = panic_reason(payload.as_ref());
                log::error!(
                    "Analysis failed. Shape: {shape:?}, detection method: {}, reason: {reason}",
                    attempted.get().as_str()
                );
                AnalyzeError::Internal(format!("analysis failed: {reason}"))
            },
        )
    }

    pub fn analyze_image(&self, image: &DynamicImage) -> DocumentReport {
        self.run_pipeline(image, &Cell::new(DetectionMethod::EnhancedContour))
    }

    /// `attempted` tracks the detection method in use so a failure can be
    /// reported against it.
    #[instrument(
        skip(self, image, attempted),
        fields(shape = ?image_shape(image), method = field::Empty)
    )]
    fn run_pipeline(
        &self,
        image: &DynamicImage,
        attempted: &Cell<DetectionMethod>,
    ) -> DocumentReport {
        let detection = self.detector.get_text_boxes(image);
        let options = self.detector.options();
        let meta = ImageMeta {
            width: image.width(),
            height: image.height(),
            channels: image.color().channel_count(),
            target_width: options.target_width,
            target_height: options.target_height,
            resized: detection.scale.resized,
        };

        let mut detection_method = DetectionMethod::EnhancedContour;
        let mut lines = group_boxes_into_lines(&detection.boxes, options.line_height_threshold);
        log::info!(
            "Enhanced contour method detected {} text elements",
            detection.boxes.len()
        );

        if lines.is_empty() && self.ocr.is_some() {
            attempted.set(DetectionMethod::Tesseract);
            if let Some(words) = self.ocr_fallback(&detection.processed) {
                detection_method = DetectionMethod::Tesseract;
                lines = group_ocr_words(&words);
            }
        }
        Span::current().record("method", detection_method.as_str());

        let analyses = lines
            .iter()
            .filter(|(_, boxes)| !boxes.is_empty())
            .map(|(line_number, boxes)| scorer::analyze_line(boxes, *line_number))
            .collect::<Vec<_>>();
        report::build_report(analyses, &meta, detection_method)
    }

    fn ocr_fallback(&self, image: &GrayImage) -> Option<Vec<OcrWord>> {
        let engine = self.ocr.as_ref()?;
        log::info!("Using {} OCR as fallback", engine.name());
        match engine.recognize(image, self.ocr_timeout) {
            Ok(words) => Some(words),
            Err(OcrError::Timeout(timeout)) => {
                log::warn!("{} gave up after {timeout:?}", engine.name());
                None
            }
            Err(err) => {
                log::warn!("{} failed: {err}", engine.name());
                None
            }
        }
    }
}

/// `[height, width, channels]`, the order reported in `debug_info`.
fn image_shape(image: &DynamicImage) -> [u32; 3] {
    [
        image.height(),
        image.width(),
        image.color().channel_count() as u32,
    ]
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|reason| reason.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Tuning constants of the detector and line grouper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    pub target_width: u32,
    pub target_height: u32,
    /// Images whose fit factor lies within `min_scale..=max_scale` are not resized.
    pub min_scale: f64,
    pub max_scale: f64,
    pub min_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub overlap_threshold: f64,
    pub line_height_threshold: f64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            target_width: 1200,
            target_height: 800,
            min_scale: 0.5,
            max_scale: 2.0,
            min_area: 3.0,
            min_aspect_ratio: 0.01,
            max_aspect_ratio: 100.0,
            overlap_threshold: 0.7,
            line_height_threshold: 1.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_raster_photo_extensions() {
        assert!(is_supported_file_name("page.PNG"));
        assert!(is_supported_file_name("scan.jpeg"));
        assert!(is_supported_file_name("a.b.jpg"));
        assert!(!is_supported_file_name("anim.gif"));
        assert!(!is_supported_file_name("png"));
    }

    #[test]
    fn gif_upload_is_rejected_before_decoding() {
        let analyzer = HandwritingAnalyzerBuilder::new().build();
        let err = analyzer
            .analyze_upload("drawing.gif", b"GIF89a")
            .expect_err("gif must be rejected");
        assert!(matches!(err, AnalyzeError::UnsupportedFileType));
        assert!(err.is_input_error());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let analyzer = HandwritingAnalyzerBuilder::new().build();
        let err = analyzer
            .analyze_upload("page.png", b"definitely not a png")
            .expect_err("decode must fail");
        assert!(matches!(err, AnalyzeError::Decode(_)));
    }
}
