use image::{imageops, DynamicImage, GrayImage};
use imageproc::{
    contours::{find_contours, BorderType},
    filter::{gaussian_blur_f32, median_filter},
};
use tracing::instrument;

use crate::{
    util::{
        self, adaptive_threshold_gaussian, adaptive_threshold_mean, bilateral_filter, clahe,
        close_then_open, kernel_sigma, resize_for_analysis,
    },
    BoundingBox, DetectionOptions,
};

const BILATERAL_DIAMETER: u32 = 9;
const BILATERAL_SIGMA: f32 = 75.0;
const CLAHE_CLIP_LIMIT: f32 = 3.0;
const CLAHE_GRID: u32 = 8;

/// Preprocessed grayscale image plus the boxes found in it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub boxes: Vec<BoundingBox>,
    pub processed: GrayImage,
    pub scale: util::Scale,
}

/// One of the independent transforms whose contours are pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Identity,
    Inverted,
    GaussianBlur,
    MedianBlur,
    Bilateral,
    AdaptiveGaussian,
    AdaptiveMean,
}

impl Variant {
    pub const ALL: [Variant; 7] = [
        Variant::Identity,
        Variant::Inverted,
        Variant::GaussianBlur,
        Variant::MedianBlur,
        Variant::Bilateral,
        Variant::AdaptiveGaussian,
        Variant::AdaptiveMean,
    ];

    pub fn apply(self, image: &GrayImage) -> GrayImage {
        match self {
            Variant::Identity => image.clone(),
            Variant::Inverted => {
                let mut inverted = image.clone();
                imageops::invert(&mut inverted);
                inverted
            }
            Variant::GaussianBlur => gaussian_blur_f32(image, kernel_sigma(3)),
            Variant::MedianBlur => median_filter(image, 1, 1),
            Variant::Bilateral => {
                bilateral_filter(image, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA)
            }
            Variant::AdaptiveGaussian => adaptive_threshold_gaussian(image, 11, 2),
            Variant::AdaptiveMean => adaptive_threshold_mean(image, 15, 3),
        }
    }
}

/// Classical character region detector. Stateless apart from its options,
/// so one instance can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct RegionDetector {
    options: DetectionOptions,
}

impl RegionDetector {
    pub fn new(options: DetectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    #[instrument(skip(self, image), level = "debug")]
    pub fn get_text_boxes(&self, image: &DynamicImage) -> Detection {
        let (processed, scale) = self.preprocess(image);

        let candidates = Variant::ALL
            .iter()
            .enumerate()
            .flat_map(|(index, variant)| {
                let transformed = close_then_open(&variant.apply(&processed));
                #[cfg(feature = "debug")]
                if let Err(err) = transformed.save(format!("debug_variants/{index}.png")) {
                    log::warn!("Failed to save variant {index}: {err}");
                }
                let found = self.find_candidates(&transformed);
                log::trace!("Variant {index} ({variant:?}) produced {} candidates", found.len());
                found
            })
            .collect::<Vec<_>>();

        let candidate_count = candidates.len();
        let boxes = remove_overlapping_boxes(candidates, self.options.overlap_threshold);
        log::debug!("Kept {} of {candidate_count} candidate boxes", boxes.len());

        Detection {
            boxes,
            processed,
            scale,
        }
    }

    /// Grayscale, resize, denoise, equalize and binarize.
    #[instrument(skip(self, image), level = "debug")]
    pub fn preprocess(&self, image: &DynamicImage) -> (GrayImage, util::Scale) {
        let gray = image.to_luma8();
        let scale = util::analysis_scale(gray.width(), gray.height(), &self.options);
        let gray = resize_for_analysis(&gray, scale);

        let denoised = bilateral_filter(&gray, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA);
        let enhanced = clahe(&denoised, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        let binary = adaptive_threshold_gaussian(&enhanced, 15, 5);
        (close_then_open(&binary), scale)
    }

    #[instrument(skip(self, image), level = "trace")]
    fn find_candidates(&self, image: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = image.dimensions();
        find_contours::<i32>(image)
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter(|contour| util::contour_area(&contour.points) >= self.options.min_area)
            .filter_map(|contour| util::bounding_rect(&contour.points))
            // a region spanning the whole frame is background, not a stroke
            .filter(|rect| !(rect.width as u32 >= width && rect.height as u32 >= height))
            .filter(|rect| self.accepts(rect))
            .collect()
    }

    fn accepts(&self, rect: &BoundingBox) -> bool {
        let aspect_ratio = rect.aspect_ratio();
        rect.width >= 1
            && rect.height >= 1
            && (self.options.min_aspect_ratio..=self.options.max_aspect_ratio)
                .contains(&aspect_ratio)
    }
}

/// Greedy maximum-area suppression: larger boxes are visited first and a box
/// is dropped when its IoU with any kept box exceeds `overlap_threshold`.
pub fn remove_overlapping_boxes(
    mut boxes: Vec<BoundingBox>,
    overlap_threshold: f64,
) -> Vec<BoundingBox> {
    // stable, so equal areas keep their input order
    boxes.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept
            .iter()
            .all(|existing| candidate.iou(existing) <= overlap_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
