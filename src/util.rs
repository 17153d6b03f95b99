use image::{
    imageops::{self, FilterType},
    GrayImage, Luma,
};
use imageproc::{
    filter::{box_filter, gaussian_blur_f32},
    morphology::{grayscale_close, grayscale_open, Mask},
    point::Point,
};
use tracing::instrument;

use crate::{BoundingBox, DetectionOptions};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub factor: f64,
    pub target_width: u32,
    pub target_height: u32,
    pub resized: bool,
}

/// Picks the aspect preserving factor that fits the image to the analysis
/// canvas. Images already within the resize band keep their size.
pub fn analysis_scale(width: u32, height: u32, options: &DetectionOptions) -> Scale {
    let height_scale = if height > 0 {
        options.target_height as f64 / height as f64
    } else {
        1.0
    };
    let width_scale = if width > 0 {
        options.target_width as f64 / width as f64
    } else {
        1.0
    };
    let factor = height_scale.min(width_scale);
    let resized = factor < options.min_scale || factor > options.max_scale;
    let (target_width, target_height) = if resized {
        (
            ((width as f64 * factor) as u32).max(1),
            ((height as f64 * factor) as u32).max(1),
        )
    } else {
        (width, height)
    };
    log::debug!(
        "Scale factor {factor:.3} for (w: {width}, h: {height}), target (w: {target_width}, h: {target_height}), resize: {resized}."
    );
    Scale {
        factor,
        target_width,
        target_height,
        resized,
    }
}

pub(crate) fn resize_for_analysis(image: &GrayImage, scale: Scale) -> GrayImage {
    if !scale.resized {
        return image.clone();
    }
    if scale.factor > 1.0 {
        imageops::resize(
            image,
            scale.target_width,
            scale.target_height,
            FilterType::CatmullRom,
        )
    } else {
        // thumbnail averages the source area covered by each output pixel
        imageops::thumbnail(image, scale.target_width, scale.target_height)
    }
}

/// Edge preserving smoothing over a circular window of `diameter` pixels.
#[instrument(level = "trace", skip(image))]
pub(crate) fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2) as i32;
    let color_weights = (0..256)
        .map(|diff| (-((diff * diff) as f32) / (2.0 * sigma_color * sigma_color)).exp())
        .collect::<Vec<_>>();
    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = dx * dx + dy * dy;
            if dist2 > radius * radius {
                continue;
            }
            let weight = (-(dist2 as f32) / (2.0 * sigma_space * sigma_space)).exp();
            offsets.push((dx, dy, weight));
        }
    }

    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let center = image.get_pixel(x, y)[0];
        let mut sum = 0.0f32;
        let mut norm = 0.0f32;
        for &(dx, dy, space_weight) in &offsets {
            let sx = (x as i32 + dx).clamp(0, max_x) as u32;
            let sy = (y as i32 + dy).clamp(0, max_y) as u32;
            let value = image.get_pixel(sx, sy)[0];
            let weight = space_weight * color_weights[center.abs_diff(value) as usize];
            sum += weight * value as f32;
            norm += weight;
        }
        *pixel = Luma([(sum / norm).round().clamp(0.0, 255.0) as u8]);
    }
    output
}

/// Contrast limited adaptive histogram equalization over a `grid` x `grid`
/// tiling, blending neighbouring tile mappings bilinearly.
#[instrument(level = "trace", skip(image))]
pub(crate) fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || grid == 0 {
        return image.clone();
    }
    let tile_width = width.div_ceil(grid);
    let tile_height = height.div_ceil(grid);
    let tiles_x = width.div_ceil(tile_width);
    let tiles_y = height.div_ceil(tile_height);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_width;
            let y0 = ty * tile_height;
            let x1 = (x0 + tile_width).min(width);
            let y1 = (y0 + tile_height).min(height);
            luts.push(tile_lut(image, (x0, y0, x1, y1), clip_limit));
        }
    }

    let lut_at = |tx: i64, ty: i64, value: u8| -> f32 {
        let tx = tx.clamp(0, tiles_x as i64 - 1) as u32;
        let ty = ty.clamp(0, tiles_y as i64 - 1) as u32;
        luts[(ty * tiles_x + tx) as usize][value as usize] as f32
    };

    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let value = image.get_pixel(x, y)[0];
        let fx = x as f32 / tile_width as f32 - 0.5;
        let fy = y as f32 / tile_height as f32 - 0.5;
        let tx = fx.floor() as i64;
        let ty = fy.floor() as i64;
        let xa = fx - tx as f32;
        let ya = fy - ty as f32;
        let top = lut_at(tx, ty, value) * (1.0 - xa) + lut_at(tx + 1, ty, value) * xa;
        let bottom = lut_at(tx, ty + 1, value) * (1.0 - xa) + lut_at(tx + 1, ty + 1, value) * xa;
        let blended = top * (1.0 - ya) + bottom * ya;
        *pixel = Luma([blended.round().clamp(0.0, 255.0) as u8]);
    }
    output
}

fn tile_lut(image: &GrayImage, (x0, y0, x1, y1): (u32, u32, u32, u32), clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut clipped = 0;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }
    let batch = clipped / 256;
    let residual = clipped % 256;
    for bin in histogram.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in histogram.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for (entry, bin) in lut.iter_mut().zip(histogram) {
        sum += bin;
        *entry = (sum as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Sigma used for a gaussian kernel of `kernel_size` when none is given.
pub(crate) fn kernel_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Binarizes against a gaussian weighted local mean minus `c`.
pub(crate) fn adaptive_threshold_gaussian(image: &GrayImage, block_size: u32, c: i16) -> GrayImage {
    let local_mean = gaussian_blur_f32(image, kernel_sigma(block_size));
    threshold_against(image, &local_mean, c)
}

/// Binarizes against the plain block mean minus `c`.
pub(crate) fn adaptive_threshold_mean(image: &GrayImage, block_size: u32, c: i16) -> GrayImage {
    let radius = block_size / 2;
    let local_mean = box_filter(image, radius, radius);
    threshold_against(image, &local_mean, c)
}

fn threshold_against(image: &GrayImage, local_mean: &GrayImage, c: i16) -> GrayImage {
    let mut output = image.clone();
    for (pixel, mean) in output.pixels_mut().zip(local_mean.pixels()) {
        let value = pixel[0] as i16;
        pixel[0] = if value > mean[0] as i16 - c { 255 } else { 0 };
    }
    output
}

// 2x2 structuring element anchored at its bottom-right cell.
fn cleanup_element() -> Mask {
    Mask::from_image(&GrayImage::from_pixel(2, 2, Luma([255])), 1, 1)
}

/// Morphological close followed by open.
pub(crate) fn close_then_open(image: &GrayImage) -> GrayImage {
    let element = cleanup_element();
    grayscale_open(&grayscale_close(image, &element), &element)
}

pub(crate) fn bounding_rect(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (min_x, min_y, max_x, max_y) = points.iter().fold(
        (first.x, first.y, first.x, first.y),
        |(min_x, min_y, max_x, max_y), point| {
            (
                min_x.min(point.x),
                min_y.min(point.y),
                max_x.max(point.x),
                max_y.max(point.y),
            )
        },
    );
    Some(BoundingBox::new(
        min_x,
        min_y,
        max_x - min_x + 1,
        max_y - min_y + 1,
    ))
}

/// Shoelace area of the closed polygon through `points`.
pub(crate) fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum::<i64>();
    twice_area.abs() as f64 / 2.0
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
