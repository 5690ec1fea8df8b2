//! Screenshot comparison: template matching and pixel-level diff

use image::{GrayImage, Rgba, RgbaImage};
use std::path::Path;
use tracing::debug;

use crate::error::{CompareError, Result};
use crate::geometry::{ExclusionZoneSet, Pixel, Rectangle};

/// Minimum normalized correlation score for `locate` to report a match
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.95;

/// Marker color used for diff pixels in overlays
pub const DIFF_MARKER: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Result of a pixel-level comparison
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    /// Diff pixels: intersection first, then extra candidate rows, then extra candidate columns
    pub pixels: Vec<Pixel>,

    /// Percentage of candidate pixels that differ
    pub diff_percent: f64,

    /// Candidate dimensions
    pub width: u32,
    pub height: u32,
}

impl DiffResult {
    pub fn is_identical(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Whether the diff exceeds a tolerance. Equality is within tolerance.
    pub fn exceeds(&self, tolerance_percent: f64) -> bool {
        self.diff_percent > tolerance_percent
    }
}

/// Stateless screenshot comparator
#[derive(Debug, Clone)]
pub struct ImageComparator {
    match_threshold: f64,
    pixel_tolerance: u8,
}

impl Default for ImageComparator {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            pixel_tolerance: 0,
        }
    }
}

impl ImageComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grayscale difference a pixel may show and still count as equal
    pub fn with_pixel_tolerance(mut self, tolerance: u8) -> Self {
        self.pixel_tolerance = tolerance;
        self
    }

    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn pixel_tolerance(&self) -> u8 {
        self.pixel_tolerance
    }

    /// Find `candidate` inside `reference`.
    ///
    /// Returns the matching zone of the reference, or `None` when the best
    /// normalized correlation score does not exceed the match threshold.
    pub fn locate(&self, reference: &Path, candidate: &Path) -> Result<Option<Rectangle>> {
        let (reference, candidate) = load_pair(reference, candidate)?;
        self.locate_images(&reference, &candidate)
    }

    pub fn locate_images(&self, reference: &GrayImage, candidate: &GrayImage) -> Result<Option<Rectangle>> {
        let (reference_width, reference_height) = reference.dimensions();
        let (image_width, image_height) = candidate.dimensions();

        if reference_width < image_width || reference_height < image_height {
            return Err(CompareError::SizeMismatch {
                reference_width,
                reference_height,
                image_width,
                image_height,
            });
        }

        if image_width == 0 || image_height == 0 {
            return Ok(None);
        }

        let (score, x, y) = best_match(reference, candidate);
        debug!(
            "Best match for {}x{} template at ({}, {}) with score {:.4}",
            image_width, image_height, x, y, score
        );

        if score > self.match_threshold {
            Ok(Some(Rectangle::new(x, y, image_width, image_height)))
        } else {
            Ok(None)
        }
    }

    /// Pixel-level diff of `candidate` against `reference`
    pub fn diff(&self, reference: &Path, candidate: &Path, zones: &ExclusionZoneSet) -> Result<DiffResult> {
        let (reference, candidate) = load_pair(reference, candidate)?;
        Ok(self.diff_images(&reference, &candidate, zones))
    }

    /// Pixel-level diff of two decoded images.
    ///
    /// Only the intersection of both images is compared. Candidate pixels outside
    /// the reference are always diffs; reference pixels outside the candidate are
    /// never examined. Any diff pixel inside an exclusion zone is dropped.
    pub fn diff_images(&self, reference: &GrayImage, candidate: &GrayImage, zones: &ExclusionZoneSet) -> DiffResult {
        let (reference_width, reference_height) = reference.dimensions();
        let (width, height) = candidate.dimensions();
        let min_width = reference_width.min(width);
        let min_height = reference_height.min(height);

        let mut pixels = Vec::new();

        for y in 0..min_height {
            for x in 0..min_width {
                let expected = reference.get_pixel(x, y).0[0];
                let actual = candidate.get_pixel(x, y).0[0];
                if expected.abs_diff(actual) > self.pixel_tolerance && !zones.excludes(x, y) {
                    pixels.push(Pixel::new(x, y));
                }
            }
        }

        // candidate rows below the reference
        for y in min_height..height {
            for x in 0..width {
                if !zones.excludes(x, y) {
                    pixels.push(Pixel::new(x, y));
                }
            }
        }

        // candidate columns right of the reference
        for y in 0..min_height {
            for x in min_width..width {
                if !zones.excludes(x, y) {
                    pixels.push(Pixel::new(x, y));
                }
            }
        }

        let total = u64::from(width) * u64::from(height);
        let diff_percent = if total == 0 {
            0.0
        } else {
            pixels.len() as f64 * 100.0 / total as f64
        };

        debug!(
            "Compared {}x{} against {}x{} reference: {} diff pixels ({:.2}%)",
            width,
            height,
            reference_width,
            reference_height,
            pixels.len(),
            diff_percent
        );

        DiffResult {
            pixels,
            diff_percent,
            width,
            height,
        }
    }

    pub fn render_overlay(&self, width: u32, height: u32, pixels: &[Pixel]) -> RgbaImage {
        render_overlay(width, height, pixels)
    }
}

/// Transparent image of the given size with every diff pixel painted red.
/// Pixels outside the image are ignored.
pub fn render_overlay(width: u32, height: u32, pixels: &[Pixel]) -> RgbaImage {
    let mut overlay = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 0]));
    for pixel in pixels {
        if pixel.x < width && pixel.y < height {
            overlay.put_pixel(pixel.x, pixel.y, DIFF_MARKER);
        }
    }
    overlay
}

/// Decode a raster as 8-bit grayscale
pub fn load_grayscale(path: &Path) -> Result<GrayImage> {
    Ok(image::open(path)?.to_luma8())
}

/// Width and height of a raster, read from its header
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    if !path.is_file() {
        return Err(CompareError::missing_image(path));
    }
    Ok(image::image_dimensions(path)?)
}

fn load_pair(reference: &Path, candidate: &Path) -> Result<(GrayImage, GrayImage)> {
    if !reference.is_file() {
        return Err(CompareError::missing_reference(reference));
    }
    if !candidate.is_file() {
        return Err(CompareError::missing_image(candidate));
    }

    Ok((load_grayscale(reference)?, load_grayscale(candidate)?))
}

/// Summed-area tables of pixel values and squared pixel values
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sq_sum = vec![0u64; sum.len()];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_sq_sum = 0u64;
            for x in 0..width as usize {
                let value = u64::from(image.get_pixel(x as u32, y as u32).0[0]);
                row_sum += value;
                row_sq_sum += value * value;

                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq_sum;
            }
        }

        Self { stride, sum, sq_sum }
    }

    /// (sum, sum of squares) over the window at (x, y) of size w x h
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[u64], x: usize, y: usize| table[y * self.stride + x];

        let area = |table: &[u64]| {
            (at(table, x1, y1) + at(table, x0, y0)) - (at(table, x1, y0) + at(table, x0, y1))
        };

        (area(&self.sum) as f64, area(&self.sq_sum) as f64)
    }
}

/// Score from which a window counts as identical to the template
const EXACT_MATCH: f64 = 1.0 - 1e-9;

/// Normalized cross-correlation (mean-centered) of `template` over every
/// position of `reference`. Returns the best score and its top-left corner;
/// the first position in scan order wins ties.
///
/// Windows or templates without variance score 0.
///
/// The integral image only covers the denominator; the numerator is computed
/// directly, so a full search costs O(W·H·w·h). The search stops at the first
/// exact match, which keeps the usual case of a crop taken from the reference
/// cheap. A half-size template with no exact match on a page-sized reference
/// takes seconds.
fn best_match(reference: &GrayImage, template: &GrayImage) -> (f64, u32, u32) {
    let (reference_width, reference_height) = reference.dimensions();
    let (template_width, template_height) = template.dimensions();
    let n = f64::from(template_width) * f64::from(template_height);

    let template_mean = template.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
    let centered: Vec<f64> = template.pixels().map(|p| f64::from(p.0[0]) - template_mean).collect();
    let template_norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();

    let integral = IntegralImage::new(reference);
    let raw = reference.as_raw();
    let stride = reference_width as usize;
    let tw = template_width as usize;

    let mut best = (f64::NEG_INFINITY, 0, 0);

    for y in 0..=(reference_height - template_height) {
        for x in 0..=(reference_width - template_width) {
            let (sum, sq_sum) = integral.window(x, y, template_width, template_height);
            let window_norm = (sq_sum - sum * sum / n).max(0.0).sqrt();
            let denominator = template_norm * window_norm;

            let score = if denominator <= f64::EPSILON {
                0.0
            } else {
                let mut numerator = 0.0;
                for ty in 0..template_height as usize {
                    let row = (y as usize + ty) * stride + x as usize;
                    let template_row = &centered[ty * tw..(ty + 1) * tw];
                    for (tx, t) in template_row.iter().enumerate() {
                        numerator += t * f64::from(raw[row + tx]);
                    }
                }
                numerator / denominator
            };

            if score > best.0 {
                best = (score, x, y);
                if score >= EXACT_MATCH {
                    return best;
                }
            }
        }
    }

    best
}
