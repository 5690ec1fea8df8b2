//! File based comparison tests
//!
//! Fixtures are generated into a temporary directory as PNG files.

use image::{GrayImage, Luma, Rgb, RgbImage};
use snapdiff_compare::{CompareError, ExclusionZoneSet, ImageComparator, Pixel, Rectangle};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_png(dir: &Path, name: &str, image: &GrayImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

fn gradient(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| Luma([((x * 3 + y * 5) % 251) as u8]))
}

#[test]
fn test_no_diff_from_files() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "same.png", &gradient(80, 60));

    let result = ImageComparator::new()
        .diff(&path, &path, &ExclusionZoneSet::new())
        .unwrap();

    assert!(result.pixels.is_empty());
    assert_eq!(result.diff_percent, 0.0);
}

#[test]
fn test_real_diff_from_color_files() {
    let dir = TempDir::new().unwrap();

    let reference = RgbImage::from_pixel(600, 300, Rgb([255, 255, 255]));
    let mut candidate = reference.clone();
    for x in 554..=556 {
        candidate.put_pixel(x, 256, Rgb([255, 0, 0]));
    }

    let reference_path = dir.path().join("reference.png");
    let candidate_path = dir.path().join("candidate.png");
    reference.save(&reference_path).unwrap();
    candidate.save(&candidate_path).unwrap();

    let comparator = ImageComparator::new();
    let result = comparator
        .diff(&reference_path, &candidate_path, &ExclusionZoneSet::new())
        .unwrap();
    assert_eq!(result.pixels.len(), 3);
    assert_eq!(result.pixels[0], Pixel::new(554, 256));
    assert!(result.diff_percent > 0.0);

    let zones: ExclusionZoneSet = [Rectangle::new(550, 255, 5, 3)].into_iter().collect();
    let result = comparator.diff(&reference_path, &candidate_path, &zones).unwrap();
    assert_eq!(result.pixels, vec![Pixel::new(555, 256), Pixel::new(556, 256)]);
}

#[test]
fn test_missing_reference_file() {
    let dir = TempDir::new().unwrap();
    let image = write_png(dir.path(), "image.png", &gradient(10, 10));
    let missing = dir.path().join("missing.png");

    let err = ImageComparator::new()
        .diff(&missing, &image, &ExclusionZoneSet::new())
        .unwrap_err();
    assert!(err.is_missing_file());
    assert!(err.to_string().starts_with("Reference file"));

    let err = ImageComparator::new().locate(&image, &missing).unwrap_err();
    assert!(matches!(err, CompareError::MissingFile { role: "Image", .. }));
}

#[test]
fn test_locate_from_files() {
    let dir = TempDir::new().unwrap();
    let reference = GrayImage::from_fn(90, 70, |x, y| {
        let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)).rotate_left(x % 7);
        Luma([(v >> 8) as u8])
    });
    let template = image::imageops::crop_imm(&reference, 41, 17, 16, 16).to_image();

    let reference_path = write_png(dir.path(), "page.png", &reference);
    let template_path = write_png(dir.path(), "button.png", &template);

    let comparator = ImageComparator::new();
    let rect = comparator.locate(&reference_path, &template_path).unwrap();
    assert_eq!(rect, Some(Rectangle::new(41, 17, 16, 16)));

    let err = comparator.locate(&template_path, &reference_path).unwrap_err();
    assert!(err.to_string().contains("must be greater"));
}

#[test]
fn test_corrupt_file_is_image_error() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "good.png", &gradient(10, 10));
    let corrupt = dir.path().join("corrupt.png");
    std::fs::write(&corrupt, b"not a png").unwrap();

    let err = ImageComparator::new()
        .diff(&good, &corrupt, &ExclusionZoneSet::new())
        .unwrap_err();
    assert!(matches!(err, CompareError::Image(_)));
}

#[test]
fn test_image_dimensions() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "wide.png", &gradient(31, 7));

    assert_eq!(snapdiff_compare::image_dimensions(&path).unwrap(), (31, 7));

    let err = snapdiff_compare::image_dimensions(&dir.path().join("nope.png")).unwrap_err();
    assert!(err.is_missing_file());
}
