use image::{DynamicImage, GrayImage, Luma};
use std::io::Cursor;
use std::path::Path;

use crate::config::MatchingConfig;
use crate::matchers::{FeatureMatcher, Matcher, TemplateMatcher};
use crate::models::TargetSpec;
use crate::tests::init_tracing;

/// Deterministic noise so every pixel neighborhood is unique.
fn noise_image(width: u32, height: u32, seed: u32) -> GrayImage {
    let mut state = seed;
    GrayImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        Luma([(state >> 24) as u8])
    })
}

fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn write_crop(img: &GrayImage, x: u32, y: u32, w: u32, h: u32, path: &Path) {
    image::imageops::crop_imm(img, x, y, w, h)
        .to_image()
        .save(path)
        .unwrap();
}

fn single_scale_config() -> MatchingConfig {
    MatchingConfig {
        multi_scale: false,
        ..MatchingConfig::default()
    }
}

#[tokio::test]
async fn exact_crop_matches_at_its_true_center() {
    init_tracing();
    let screen = noise_image(160, 120, 7);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("template.png");
    // Crop at (40, 25), 30x20: true center (55, 35).
    write_crop(&screen, 40, 25, 30, 20, &template_path);

    let matcher = TemplateMatcher::new(single_scale_config());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    let result = matcher.find(&target, &png_bytes(&screen)).await.unwrap();

    assert!(result.confidence >= 0.99, "confidence {}", result.confidence);
    assert!((result.x - 55).abs() <= 2, "x {}", result.x);
    assert!((result.y - 35).abs() <= 2, "y {}", result.y);
    assert_eq!((result.width, result.height), (30, 20));
}

#[tokio::test]
async fn multi_scale_still_finds_original_scale_first() {
    let screen = noise_image(160, 120, 7);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("template.png");
    write_crop(&screen, 80, 60, 24, 24, &template_path);

    let matcher = TemplateMatcher::new(MatchingConfig::default());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    let result = matcher.find(&target, &png_bytes(&screen)).await.unwrap();
    assert!(result.confidence >= 0.99);
    assert!((result.x - 92).abs() <= 2);
    assert!((result.y - 72).abs() <= 2);
}

#[tokio::test]
async fn unrelated_template_misses() {
    let screen = noise_image(160, 120, 7);
    let other = noise_image(30, 20, 99);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("other.png");
    other.save(&template_path).unwrap();

    let matcher = TemplateMatcher::new(single_scale_config());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    assert!(matcher.find(&target, &png_bytes(&screen)).await.is_none());
}

#[tokio::test]
async fn flat_template_is_rejected() {
    let screen = noise_image(160, 120, 7);
    let flat = GrayImage::from_pixel(30, 20, Luma([128]));
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("flat.png");
    flat.save(&template_path).unwrap();

    let matcher = TemplateMatcher::new(single_scale_config());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    assert!(matcher.find(&target, &png_bytes(&screen)).await.is_none());
}

#[tokio::test]
async fn unreadable_template_yields_none_not_panic() {
    let screen = noise_image(64, 64, 7);
    let matcher = TemplateMatcher::new(single_scale_config());
    let target = TargetSpec::from_image("/nonexistent/template.png");
    assert!(matcher.find(&target, &png_bytes(&screen)).await.is_none());
}

#[tokio::test]
async fn per_target_confidence_override_applies() {
    let screen = noise_image(160, 120, 7);
    let other = noise_image(30, 20, 99);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("other.png");
    other.save(&template_path).unwrap();

    let matcher = TemplateMatcher::new(single_scale_config());
    // An absurdly low threshold accepts the best correlation wherever it is.
    let target = TargetSpec::from_image(template_path.to_string_lossy())
        .with_confidence(-1.0);
    assert!(matcher.find(&target, &png_bytes(&screen)).await.is_some());
}

#[tokio::test]
async fn feature_matcher_locates_crop_of_busy_screen() {
    // Noise has dense FAST corners; an exact crop must match its own region.
    let screen = noise_image(200, 150, 21);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("feature-template.png");
    // Crop at (50, 30), 100x80: identical pixels, so descriptors match
    // exactly and the centroid must land inside the cropped region.
    write_crop(&screen, 50, 30, 100, 80, &template_path);

    let matcher = FeatureMatcher::new(MatchingConfig::default());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    let result = matcher.find(&target, &png_bytes(&screen)).await.unwrap();

    assert!(result.confidence > 0.0);
    assert!((50..150).contains(&result.x), "x {}", result.x);
    assert!((30..110).contains(&result.y), "y {}", result.y);
}

#[tokio::test]
async fn feature_matcher_needs_enough_matches() {
    // A flat screen yields no corners at all.
    let screen = GrayImage::from_pixel(200, 150, Luma([200]));
    let template = noise_image(80, 60, 3);
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("t.png");
    template.save(&template_path).unwrap();

    let matcher = FeatureMatcher::new(MatchingConfig::default());
    let target = TargetSpec::from_image(template_path.to_string_lossy());
    assert!(matcher.find(&target, &png_bytes(&screen)).await.is_none());
}
