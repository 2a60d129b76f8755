use image::{DynamicImage, GrayImage, Luma};
use std::io::Cursor;

use crate::comparator::Comparator;
use crate::errors::AatError;
use crate::models::{AssertType, ExpectedResult};
use crate::tests::MockEngine;

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

#[tokio::test]
async fn text_visible_is_case_insensitive_substring() {
    let engine = MockEngine::new().with_page_text("Welcome back, Ada!");

    let ok = ExpectedResult::new(AssertType::TextVisible, "welcome BACK");
    assert!(Comparator::check(&ok, &engine).await.is_ok());

    let missing = ExpectedResult::new(AssertType::TextVisible, "Sign out");
    let err = Comparator::check(&missing, &engine).await.unwrap_err();
    assert!(matches!(err, AatError::Assertion(_)));
}

#[tokio::test]
async fn text_equals_compares_trimmed() {
    let engine = MockEngine::new().with_page_text("  Done  ");
    let ok = ExpectedResult::new(AssertType::TextEquals, "Done");
    assert!(Comparator::check(&ok, &engine).await.is_ok());

    let wrong = ExpectedResult::new(AssertType::TextEquals, "Done!");
    assert!(Comparator::check(&wrong, &engine).await.is_err());
}

#[tokio::test]
async fn url_contains_checks_current_url() {
    let engine = MockEngine::new().with_url("https://app.test/dashboard?tab=1");
    let ok = ExpectedResult::new(AssertType::UrlContains, "/dashboard");
    assert!(Comparator::check(&ok, &engine).await.is_ok());

    let wrong = ExpectedResult::new(AssertType::UrlContains, "/settings");
    assert!(Comparator::check(&wrong, &engine).await.is_err());
}

#[tokio::test]
async fn image_visible_is_a_no_op_here() {
    let engine = MockEngine::new();
    let expected = ExpectedResult::new(AssertType::ImageVisible, "login.png");
    assert!(Comparator::check(&expected, &engine).await.is_ok());
}

#[tokio::test]
async fn screenshot_match_accepts_identical_frames() {
    let frame = noise_image(64, 48, 5);
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("reference.png");
    frame.save(&reference).unwrap();

    let engine = MockEngine::new().with_screenshot(png_bytes(&frame));
    let expected = ExpectedResult::new(
        AssertType::ScreenshotMatch,
        reference.to_string_lossy(),
    )
    .with_tolerance(0.001);
    assert!(Comparator::check(&expected, &engine).await.is_ok());
}

#[tokio::test]
async fn screenshot_match_rejects_unrelated_frames() {
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("reference.png");
    noise_image(64, 48, 5).save(&reference).unwrap();

    let engine = MockEngine::new().with_screenshot(png_bytes(&noise_image(64, 48, 999)));
    let expected = ExpectedResult::new(
        AssertType::ScreenshotMatch,
        reference.to_string_lossy(),
    )
    .with_tolerance(0.05);
    assert!(Comparator::check(&expected, &engine).await.is_err());
}

#[tokio::test]
async fn screenshot_match_missing_reference_is_an_error() {
    let engine = MockEngine::new().with_screenshot(png_bytes(&noise_image(8, 8, 1)));
    let expected = ExpectedResult::new(AssertType::ScreenshotMatch, "/nonexistent/ref.png");
    let err = Comparator::check(&expected, &engine).await.unwrap_err();
    assert!(matches!(err, AatError::Assertion(_)));
}
