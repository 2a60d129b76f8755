//! Assertion evaluation for `assert` steps and per-step expected results.

use tracing::debug;

use crate::engine::TestEngine;
use crate::errors::AatError;
use crate::models::{AssertType, ExpectedResult};

pub struct Comparator;

impl Comparator {
    /// Evaluate one assertion against live engine state. Returns Ok on
    /// success, an [`AatError::Assertion`] with the expected-vs-observed
    /// detail on mismatch.
    pub async fn check(
        expected: &ExpectedResult,
        engine: &dyn TestEngine,
    ) -> Result<(), AatError> {
        match expected.assert_type {
            AssertType::TextVisible => {
                let page = engine.get_page_text().await?;
                let needle = expected.value.trim();
                if page.to_lowercase().contains(&needle.to_lowercase()) {
                    Ok(())
                } else {
                    Err(AatError::Assertion(format!(
                        "text {needle:?} not visible on page"
                    )))
                }
            }
            AssertType::TextEquals => {
                let page = engine.get_page_text().await?;
                let observed = page.trim();
                let wanted = expected.value.trim();
                if observed == wanted {
                    Ok(())
                } else {
                    Err(AatError::Assertion(format!(
                        "page text mismatch: expected {wanted:?}, got {observed:?}"
                    )))
                }
            }
            AssertType::UrlContains => {
                let url = engine.get_url().await?;
                if url.contains(expected.value.trim()) {
                    Ok(())
                } else {
                    Err(AatError::Assertion(format!(
                        "url {url:?} does not contain {:?}",
                        expected.value.trim()
                    )))
                }
            }
            // Located by the matcher chain during the step itself; nothing
            // further to verify here.
            AssertType::ImageVisible => Ok(()),
            AssertType::ScreenshotMatch => {
                Self::check_screenshot_match(expected, engine).await
            }
        }
    }

    async fn check_screenshot_match(
        expected: &ExpectedResult,
        engine: &dyn TestEngine,
    ) -> Result<(), AatError> {
        let reference_path = expected.value.trim();
        let reference = image::open(reference_path)
            .map_err(|e| {
                AatError::Assertion(format!("cannot read reference {reference_path:?}: {e}"))
            })?
            .to_luma8();

        let current_bytes = engine.screenshot().await?;
        let current = image::load_from_memory(&current_bytes)
            .map_err(|e| AatError::Assertion(format!("cannot decode screenshot: {e}")))?
            .to_luma8();

        // Compare at the live resolution.
        let reference = if reference.dimensions() != current.dimensions() {
            image::imageops::resize(
                &reference,
                current.width(),
                current.height(),
                image::imageops::FilterType::Triangle,
            )
        } else {
            reference
        };

        let similarity = normalized_similarity(reference.as_raw(), current.as_raw());
        let required = 1.0 - expected.tolerance;
        debug!("screenshot similarity {similarity:.4}, required {required:.4}");
        if similarity >= required {
            Ok(())
        } else {
            Err(AatError::Assertion(format!(
                "screenshot similarity {similarity:.4} below required {required:.4}"
            )))
        }
    }
}

/// Global normalized cross-correlation of two equal-length intensity
/// buffers, in [0, 1] for non-negative pixel data.
fn normalized_similarity(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        // Both all-black counts as identical, one-sided black as disjoint.
        return if norm_a == norm_b { 1.0 } else { 0.0 };
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
