//! OCR text matching. Recognition itself lives behind [`OcrProvider`];
//! this matcher only searches the recognized words.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::MatchingConfig;
use crate::errors::AatError;
use crate::matchers::Matcher;
use crate::models::{MatchMethod, MatchResult, TargetSpec};

/// One recognized word with its screen box and layout coordinates.
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// Text recognition backend (Tesseract, a platform OCR API, a mock).
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn recognize(&self, screenshot: &[u8]) -> Result<Vec<OcrWord>, AatError>;
}

pub struct OcrMatcher {
    provider: Arc<dyn OcrProvider>,
    config: MatchingConfig,
}

impl OcrMatcher {
    pub fn new(provider: Arc<dyn OcrProvider>, config: MatchingConfig) -> Self {
        Self { provider, config }
    }

    /// Two-tier search: the best single word containing the query first,
    /// then full lines reassembled from the provider's layout coordinates.
    /// The threshold applies per tier, so a weak token hit still falls
    /// through to line grouping. Returns center, box and confidence of the
    /// best hit at or above `threshold`.
    fn search(
        &self,
        words: &[OcrWord],
        query: &str,
        threshold: f32,
    ) -> Option<(i32, i32, u32, u32, f32)> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        let token = words
            .iter()
            .filter(|w| w.text.to_lowercase().contains(&query))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        if let Some(word) = token {
            if word.confidence >= threshold {
                let cx = word.x + (word.width / 2) as i32;
                let cy = word.y + (word.height / 2) as i32;
                return Some((cx, cy, word.width, word.height, word.confidence));
            }
            debug!(
                "best token for {query:?} below threshold ({:.3} < {threshold:.3}), \
                 trying line grouping",
                word.confidence
            );
        }

        // Group into lines, preserving word order within each line.
        let mut lines: BTreeMap<(u32, u32, u32), Vec<&OcrWord>> = BTreeMap::new();
        for word in words {
            lines
                .entry((word.block, word.paragraph, word.line))
                .or_default()
                .push(word);
        }

        let mut best: Option<(i32, i32, u32, u32, f32)> = None;
        for line_words in lines.values() {
            if let Some(hit) = search_line(line_words, &query) {
                if hit.4 >= threshold && best.map_or(true, |b| hit.4 > b.4) {
                    best = Some(hit);
                }
            }
        }
        best
    }
}

#[async_trait]
impl Matcher for OcrMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Ocr
    }

    fn can_handle(&self, target: &TargetSpec) -> bool {
        target.text.is_some()
    }

    async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        let start = Instant::now();
        let query = target.text.as_deref()?;
        let words = match self.provider.recognize(screenshot).await {
            Ok(words) => words,
            Err(e) => {
                warn!("ocr recognition failed: {e}");
                return None;
            }
        };

        let threshold = target.confidence.unwrap_or(self.config.confidence_threshold);
        let hit = self.search(&words, query, threshold)?;
        let mut result = MatchResult::at(hit.0, hit.1, hit.2, hit.3, hit.4, MatchMethod::Ocr);
        result.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Some(result)
    }
}

/// Match `query` against the whole line text and return the union box of
/// the words the query spans, with the mean confidence of those words.
fn search_line(words: &[&OcrWord], query: &str) -> Option<(i32, i32, u32, u32, f32)> {
    let lowered: Vec<String> = words.iter().map(|w| w.text.to_lowercase()).collect();
    let joined = lowered.join(" ");
    let q_start = joined.find(query)?;
    let q_end = q_start + query.len();

    // Map the matched byte range back onto word indices.
    let mut spanned: Vec<&OcrWord> = Vec::new();
    let mut offset = 0usize;
    for (word, low) in words.iter().zip(lowered.iter()) {
        let w_start = offset;
        let w_end = offset + low.len();
        if w_start < q_end && w_end > q_start {
            spanned.push(word);
        }
        offset = w_end + 1; // joining space
    }
    if spanned.is_empty() {
        return None;
    }

    let left = spanned.iter().map(|w| w.x).min()?;
    let top = spanned.iter().map(|w| w.y).min()?;
    let right = spanned.iter().map(|w| w.x + w.width as i32).max()?;
    let bottom = spanned.iter().map(|w| w.y + w.height as i32).max()?;
    let confidence =
        spanned.iter().map(|w| w.confidence).sum::<f32>() / spanned.len() as f32;

    let width = (right - left).max(0) as u32;
    let height = (bottom - top).max(0) as u32;
    Some((
        left + (width / 2) as i32,
        top + (height / 2) as i32,
        width,
        height,
        confidence,
    ))
}
