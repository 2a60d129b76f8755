//! Exact-state replay: when the current screenshot hashes to a state we
//! have seen before, reuse the confirmed coordinates without any image
//! matching.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::learning::{screenshot_hash, LearnedStore};
use crate::matchers::Matcher;
use crate::models::{MatchMethod, MatchResult, TargetSpec};

pub struct LearnedMatcher {
    store: Arc<LearnedStore>,
}

impl LearnedMatcher {
    pub fn new(store: Arc<LearnedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Matcher for LearnedMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Learned
    }

    // A lookup is always worth a try; a miss just falls through the chain.
    fn can_handle(&self, _target: &TargetSpec) -> bool {
        true
    }

    async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        let start = Instant::now();
        let hash = screenshot_hash(screenshot);
        let candidates = match self.store.find_by_hash(&hash) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("learned lookup failed: {e}");
                return None;
            }
        };

        let name = target.display_name();
        let element = candidates.into_iter().find(|el| el.target_name == name)?;
        debug!(
            "learned hit for {name:?} at ({}, {})",
            element.correct_x, element.correct_y
        );

        if let Some(id) = element.id {
            if let Err(e) = self.store.increment_use_count(id) {
                warn!("use_count update failed for id={id}: {e}");
            }
        }

        let mut result = MatchResult::at(
            element.correct_x,
            element.correct_y,
            0,
            0,
            element.confidence,
            MatchMethod::Learned,
        );
        result.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Some(result)
    }
}
