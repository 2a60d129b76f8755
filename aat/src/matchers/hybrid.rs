//! Chain orchestration over the registered matchers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::matchers::Matcher;
use crate::models::{MatchMethod, MatchResult, TargetSpec};

pub struct HybridMatcher {
    matchers: HashMap<MatchMethod, Arc<dyn Matcher>>,
    chain_order: Vec<MatchMethod>,
}

impl HybridMatcher {
    pub fn new(chain_order: Vec<MatchMethod>) -> Self {
        Self {
            matchers: HashMap::new(),
            chain_order,
        }
    }

    /// Register a matcher under its own method key, replacing any previous
    /// registration for that method.
    pub fn register(&mut self, matcher: Arc<dyn Matcher>) {
        self.matchers.insert(matcher.method(), matcher);
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.register(matcher);
        self
    }

    /// True when at least one registered matcher can handle the target.
    pub fn can_handle(&self, target: &TargetSpec) -> bool {
        self.matchers.values().any(|m| m.can_handle(target))
    }

    /// Walk the chain until one matcher succeeds.
    ///
    /// An explicit `target.match_method` bypasses the chain entirely: only
    /// that matcher runs, and an unregistered method is a miss with no
    /// fallback. The returned result's `elapsed_ms` is the total chain wall
    /// time, not the winning matcher's own time.
    #[instrument(skip(self, screenshot), fields(target = %target.display_name()))]
    pub async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        let start = Instant::now();
        let result = self.run_chain(target, screenshot).await;
        result.map(|mut r| {
            r.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            r
        })
    }

    async fn run_chain(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        if let Some(method) = target.match_method {
            let matcher = self.matchers.get(&method)?;
            if !matcher.can_handle(target) {
                debug!("explicit matcher {} cannot handle target", matcher.name());
                return None;
            }
            return matcher.find(target, screenshot).await;
        }

        for method in &self.chain_order {
            let Some(matcher) = self.matchers.get(method) else {
                continue;
            };
            if !matcher.can_handle(target) {
                continue;
            }
            if let Some(result) = matcher.find(target, screenshot).await {
                debug!("chain hit via {}", matcher.name());
                return Some(result);
            }
            debug!("{} missed, falling through", matcher.name());
        }

        // Targets carrying both an image and a text label get one more OCR
        // attempt before giving up.
        if target.image.is_some() && target.text.is_some() {
            if let Some(ocr) = self.matchers.get(&MatchMethod::Ocr) {
                if ocr.can_handle(target) {
                    debug!("chain exhausted, retrying ocr as last resort");
                    return ocr.find(target, screenshot).await;
                }
            }
        }

        None
    }
}
