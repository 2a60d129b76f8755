//! Target matchers: independent locating strategies behind one contract,
//! composed by [`HybridMatcher`] into a deterministic fallback chain.

use async_trait::async_trait;

use crate::models::{MatchMethod, MatchResult, TargetSpec};

mod feature;
mod hybrid;
mod learned;
mod ocr;
mod template;

pub use feature::FeatureMatcher;
pub use hybrid::HybridMatcher;
pub use learned::LearnedMatcher;
pub use ocr::{OcrMatcher, OcrProvider, OcrWord};
pub use template::TemplateMatcher;

/// Common matcher contract.
///
/// `find` never fails outward: internal errors are logged and yield `None`,
/// so one broken matcher cannot abort the chain.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Short name for logging: "template", "ocr", ...
    fn name(&self) -> &'static str {
        self.method().as_str()
    }

    /// The method this matcher implements, used as its key in the chain.
    fn method(&self) -> MatchMethod;

    /// Whether this matcher can do anything with the given target
    /// (e.g. template matching requires a reference image).
    fn can_handle(&self, target: &TargetSpec) -> bool;

    /// Locate the target in the screenshot (encoded PNG/JPEG bytes).
    async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult>;
}
