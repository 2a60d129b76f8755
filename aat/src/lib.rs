//! AI-assisted test automation engine
//!
//! This crate is the core of a declarative browser/desktop test runner:
//! scenario steps are executed against a pluggable [`TestEngine`], on-screen
//! targets are located through a multi-strategy matcher chain, interactions
//! are optionally humanized, and failing runs are driven through a closed
//! fail -> diagnose -> fix -> retest repair loop backed by an AI adapter.
//!
//! The browser/OS backend, the AI provider and the report renderer are
//! consumed only as traits; any implementation satisfying the contracts in
//! [`engine`] and [`adapters`] is pluggable.

pub mod adapters;
pub mod comparator;
pub mod config;
pub mod devqa;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod git_ops;
pub mod humanizer;
pub mod learning;
pub mod matchers;
pub mod models;
#[cfg(test)]
mod tests;

pub use adapters::{AiAdapter, ApprovalHandler, Reporter};
pub use comparator::Comparator;
pub use config::{Config, HumanizerConfig, LoopConfig, MatchingConfig};
pub use devqa::{AutoFixStrategy, BranchFixStrategy, DevQALoop, FixOutcome, FixStrategy, ManualFixStrategy};
pub use engine::TestEngine;
pub use errors::AatError;
pub use executor::StepExecutor;
pub use git_ops::GitOps;
pub use humanizer::Humanizer;
pub use learning::{capture_learned_element, screenshot_hash, LearnedStore};
pub use matchers::{
    FeatureMatcher, HybridMatcher, LearnedMatcher, Matcher, OcrMatcher, OcrProvider, OcrWord,
    TemplateMatcher,
};
pub use models::{
    ActionType, AnalysisResult, ApprovalMode, AssertType, ExpectedResult, FileChange, FixResult,
    IconHint, LearnedElement, LoopIteration, LoopResult, MatchMethod, MatchResult, Scenario,
    Severity, StepConfig, StepResult, StepStatus, TargetSpec, TestResult,
};
