//! Capability traits consumed by the repair loop: AI diagnosis/fix,
//! report generation and fix approval.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::AatError;
use crate::models::{AnalysisResult, FixResult, TestResult};

/// AI provider contract. Implementations wrap a concrete model API.
#[async_trait]
pub trait AiAdapter: Send + Sync {
    /// Diagnose a failed run: root cause, suggestion, related source files.
    async fn analyze_failure(&self, result: &TestResult) -> Result<AnalysisResult, AatError>;

    /// Propose a concrete patch given the diagnosis and the current contents
    /// of the related source files (path -> contents).
    async fn generate_fix(
        &self,
        analysis: &AnalysisResult,
        source_files: &HashMap<String, String>,
    ) -> Result<FixResult, AatError>;
}

/// Report renderer contract. Returns the path of the generated report.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn generate(&self, result: &TestResult, output_dir: &Path) -> Result<PathBuf, AatError>;
}

/// Approval channel: invoked exactly once per failed iteration with the
/// analysis text, before any fix is generated or applied.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve(&self, analysis_text: &str) -> bool;
}
