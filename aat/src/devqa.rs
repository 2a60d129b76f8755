//! The fail, diagnose, fix, retest loop.
//!
//! Fix application is a capability ([`FixStrategy`]) with three
//! interchangeable implementations, so the loop itself never branches on
//! the configured mode beyond picking one at construction time.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AiAdapter, ApprovalHandler, Reporter};
use crate::config::LoopConfig;
use crate::engine::TestEngine;
use crate::errors::AatError;
use crate::executor::StepExecutor;
use crate::git_ops::GitOps;
use crate::models::{
    AnalysisResult, FixResult, LoopIteration, LoopResult, Scenario, TestResult,
};

/// Where a fix landed. Branch name and commit hash are only present for
/// the branch strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixOutcome {
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
}

/// How a generated fix is written out.
#[async_trait]
pub trait FixStrategy: Send + Sync {
    /// Precondition check, run once before the loop starts.
    async fn validate(&self) -> Result<(), AatError> {
        Ok(())
    }

    async fn apply_fix(&self, fix: &FixResult) -> Result<FixOutcome, AatError>;
}

/// Write proposed files straight into the source tree; the operator
/// reviews and commits by hand.
pub struct ManualFixStrategy {
    source_path: PathBuf,
}

impl ManualFixStrategy {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
        }
    }
}

#[async_trait]
impl FixStrategy for ManualFixStrategy {
    async fn apply_fix(&self, fix: &FixResult) -> Result<FixOutcome, AatError> {
        write_changes(&self.source_path, fix).await?;
        Ok(FixOutcome::default())
    }
}

/// Identical file handling to [`ManualFixStrategy`]; callers pair it with
/// an always-approving handler for unattended runs.
pub struct AutoFixStrategy {
    source_path: PathBuf,
}

impl AutoFixStrategy {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
        }
    }
}

#[async_trait]
impl FixStrategy for AutoFixStrategy {
    async fn apply_fix(&self, fix: &FixResult) -> Result<FixOutcome, AatError> {
        write_changes(&self.source_path, fix).await?;
        Ok(FixOutcome::default())
    }
}

async fn write_changes(source_path: &Path, fix: &FixResult) -> Result<(), AatError> {
    for change in &fix.files_changed {
        let path = source_path.join(&change.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &change.modified).await?;
        debug!("applied fix to {}", path.display());
    }
    Ok(())
}

/// Apply and commit each fix on its own `aat/fix-NNN` branch, restoring
/// the entry branch afterwards.
pub struct BranchFixStrategy {
    git: GitOps,
    counter: AtomicU32,
}

impl BranchFixStrategy {
    pub fn new(git: GitOps) -> Self {
        Self {
            git,
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FixStrategy for BranchFixStrategy {
    async fn validate(&self) -> Result<(), AatError> {
        if !self.git.is_git_repo().await {
            return Err(AatError::GitOps(format!(
                "{} is not a git repository",
                self.git.repo_path().display()
            )));
        }
        if self.git.has_uncommitted_changes().await? {
            return Err(AatError::GitOps(
                "repository has uncommitted changes".to_string(),
            ));
        }
        Ok(())
    }

    async fn apply_fix(&self, fix: &FixResult) -> Result<FixOutcome, AatError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let branch = format!("aat/fix-{n:03}");
        let message = format!("aat: {}", fix.description);

        let commit = self
            .git
            .on_fix_branch(&branch, || async {
                self.git.apply_file_changes(&fix.files_changed).await?;
                self.git.commit_changes(&message).await
            })
            .await?;

        info!("fix committed as {commit} on {branch}");
        Ok(FixOutcome {
            branch_name: Some(branch),
            commit_hash: Some(commit),
        })
    }
}

pub struct DevQALoop {
    engine: Arc<dyn TestEngine>,
    executor: Arc<StepExecutor>,
    ai: Arc<dyn AiAdapter>,
    reporter: Arc<dyn Reporter>,
    approval: Arc<dyn ApprovalHandler>,
    strategy: Arc<dyn FixStrategy>,
    config: LoopConfig,
}

impl DevQALoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn TestEngine>,
        executor: Arc<StepExecutor>,
        ai: Arc<dyn AiAdapter>,
        reporter: Arc<dyn Reporter>,
        approval: Arc<dyn ApprovalHandler>,
        strategy: Arc<dyn FixStrategy>,
        config: LoopConfig,
    ) -> Self {
        Self {
            engine,
            executor,
            ai,
            reporter,
            approval,
            strategy,
            config,
        }
    }

    /// Run the repair loop over the scenarios. With `manage_engine` the
    /// engine is started before the first iteration and stopped at the end
    /// whatever the outcome; pass false when the caller owns the engine
    /// lifecycle.
    #[instrument(skip_all, fields(scenarios = scenarios.len()))]
    pub async fn run(
        &self,
        scenarios: &[Scenario],
        manage_engine: bool,
    ) -> Result<LoopResult, AatError> {
        self.strategy.validate().await?;

        if manage_engine {
            self.engine.start().await?;
        }
        let result = self.run_iterations(scenarios).await;
        if manage_engine {
            if let Err(e) = self.engine.stop().await {
                warn!("engine stop failed: {e}");
            }
        }
        result
    }

    async fn run_iterations(&self, scenarios: &[Scenario]) -> Result<LoopResult, AatError> {
        let start = Instant::now();
        let started_at = Utc::now();
        let mut iterations: Vec<LoopIteration> = Vec::new();

        for iteration in 1..=self.config.max_loops {
            info!("iteration {iteration}/{}", self.config.max_loops);
            let test_result = self.execute_scenarios(scenarios).await;

            if test_result.passed {
                if let Err(e) = self
                    .reporter
                    .generate(&test_result, &self.config.reports_dir)
                    .await
                {
                    warn!("report generation failed: {e}");
                }
                iterations.push(LoopIteration::passed(iteration, test_result));
                return Ok(LoopResult {
                    success: true,
                    total_iterations: iteration,
                    iterations,
                    reason: None,
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    timestamp: started_at,
                });
            }

            info!(
                "iteration {iteration} failed ({} of {} steps)",
                test_result.failed_steps, test_result.total_steps
            );
            let analysis = self
                .ai
                .analyze_failure(&test_result)
                .await
                .map_err(|e| AatError::Loop(format!("failure analysis failed: {e}")))?;
            let analysis_text = format!("{}: {}", analysis.cause, analysis.suggestion);

            // The operator decides before any fix is generated; a denial
            // must not cost an AI call.
            if !self.approval.approve(&analysis_text).await {
                iterations.push(iteration_record(
                    iteration,
                    test_result,
                    analysis,
                    None,
                    Some(false),
                    FixOutcome::default(),
                ));
                return Ok(LoopResult {
                    success: false,
                    total_iterations: iteration,
                    iterations,
                    reason: Some("user denied fix".to_string()),
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    timestamp: started_at,
                });
            }

            let sources = self.read_related_files(&analysis).await;
            let fix = self
                .ai
                .generate_fix(&analysis, &sources)
                .await
                .map_err(|e| AatError::Loop(format!("fix generation failed: {e}")))?;
            let outcome = self.strategy.apply_fix(&fix).await?;

            iterations.push(iteration_record(
                iteration,
                test_result,
                analysis,
                Some(fix),
                Some(true),
                outcome,
            ));
            // Next iteration re-runs the scenarios against the fixed tree.
        }

        Ok(LoopResult {
            success: false,
            total_iterations: self.config.max_loops,
            iterations,
            reason: Some("max loops exceeded".to_string()),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            timestamp: started_at,
        })
    }

    /// One pass over every step of every scenario, aggregated into a single
    /// result; a later scenario still runs when an earlier one failed.
    async fn execute_scenarios(&self, scenarios: &[Scenario]) -> TestResult {
        let mut steps = Vec::new();
        for scenario in scenarios {
            debug!("running scenario {} ({})", scenario.id, scenario.name);
            for step in &scenario.steps {
                steps.push(self.executor.execute_step(step).await);
            }
        }
        let (id, name) = scenarios
            .first()
            .map(|s| (s.id.clone(), s.name.clone()))
            .unwrap_or_default();
        TestResult::from_steps(id, name, steps)
    }

    async fn read_related_files(&self, analysis: &AnalysisResult) -> HashMap<String, String> {
        let mut sources = HashMap::new();
        for path in &analysis.related_files {
            let full = self.config.source_path.join(path);
            match tokio::fs::read_to_string(&full).await {
                Ok(contents) => {
                    sources.insert(path.clone(), contents);
                }
                Err(e) => warn!("cannot read related file {}: {e}", full.display()),
            }
        }
        sources
    }
}

fn iteration_record(
    iteration: u32,
    test_result: TestResult,
    analysis: AnalysisResult,
    fix: Option<FixResult>,
    approved: Option<bool>,
    outcome: FixOutcome,
) -> LoopIteration {
    LoopIteration {
        iteration,
        test_result,
        analysis: Some(analysis),
        fix,
        approved,
        branch_name: outcome.branch_name,
        commit_hash: outcome.commit_hash,
        timestamp: Utc::now(),
    }
}
