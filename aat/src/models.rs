//! Data model: scenario steps, match targets and execution results.
//!
//! This module is a leaf: value types only, no engine or matcher imports.
//! Validity of the step/target combinations is enforced at construction,
//! so downstream components can assume well-formed input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AatError;

// ============================================================
// Enums
// ============================================================

/// Test step action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    // Navigation
    Navigate,
    GoBack,
    Refresh,
    // Locate + mouse
    FindAndClick,
    FindAndDoubleClick,
    FindAndRightClick,
    // Locate + keyboard
    FindAndType,
    FindAndClear,
    // Direct (coordinate / value)
    ClickAt,
    TypeText,
    PressKey,
    KeyCombo,
    // Assert
    Assert,
    // Utility
    Wait,
    Screenshot,
    Scroll,
}

impl ActionType {
    /// Actions that locate a target on screen before acting.
    pub fn is_find_action(&self) -> bool {
        matches!(
            self,
            ActionType::FindAndClick
                | ActionType::FindAndDoubleClick
                | ActionType::FindAndRightClick
                | ActionType::FindAndType
                | ActionType::FindAndClear
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Navigate => "navigate",
            ActionType::GoBack => "go_back",
            ActionType::Refresh => "refresh",
            ActionType::FindAndClick => "find_and_click",
            ActionType::FindAndDoubleClick => "find_and_double_click",
            ActionType::FindAndRightClick => "find_and_right_click",
            ActionType::FindAndType => "find_and_type",
            ActionType::FindAndClear => "find_and_clear",
            ActionType::ClickAt => "click_at",
            ActionType::TypeText => "type_text",
            ActionType::PressKey => "press_key",
            ActionType::KeyCombo => "key_combo",
            ActionType::Assert => "assert",
            ActionType::Wait => "wait",
            ActionType::Screenshot => "screenshot",
            ActionType::Scroll => "scroll",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Assert action sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertType {
    TextVisible,
    TextEquals,
    ImageVisible,
    UrlContains,
    ScreenshotMatch,
}

/// Matching algorithm used to locate a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Learned,
    Template,
    Ocr,
    Feature,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Learned => "learned",
            MatchMethod::Template => "template",
            MatchMethod::Ocr => "ocr",
            MatchMethod::Feature => "feature",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Individual step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

/// Failure analysis severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// How an AI-proposed fix is written and, for branch mode, committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Manual,
    Branch,
    Auto,
}

/// Icon hint label position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPosition {
    Above,
    Below,
    Left,
    Right,
    Inside,
}

// ============================================================
// Targets and steps
// ============================================================

/// Icon-based search hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconHint {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_position: Option<LabelPosition>,
}

impl IconHint {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            label: None,
            label_position: None,
        }
    }
}

/// A description of what to locate on screen.
///
/// At least one of image path, text or icon hint is required; construction
/// fails otherwise. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Path to the reference image for template/feature matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Text to locate via native search or OCR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconHint>,
    /// When set, only this matcher is tried; no chain fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_method: Option<MatchMethod>,
    /// Per-target confidence threshold override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl TargetSpec {
    pub fn new(
        image: Option<String>,
        text: Option<String>,
        icon: Option<IconHint>,
    ) -> Result<Self, AatError> {
        if image.is_none() && text.is_none() && icon.is_none() {
            return Err(AatError::InvalidArgument(
                "TargetSpec requires at least one of: image, text, icon".to_string(),
            ));
        }
        Ok(Self {
            image,
            text,
            icon,
            match_method: None,
            confidence: None,
        })
    }

    pub fn from_image(path: impl Into<String>) -> Self {
        Self {
            image: Some(path.into()),
            text: None,
            icon: None,
            match_method: None,
            confidence: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            image: None,
            text: Some(text.into()),
            icon: None,
            match_method: None,
            confidence: None,
        }
    }

    pub fn with_match_method(mut self, method: MatchMethod) -> Self {
        self.match_method = Some(method);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Human-readable identifier used in logs and learned-element records.
    pub fn display_name(&self) -> &str {
        self.image
            .as_deref()
            .or(self.text.as_deref())
            .or(self.icon.as_ref().map(|i| i.description.as_str()))
            .unwrap_or("unknown")
    }
}

/// Expected result assertion attached to a step or scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResult {
    pub assert_type: AssertType,
    pub value: String,
    /// Allowed dissimilarity for screenshot_match (similarity must reach
    /// 1 - tolerance).
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
}

fn default_tolerance() -> f32 {
    0.05
}

impl ExpectedResult {
    pub fn new(assert_type: AssertType, value: impl Into<String>) -> Self {
        Self {
            assert_type,
            value: value.into(),
            tolerance: default_tolerance(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Individual test step within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step number (1-based).
    pub step: u32,
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub description: String,
    #[serde(default = "default_true")]
    pub humanize: bool,
    #[serde(default)]
    pub screenshot_before: bool,
    #[serde(default)]
    pub screenshot_after: bool,
    #[serde(default = "default_step_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_type: Option<AssertType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected: Vec<ExpectedResult>,
}

fn default_true() -> bool {
    true
}

fn default_step_timeout() -> u64 {
    10_000
}

impl StepConfig {
    pub fn new(step: u32, action: ActionType, description: impl Into<String>) -> Self {
        Self {
            step,
            action,
            target: None,
            value: None,
            description: description.into(),
            humanize: true,
            screenshot_before: false,
            screenshot_after: false,
            timeout_ms: default_step_timeout(),
            optional: false,
            assert_type: None,
            expected: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_assert_type(mut self, assert_type: AssertType) -> Self {
        self.assert_type = Some(assert_type);
        self
    }

    pub fn with_expected(mut self, expected: ExpectedResult) -> Self {
        self.expected.push(expected);
        self
    }

    pub fn humanize(mut self, humanize: bool) -> Self {
        self.humanize = humanize;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn screenshot_before(mut self, enabled: bool) -> Self {
        self.screenshot_before = enabled;
        self
    }

    pub fn screenshot_after(mut self, enabled: bool) -> Self {
        self.screenshot_after = enabled;
        self
    }

    /// Finalize the step, enforcing action-dependent requirements.
    pub fn build(self) -> Result<Self, AatError> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), AatError> {
        if self.description.is_empty() {
            return Err(AatError::InvalidArgument(
                "step requires a description".to_string(),
            ));
        }
        if self.action.is_find_action() && self.target.is_none() {
            return Err(AatError::InvalidArgument(format!(
                "action={} requires a target",
                self.action
            )));
        }
        if self.action == ActionType::Assert && self.assert_type.is_none() {
            return Err(AatError::InvalidArgument(
                "action=assert requires assert_type".to_string(),
            ));
        }
        if self.action == ActionType::Navigate && self.value.as_deref().unwrap_or("").is_empty() {
            return Err(AatError::InvalidArgument(
                "action=navigate requires value (URL)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Test scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario ID in the form `SC-NNN`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<StepConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_result: Vec<ExpectedResult>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub variables: std::collections::HashMap<String, String>,
}

impl Scenario {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<StepConfig>,
    ) -> Result<Self, AatError> {
        let id = id.into();
        let name = name.into();
        if !is_valid_scenario_id(&id) {
            return Err(AatError::InvalidArgument(format!(
                "scenario id '{id}' does not match SC-NNN"
            )));
        }
        if name.is_empty() {
            return Err(AatError::InvalidArgument(
                "scenario requires a name".to_string(),
            ));
        }
        if steps.is_empty() {
            return Err(AatError::InvalidArgument(
                "scenario requires at least one step".to_string(),
            ));
        }
        for step in &steps {
            step.validate()?;
        }
        Ok(Self {
            id,
            name,
            description: String::new(),
            tags: Vec::new(),
            steps,
            expected_result: Vec::new(),
            variables: std::collections::HashMap::new(),
        })
    }
}

fn is_valid_scenario_id(id: &str) -> bool {
    match id.strip_prefix("SC-") {
        Some(digits) => digits.len() >= 3 && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

// ============================================================
// Results
// ============================================================

/// Result of one locate attempt. Produced once per find, never mutated
/// afterwards (the hybrid chain overwrites `elapsed_ms` before handing the
/// result out).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub found: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub method: MatchMethod,
    pub elapsed_ms: f64,
}

impl MatchResult {
    /// A successful match at the target center.
    pub fn at(x: i32, y: i32, width: u32, height: u32, confidence: f32, method: MatchMethod) -> Self {
        Self {
            found: true,
            x,
            y,
            width,
            height,
            confidence,
            method,
            elapsed_ms: 0.0,
        }
    }

    /// A miss. Carries no meaningful coordinates.
    pub fn miss(method: MatchMethod) -> Self {
        Self {
            found: false,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            confidence: 0.0,
            method,
            elapsed_ms: 0.0,
        }
    }
}

/// Outcome of one executed step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: u32,
    pub action: ActionType,
    pub status: StepStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated result of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    /// Aggregate step results; the run passes iff no step failed or errored.
    pub fn from_steps(
        scenario_id: impl Into<String>,
        scenario_name: impl Into<String>,
        steps: Vec<StepResult>,
    ) -> Self {
        let passed_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count();
        let failed_steps = steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed | StepStatus::Error))
            .count();
        let duration_ms = steps.iter().map(|s| s.elapsed_ms).sum();
        Self {
            scenario_id: scenario_id.into(),
            scenario_name: scenario_name.into(),
            passed: failed_steps == 0,
            total_steps: steps.len(),
            passed_steps,
            failed_steps,
            steps,
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================
// AI diagnosis / fix
// ============================================================

/// Individual file change proposed by an AI fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    /// File path relative to the project root.
    pub path: String,
    pub original: String,
    pub modified: String,
    #[serde(default)]
    pub description: String,
}

/// AI failure diagnosis. Immutable value from the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub cause: String,
    pub suggestion: String,
    pub severity: Severity,
    #[serde(default)]
    pub related_files: Vec<String>,
}

/// AI-proposed patch. Immutable value from the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub description: String,
    pub files_changed: Vec<FileChange>,
    pub confidence: f32,
}

// ============================================================
// Repair loop
// ============================================================

/// Single repair-loop iteration. Appended to [`LoopResult::iterations`],
/// never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopIteration {
    pub iteration: u32,
    pub test_result: TestResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LoopIteration {
    pub fn passed(iteration: u32, test_result: TestResult) -> Self {
        Self {
            iteration,
            test_result,
            analysis: None,
            fix: None,
            approved: None,
            branch_name: None,
            commit_hash: None,
            timestamp: Utc::now(),
        }
    }
}

/// Full repair-loop execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    pub success: bool,
    pub total_iterations: u32,
    pub iterations: Vec<LoopIteration>,
    /// Human-readable reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================
// Learning
// ============================================================

/// Durable record of a confirmed (screenshot state, coordinate) pair.
/// Owned exclusively by [`crate::learning::LearnedStore`]; `id` is assigned
/// on first persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub scenario_id: String,
    pub step_number: u32,
    pub target_name: String,
    pub screenshot_hash: String,
    pub correct_x: i32,
    pub correct_y: i32,
    pub cropped_image_path: String,
    pub confidence: f32,
    pub use_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
