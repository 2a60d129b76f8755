//! Per-step execution: dispatches one [`StepConfig`] against the engine and
//! always produces a [`StepResult`], whatever goes wrong.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::comparator::Comparator;
use crate::engine::TestEngine;
use crate::errors::AatError;
use crate::humanizer::Humanizer;
use crate::matchers::HybridMatcher;
use crate::models::{
    ActionType, AssertType, ExpectedResult, MatchMethod, MatchResult, StepConfig, StepResult,
    StepStatus,
};

const DEFAULT_WAIT_MS: u64 = 1000;

/// What a dispatched action produced besides pass/fail.
#[derive(Default)]
struct StepOutput {
    match_result: Option<MatchResult>,
    screenshot: Option<String>,
}

pub struct StepExecutor {
    engine: Arc<dyn TestEngine>,
    matcher: Arc<HybridMatcher>,
    humanizer: Humanizer,
    screenshots_dir: PathBuf,
}

impl StepExecutor {
    pub fn new(
        engine: Arc<dyn TestEngine>,
        matcher: Arc<HybridMatcher>,
        humanizer: Humanizer,
        screenshots_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            matcher,
            humanizer,
            screenshots_dir,
        }
    }

    /// Run one step. Never fails outward; every failure mode lands in the
    /// returned result's status and error_message.
    #[instrument(skip(self, step), fields(step = step.step, action = %step.action))]
    pub async fn execute_step(&self, step: &StepConfig) -> StepResult {
        let start = Instant::now();
        let timestamp = Utc::now();

        let screenshot_before = if step.screenshot_before {
            self.capture("before").await
        } else {
            None
        };

        let mut outcome = self.dispatch(step).await;

        let mut screenshot_after = if step.screenshot_after {
            self.capture("after").await
        } else {
            None
        };

        if let Ok(output) = &mut outcome {
            if let Some(path) = output.screenshot.take() {
                screenshot_after = Some(path);
            }
        }

        // The step's own assertions only run when the action itself worked.
        if outcome.is_ok() {
            for expected in &step.expected {
                if let Err(e) = Comparator::check(expected, self.engine.as_ref()).await {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let (status, match_result, error_message) = match outcome {
            Ok(output) => (StepStatus::Passed, output.match_result, None),
            Err(e) => {
                let status = match &e {
                    AatError::MatchFailed(_) if step.optional => StepStatus::Skipped,
                    e if e.is_step_level() => StepStatus::Failed,
                    _ => StepStatus::Error,
                };
                if status == StepStatus::Skipped {
                    debug!("optional step {} skipped: {e}", step.step);
                } else {
                    warn!("step {} {status:?}: {e}", step.step);
                }
                (status, None, Some(e.to_string()))
            }
        };

        StepResult {
            step: step.step,
            action: step.action,
            status,
            description: step.description.clone(),
            match_result,
            screenshot_before,
            screenshot_after,
            error_message,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            timestamp,
        }
    }

    async fn dispatch(&self, step: &StepConfig) -> Result<StepOutput, AatError> {
        let engine = self.engine.as_ref();
        match step.action {
            ActionType::Navigate => {
                engine.navigate(required_value(step)?).await?;
                Ok(StepOutput::default())
            }
            ActionType::GoBack => {
                engine.go_back().await?;
                Ok(StepOutput::default())
            }
            ActionType::Refresh => {
                engine.refresh().await?;
                Ok(StepOutput::default())
            }
            ActionType::FindAndClick => {
                let found = self.locate(step).await?;
                self.pointer_to(step, found.x, found.y).await?;
                engine.click(found.x, found.y).await?;
                Ok(StepOutput {
                    match_result: Some(found),
                    screenshot: None,
                })
            }
            ActionType::FindAndDoubleClick => {
                let found = self.locate(step).await?;
                self.pointer_to(step, found.x, found.y).await?;
                engine.double_click(found.x, found.y).await?;
                Ok(StepOutput {
                    match_result: Some(found),
                    screenshot: None,
                })
            }
            ActionType::FindAndRightClick => {
                let found = self.locate(step).await?;
                self.pointer_to(step, found.x, found.y).await?;
                engine.right_click(found.x, found.y).await?;
                Ok(StepOutput {
                    match_result: Some(found),
                    screenshot: None,
                })
            }
            ActionType::FindAndType => {
                let text = required_value(step)?.to_string();
                let found = self.locate(step).await?;
                self.pointer_to(step, found.x, found.y).await?;
                engine.click(found.x, found.y).await?;
                self.keyboard(step, &text).await?;
                Ok(StepOutput {
                    match_result: Some(found),
                    screenshot: None,
                })
            }
            ActionType::FindAndClear => {
                let found = self.locate(step).await?;
                self.pointer_to(step, found.x, found.y).await?;
                engine.click(found.x, found.y).await?;
                engine.key_combo(&["ctrl", "a"]).await?;
                engine.press_key("Delete").await?;
                Ok(StepOutput {
                    match_result: Some(found),
                    screenshot: None,
                })
            }
            ActionType::ClickAt => {
                let (x, y) = parse_xy(required_value(step)?)?;
                self.pointer_to(step, x, y).await?;
                engine.click(x, y).await?;
                Ok(StepOutput::default())
            }
            ActionType::TypeText => {
                self.keyboard(step, required_value(step)?).await?;
                Ok(StepOutput::default())
            }
            ActionType::PressKey => {
                engine.press_key(required_value(step)?).await?;
                Ok(StepOutput::default())
            }
            ActionType::KeyCombo => {
                let combo = required_value(step)?;
                let keys: Vec<&str> = combo.split('+').map(str::trim).collect();
                engine.key_combo(&keys).await?;
                Ok(StepOutput::default())
            }
            ActionType::Assert => self.run_assert(step).await,
            ActionType::Wait => {
                let ms = step
                    .value
                    .as_deref()
                    .map(|v| {
                        v.trim().parse::<u64>().map_err(|_| {
                            AatError::InvalidArgument(format!("invalid wait duration {v:?}"))
                        })
                    })
                    .transpose()?
                    .unwrap_or(DEFAULT_WAIT_MS);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(StepOutput::default())
            }
            ActionType::Screenshot => {
                std::fs::create_dir_all(&self.screenshots_dir)?;
                let path = self
                    .screenshots_dir
                    .join(format!("shot-{}.png", Uuid::new_v4()));
                engine.save_screenshot(&path).await?;
                Ok(StepOutput {
                    match_result: None,
                    screenshot: Some(path.to_string_lossy().into_owned()),
                })
            }
            ActionType::Scroll => {
                let (x, y, delta) = parse_scroll(required_value(step)?)?;
                engine.scroll(x, y, delta).await?;
                Ok(StepOutput::default())
            }
        }
    }

    /// Resolve a find_and_* target: native text search first when the
    /// target carries text, the matcher chain otherwise.
    async fn locate(&self, step: &StepConfig) -> Result<MatchResult, AatError> {
        let target = step.target.as_ref().ok_or_else(|| {
            AatError::InvalidArgument(format!("action={} requires a target", step.action))
        })?;

        if let Some(text) = target.text.as_deref() {
            match self.engine.find_text_position(text).await {
                Ok(Some((x, y))) => {
                    debug!("native text hit for {text:?} at ({x}, {y})");
                    return Ok(MatchResult::at(x, y, 0, 0, 1.0, MatchMethod::Ocr));
                }
                Ok(None) => {}
                Err(e) => warn!("native text search failed, falling back: {e}"),
            }
        }

        let screenshot = self.engine.screenshot().await?;
        self.matcher
            .find(target, &screenshot)
            .await
            .ok_or_else(|| {
                AatError::MatchFailed(format!("target {:?} not found", target.display_name()))
            })
    }

    async fn run_assert(&self, step: &StepConfig) -> Result<StepOutput, AatError> {
        let assert_type = step.assert_type.ok_or_else(|| {
            AatError::InvalidArgument("action=assert requires assert_type".to_string())
        })?;

        // image_visible is resolved by the matcher chain, not the comparator.
        if assert_type == AssertType::ImageVisible {
            let found = self.locate(step).await?;
            return Ok(StepOutput {
                match_result: Some(found),
                screenshot: None,
            });
        }

        let expected = ExpectedResult::new(
            assert_type,
            step.value.clone().unwrap_or_default(),
        );
        Comparator::check(&expected, self.engine.as_ref()).await?;
        Ok(StepOutput::default())
    }

    async fn pointer_to(&self, step: &StepConfig, x: i32, y: i32) -> Result<(), AatError> {
        if step.humanize {
            self.humanizer.move_to(self.engine.as_ref(), x, y).await
        } else {
            self.engine.move_mouse(x, y).await
        }
    }

    async fn keyboard(&self, step: &StepConfig, text: &str) -> Result<(), AatError> {
        if step.humanize {
            self.humanizer.type_text(self.engine.as_ref(), text).await
        } else {
            self.engine.type_text(text).await
        }
    }

    async fn capture(&self, tag: &str) -> Option<String> {
        if let Err(e) = std::fs::create_dir_all(&self.screenshots_dir) {
            warn!("cannot create screenshot dir: {e}");
            return None;
        }
        let path = self
            .screenshots_dir
            .join(format!("{tag}-{}.png", Uuid::new_v4()));
        match self.engine.save_screenshot(&path).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("cannot capture {tag} screenshot: {e}");
                None
            }
        }
    }
}

fn required_value(step: &StepConfig) -> Result<&str, AatError> {
    step.value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
        AatError::InvalidArgument(format!("action={} requires a value", step.action))
    })
}

/// Parse an "x,y" coordinate value.
fn parse_xy(value: &str) -> Result<(i32, i32), AatError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if let [x, y] = parts[..] {
        if let (Ok(x), Ok(y)) = (x.parse(), y.parse()) {
            return Ok((x, y));
        }
    }
    Err(AatError::InvalidArgument(format!(
        "expected \"x,y\", got {value:?}"
    )))
}

/// Parse an "x,y,delta" scroll value.
fn parse_scroll(value: &str) -> Result<(i32, i32, i32), AatError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if let [x, y, delta] = parts[..] {
        if let (Ok(x), Ok(y), Ok(delta)) = (x.parse(), y.parse(), delta.parse()) {
            return Ok((x, y, delta));
        }
    }
    Err(AatError::InvalidArgument(format!(
        "expected \"x,y,delta\", got {value:?}"
    )))
}
