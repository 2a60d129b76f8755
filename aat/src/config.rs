//! Engine configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::AatError;
use crate::models::{ApprovalMode, MatchMethod};

/// Target matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Default confidence threshold, overridable per target.
    pub confidence_threshold: f32,
    /// Template matching: sweep a scale range when the original scale misses.
    pub multi_scale: bool,
    pub scale_range_min: f32,
    pub scale_range_max: f32,
    /// Match on grayscale planes instead of full color.
    pub grayscale: bool,
    /// Fallback order for the hybrid chain.
    pub chain_order: Vec<MatchMethod>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            multi_scale: true,
            scale_range_min: 0.5,
            scale_range_max: 2.0,
            grayscale: true,
            chain_order: vec![
                MatchMethod::Learned,
                MatchMethod::Template,
                MatchMethod::Ocr,
                MatchMethod::Feature,
            ],
        }
    }
}

/// Humanized input configuration. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizerConfig {
    pub enabled: bool,
    /// Pointer gesture duration range.
    pub mouse_speed_min: f64,
    pub mouse_speed_max: f64,
    /// Per-character typing delay range.
    pub typing_delay_min: f64,
    pub typing_delay_max: f64,
    /// Number of randomized Bezier control points between start and end.
    pub bezier_control_points: usize,
}

impl Default for HumanizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mouse_speed_min: 0.5,
            mouse_speed_max: 1.2,
            typing_delay_min: 0.05,
            typing_delay_max: 0.15,
            bezier_control_points: 3,
        }
    }
}

/// Repair-loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Iteration budget: the loop enters its run state at most this many times.
    pub max_loops: u32,
    pub approval_mode: ApprovalMode,
    /// Root of the source tree fixes are written into.
    pub source_path: PathBuf,
    pub reports_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    /// Durable state (learned-element database, crops).
    pub data_dir: PathBuf,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loops: 10,
            approval_mode: ApprovalMode::Manual,
            source_path: PathBuf::from("."),
            reports_dir: PathBuf::from("reports"),
            screenshots_dir: PathBuf::from(".aat/screenshots"),
            data_dir: PathBuf::from(".aat"),
        }
    }
}

/// Top-level project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_name: String,
    pub url: String,
    pub matching: MatchingConfig,
    pub humanizer: HumanizerConfig,
    pub devqa: LoopConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// defaults; an unreadable or malformed file is an error.
    pub fn from_toml_path(path: &Path) -> Result<Self, AatError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AatError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| AatError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}
