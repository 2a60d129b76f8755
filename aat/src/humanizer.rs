//! Human-like input pacing: curved pointer paths and per-character typing
//! delays, so automated interaction does not look (or get throttled) like
//! a bot.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::time::Duration;
use tracing::debug;

use crate::config::HumanizerConfig;
use crate::engine::TestEngine;
use crate::errors::AatError;

/// Pointer samples per second, roughly one per display frame.
const SAMPLE_HZ: f64 = 60.0;
const MIN_SAMPLES: usize = 10;
/// Settle pause range after a gesture, in seconds.
const SETTLE_MIN: f64 = 0.1;
const SETTLE_MAX: f64 = 0.3;
/// Control-point jitter: fraction of the gesture span, with a pixel floor.
const JITTER_FRACTION: f64 = 0.1;
const JITTER_FLOOR: f64 = 10.0;

pub struct Humanizer {
    config: HumanizerConfig,
}

impl Humanizer {
    pub fn new(config: HumanizerConfig) -> Self {
        Self { config }
    }

    /// Move the pointer to (x, y). Disabled: one direct move. Enabled: a
    /// randomized Bezier path sampled at display rate, then a short settle
    /// pause before the caller's subsequent click.
    pub async fn move_to(&self, engine: &dyn TestEngine, x: i32, y: i32) -> Result<(), AatError> {
        if !self.config.enabled {
            return engine.move_mouse(x, y).await;
        }

        let (sx, sy) = engine.mouse_position().await?;
        let start = (sx as f64, sy as f64);
        let end = (x as f64, y as f64);

        // All randomness is sampled up front; the rng must not live across
        // the await points below.
        let (path, step_delay, settle) = {
            let mut rng = rand::rng();
            let duration = rng.random_range(self.config.mouse_speed_min..=self.config.mouse_speed_max);
            let samples = ((duration * SAMPLE_HZ) as usize).max(MIN_SAMPLES);
            let controls = control_points(start, end, self.config.bezier_control_points, &mut rng)?;
            let path: Vec<(i32, i32)> = (0..=samples)
                .map(|i| {
                    let t = i as f64 / samples as f64;
                    let (px, py) = bezier_point(&controls, t);
                    (px.round() as i32, py.round() as i32)
                })
                .collect();
            let step_delay = Duration::from_secs_f64(duration / samples as f64);
            let settle = Duration::from_secs_f64(rng.random_range(SETTLE_MIN..=SETTLE_MAX));
            (path, step_delay, settle)
        };

        debug!("humanized move to ({x}, {y}) in {} samples", path.len());
        for (px, py) in path {
            engine.move_mouse(px, py).await?;
            tokio::time::sleep(step_delay).await;
        }
        tokio::time::sleep(settle).await;
        Ok(())
    }

    /// Type `text`. Disabled: the whole string in one call. Enabled: one
    /// character at a time with an independent random delay per character.
    pub async fn type_text(&self, engine: &dyn TestEngine, text: &str) -> Result<(), AatError> {
        if !self.config.enabled {
            return engine.type_text(text).await;
        }

        let delays: Vec<Duration> = {
            let mut rng = rand::rng();
            text.chars()
                .map(|_| {
                    Duration::from_secs_f64(
                        rng.random_range(self.config.typing_delay_min..=self.config.typing_delay_max),
                    )
                })
                .collect()
        };

        let mut buf = [0u8; 4];
        for (ch, delay) in text.chars().zip(delays) {
            engine.type_text(ch.encode_utf8(&mut buf)).await?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Start and end plus `n` intermediate points spaced along the segment,
/// each perturbed by Gaussian noise scaled to the gesture span.
fn control_points(
    start: (f64, f64),
    end: (f64, f64),
    n: usize,
    rng: &mut impl Rng,
) -> Result<Vec<(f64, f64)>, AatError> {
    let span = ((end.0 - start.0).powi(2) + (end.1 - start.1).powi(2)).sqrt();
    let sd = (span * JITTER_FRACTION).max(JITTER_FLOOR);
    let normal = Normal::new(0.0, sd)
        .map_err(|e| AatError::InvalidArgument(format!("bad jitter distribution: {e}")))?;

    let mut points = Vec::with_capacity(n + 2);
    points.push(start);
    for i in 1..=n {
        let t = i as f64 / (n + 1) as f64;
        let base = (
            start.0 + (end.0 - start.0) * t,
            start.1 + (end.1 - start.1) * t,
        );
        points.push((base.0 + normal.sample(rng), base.1 + normal.sample(rng)));
    }
    points.push(end);
    Ok(points)
}

/// De Casteljau evaluation. Exact at the endpoints: t=0 yields the first
/// point, t=1 the last.
pub(crate) fn bezier_point(points: &[(f64, f64)], t: f64) -> (f64, f64) {
    debug_assert!(!points.is_empty());
    let mut pts = points.to_vec();
    let mut n = pts.len();
    while n > 1 {
        for i in 0..n - 1 {
            pts[i] = (
                pts[i].0 + (pts[i + 1].0 - pts[i].0) * t,
                pts[i].1 + (pts[i + 1].1 - pts[i].1) * t,
            );
        }
        n -= 1;
    }
    pts[0]
}
