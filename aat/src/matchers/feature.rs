//! Keypoint feature matching, the last-resort strategy for targets that
//! survive scaling and partial occlusion: FAST-9 corners described with
//! 256-bit BRIEF descriptors, matched by brute-force Hamming kNN with a
//! ratio test.

use async_trait::async_trait;
use image::GrayImage;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::MatchingConfig;
use crate::matchers::Matcher;
use crate::models::{MatchMethod, MatchResult, TargetSpec};

const FAST_THRESHOLD: i16 = 20;
const FAST_ARC: usize = 9;
const MAX_KEYPOINTS: usize = 500;
/// Keypoints closer than this to the border cannot hold a descriptor patch.
const PATCH_MARGIN: i32 = 18;
const DESCRIPTOR_BITS: usize = 256;
const RATIO: f32 = 0.75;
const MIN_GOOD_MATCHES: usize = 8;

/// Bresenham circle of radius 3 around the candidate pixel.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

pub struct FeatureMatcher {
    #[allow(dead_code)]
    config: MatchingConfig,
}

impl FeatureMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    fn match_target(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<(i32, i32, u32, u32, f32)> {
        let image_path = target.image.as_deref()?;
        let template = match image::open(image_path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("cannot read template image {image_path}: {e}");
                return None;
            }
        };
        let screen = match image::load_from_memory(screenshot) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("cannot decode screenshot: {e}");
                return None;
            }
        };

        let tmpl_kps = detect_keypoints(&template);
        let screen_kps = detect_keypoints(&screen);
        if tmpl_kps.is_empty() || screen_kps.len() < 2 {
            debug!(
                "feature: not enough keypoints (template={}, screen={})",
                tmpl_kps.len(),
                screen_kps.len()
            );
            return None;
        }

        let pattern = sampling_pattern();
        let tmpl_desc = describe(&template, &tmpl_kps, &pattern);
        let screen_desc = describe(&screen, &screen_kps, &pattern);

        // kNN k=2 with a Lowe ratio test; collect the scene-side positions
        // of every surviving match.
        let mut matched: Vec<(i32, i32)> = Vec::new();
        for desc in &tmpl_desc {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            let mut best_idx = 0usize;
            for (i, other) in screen_desc.iter().enumerate() {
                let d = hamming(desc, other);
                if d < best {
                    second = best;
                    best = d;
                    best_idx = i;
                } else if d < second {
                    second = d;
                }
            }
            if (best as f32) < RATIO * (second as f32) {
                let kp = &screen_kps[best_idx];
                matched.push((kp.x, kp.y));
            }
        }

        if matched.len() < MIN_GOOD_MATCHES {
            debug!(
                "feature: {} good matches, need {}",
                matched.len(),
                MIN_GOOD_MATCHES
            );
            return None;
        }

        let cx = matched.iter().map(|&(x, _)| x as i64).sum::<i64>() / matched.len() as i64;
        let cy = matched.iter().map(|&(_, y)| y as i64).sum::<i64>() / matched.len() as i64;
        let left = matched.iter().map(|&(x, _)| x).min()?;
        let right = matched.iter().map(|&(x, _)| x).max()?;
        let top = matched.iter().map(|&(_, y)| y).min()?;
        let bottom = matched.iter().map(|&(_, y)| y).max()?;

        let confidence = (matched.len() as f32 / tmpl_desc.len() as f32).min(1.0);
        Some((
            cx as i32,
            cy as i32,
            (right - left).max(1) as u32,
            (bottom - top).max(1) as u32,
            confidence,
        ))
    }
}

#[async_trait]
impl Matcher for FeatureMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Feature
    }

    fn can_handle(&self, target: &TargetSpec) -> bool {
        target.image.is_some()
    }

    async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        let start = Instant::now();
        let hit = self.match_target(target, screenshot);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        hit.map(|(cx, cy, w, h, confidence)| {
            let mut result = MatchResult::at(cx, cy, w, h, confidence, MatchMethod::Feature);
            result.elapsed_ms = elapsed;
            result
        })
    }
}

struct Keypoint {
    x: i32,
    y: i32,
    score: i32,
}

/// FAST-9 with non-maximum suppression, strongest `MAX_KEYPOINTS` kept.
fn detect_keypoints(img: &GrayImage) -> Vec<Keypoint> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if w <= 2 * PATCH_MARGIN || h <= 2 * PATCH_MARGIN {
        return Vec::new();
    }

    let px = |x: i32, y: i32| -> i16 { img.get_pixel(x as u32, y as u32).0[0] as i16 };

    let mut candidates: Vec<Keypoint> = Vec::new();
    for y in PATCH_MARGIN..h - PATCH_MARGIN {
        for x in PATCH_MARGIN..w - PATCH_MARGIN {
            if let Some(score) = fast_score(&px, x, y) {
                candidates.push(Keypoint { x, y, score });
            }
        }
    }

    // 3x3 non-maximum suppression over the sparse candidate set.
    let mut scores = std::collections::HashMap::new();
    for kp in &candidates {
        scores.insert((kp.x, kp.y), kp.score);
    }
    let mut kept: Vec<Keypoint> = candidates
        .into_iter()
        .filter(|kp| {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if (dx, dy) == (0, 0) {
                        continue;
                    }
                    if let Some(&s) = scores.get(&(kp.x + dx, kp.y + dy)) {
                        if s > kp.score {
                            return false;
                        }
                    }
                }
            }
            true
        })
        .collect();

    kept.sort_by(|a, b| b.score.cmp(&a.score));
    kept.truncate(MAX_KEYPOINTS);
    kept
}

/// Segment test: at least `FAST_ARC` contiguous circle pixels all brighter
/// than p + t or all darker than p - t. Returns the corner score, the sum
/// of absolute differences beyond the threshold.
fn fast_score(px: &impl Fn(i32, i32) -> i16, x: i32, y: i32) -> Option<i32> {
    let p = px(x, y);
    let ring: Vec<i16> = CIRCLE.iter().map(|&(dx, dy)| px(x + dx, y + dy)).collect();

    let mut is_corner = false;
    for darker in [false, true] {
        let mut run = 0usize;
        // Doubled ring handles wrap-around runs.
        for i in 0..CIRCLE.len() * 2 {
            let c = ring[i % CIRCLE.len()];
            let hit = if darker {
                c < p - FAST_THRESHOLD
            } else {
                c > p + FAST_THRESHOLD
            };
            if hit {
                run += 1;
                if run >= FAST_ARC {
                    is_corner = true;
                    break;
                }
            } else {
                run = 0;
            }
        }
        if is_corner {
            break;
        }
    }
    if !is_corner {
        return None;
    }

    let score: i32 = ring
        .iter()
        .map(|&c| ((c - p).abs() as i32 - FAST_THRESHOLD as i32).max(0))
        .sum();
    Some(score)
}

/// Deterministic BRIEF sampling pattern: 256 point pairs inside the patch,
/// drawn from a fixed-seed xorshift so descriptors are comparable across
/// runs and processes.
fn sampling_pattern() -> Vec<((i32, i32), (i32, i32))> {
    let mut state = 0x9e37_79b9u32;
    // Offsets stay within +/-13 so a 5x5 smoothing box fits the patch.
    let mut next_coord = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % 27) as i32 - 13
    };
    (0..DESCRIPTOR_BITS)
        .map(|_| ((next_coord(), next_coord()), (next_coord(), next_coord())))
        .collect()
}

/// 256-bit BRIEF over a box-smoothed patch.
fn describe(
    img: &GrayImage,
    keypoints: &[Keypoint],
    pattern: &[((i32, i32), (i32, i32))],
) -> Vec<[u64; 4]> {
    keypoints
        .iter()
        .map(|kp| {
            let mut desc = [0u64; 4];
            for (bit, &((ax, ay), (bx, by))) in pattern.iter().enumerate() {
                let a = smoothed(img, kp.x + ax, kp.y + ay);
                let b = smoothed(img, kp.x + bx, kp.y + by);
                if a < b {
                    desc[bit / 64] |= 1u64 << (bit % 64);
                }
            }
            desc
        })
        .collect()
}

/// Mean intensity of the 5x5 box centered on (x, y). Callers guarantee the
/// box lies inside the image via `PATCH_MARGIN`.
fn smoothed(img: &GrayImage, x: i32, y: i32) -> i32 {
    let mut sum = 0i32;
    for dy in -2..=2 {
        for dx in -2..=2 {
            sum += img.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as i32;
        }
    }
    sum / 25
}

fn hamming(a: &[u64; 4], b: &[u64; 4]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}
