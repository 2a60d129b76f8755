//! Template matching: zero-mean normalized cross-correlation, with an
//! optional multi-scale sweep for resolution-mismatched templates.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::MatchingConfig;
use crate::matchers::Matcher;
use crate::models::{MatchMethod, MatchResult, TargetSpec};

/// Scales within this distance of 1.0 duplicate the original-scale pass.
const NEAR_ORIGINAL: f32 = 0.05;
/// Number of scales sampled across the configured range.
const NUM_SCALES: usize = 11;

pub struct TemplateMatcher {
    config: MatchingConfig,
}

impl TemplateMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    fn threshold_for(&self, target: &TargetSpec) -> f32 {
        target.confidence.unwrap_or(self.config.confidence_threshold)
    }

    fn match_target(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<(i32, i32, u32, u32, f32)> {
        let image_path = target.image.as_deref()?;
        let template = match image::open(image_path) {
            Ok(img) => img,
            Err(e) => {
                warn!("cannot read template image {image_path}: {e}");
                return None;
            }
        };
        let screen = match image::load_from_memory(screenshot) {
            Ok(img) => img,
            Err(e) => {
                warn!("cannot decode screenshot: {e}");
                return None;
            }
        };

        let screen_plane = Plane::from_image(&screen, self.config.grayscale);
        let threshold = self.threshold_for(target);

        if self.config.multi_scale {
            self.multi_scale_match(&screen_plane, &template, threshold)
        } else {
            self.single_scale_match(&screen_plane, &template, threshold)
        }
    }

    fn single_scale_match(
        &self,
        screen: &Plane,
        template: &DynamicImage,
        threshold: f32,
    ) -> Option<(i32, i32, u32, u32, f32)> {
        let tmpl = Plane::from_image(template, self.config.grayscale);
        let (left, top, score) = best_correlation(screen, &tmpl)?;
        if score < threshold {
            debug!("template single-scale: best={score:.3} < threshold={threshold:.3}");
            return None;
        }
        let cx = left as i32 + (tmpl.width / 2) as i32;
        let cy = top as i32 + (tmpl.height / 2) as i32;
        Some((cx, cy, tmpl.width, tmpl.height, score))
    }

    fn multi_scale_match(
        &self,
        screen: &Plane,
        template: &DynamicImage,
        threshold: f32,
    ) -> Option<(i32, i32, u32, u32, f32)> {
        // The original scale has no resize artifacts, so it is always tried
        // first and wins outright when it clears the threshold.
        if let Some(hit) = self.single_scale_match(screen, template, threshold) {
            return Some(hit);
        }

        let (tw, th) = (template.width(), template.height());
        let (min_s, max_s) = (self.config.scale_range_min, self.config.scale_range_max);
        let mut best: Option<(i32, i32, u32, u32, f32)> = None;

        for i in 0..NUM_SCALES {
            let scale = min_s + (max_s - min_s) * (i as f32) / ((NUM_SCALES - 1) as f32);
            if (scale - 1.0).abs() < NEAR_ORIGINAL {
                continue;
            }
            let new_w = (tw as f32 * scale) as u32;
            let new_h = (th as f32 * scale) as u32;
            if new_w < 4 || new_h < 4 || new_w > screen.width || new_h > screen.height {
                continue;
            }

            let resized = template.resize_exact(new_w, new_h, FilterType::Triangle);
            let tmpl = Plane::from_image(&resized, self.config.grayscale);
            if let Some((left, top, score)) = best_correlation(screen, &tmpl) {
                if best.map_or(true, |(_, _, _, _, b)| score > b) {
                    let cx = left as i32 + (new_w / 2) as i32;
                    let cy = top as i32 + (new_h / 2) as i32;
                    best = Some((cx, cy, new_w, new_h, score));
                }
            }
        }

        match best {
            Some(hit) if hit.4 >= threshold => Some(hit),
            Some((_, _, _, _, score)) => {
                debug!("template multi-scale: best={score:.3} < threshold={threshold:.3}");
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Matcher for TemplateMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Template
    }

    fn can_handle(&self, target: &TargetSpec) -> bool {
        target.image.is_some()
    }

    async fn find(&self, target: &TargetSpec, screenshot: &[u8]) -> Option<MatchResult> {
        let start = Instant::now();
        let hit = self.match_target(target, screenshot);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        hit.map(|(cx, cy, w, h, confidence)| {
            let mut result = MatchResult::at(cx, cy, w, h, confidence, MatchMethod::Template);
            result.elapsed_ms = elapsed;
            result
        })
    }
}

/// Flat f32 pixel plane; one channel when matching grayscale, three for
/// full-color matching.
struct Plane {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_image(img: &DynamicImage, grayscale: bool) -> Self {
        if grayscale {
            let gray = img.to_luma8();
            let (width, height) = gray.dimensions();
            let data = gray.as_raw().iter().map(|&p| p as f32).collect();
            Self {
                width,
                height,
                channels: 1,
                data,
            }
        } else {
            let rgb = img.to_rgb8();
            let (width, height) = rgb.dimensions();
            let data = rgb.as_raw().iter().map(|&p| p as f32).collect();
            Self {
                width,
                height,
                channels: 3,
                data,
            }
        }
    }
}

/// Slide `tmpl` over `screen` and return the top-left offset and score of
/// the best zero-mean normalized cross-correlation (TM_CCOEFF_NORMED
/// semantics). Returns None when the template does not fit or is flat.
fn best_correlation(screen: &Plane, tmpl: &Plane) -> Option<(u32, u32, f32)> {
    if tmpl.width > screen.width || tmpl.height > screen.height {
        return None;
    }
    debug_assert_eq!(screen.channels, tmpl.channels);

    let n = (tmpl.width as usize) * (tmpl.height as usize) * tmpl.channels;
    let t_mean: f32 = tmpl.data.iter().sum::<f32>() / n as f32;
    let t_zero: Vec<f32> = tmpl.data.iter().map(|&v| v - t_mean).collect();
    let t_norm: f32 = t_zero.iter().map(|&v| v * v).sum::<f32>().sqrt();
    if t_norm < 1e-6 {
        return None;
    }

    let ch = tmpl.channels;
    let s_row = screen.width as usize * ch;
    let t_row = tmpl.width as usize * ch;
    let mut best: Option<(u32, u32, f32)> = None;

    for top in 0..=(screen.height - tmpl.height) {
        for left in 0..=(screen.width - tmpl.width) {
            let mut w_sum = 0.0f32;
            let mut w_sq = 0.0f32;
            let mut cross = 0.0f32;
            for ty in 0..tmpl.height as usize {
                let s_off = (top as usize + ty) * s_row + left as usize * ch;
                let t_off = ty * t_row;
                let s_slice = &screen.data[s_off..s_off + t_row];
                let t_slice = &t_zero[t_off..t_off + t_row];
                for (s, t) in s_slice.iter().zip(t_slice.iter()) {
                    w_sum += s;
                    w_sq += s * s;
                    cross += s * t;
                }
            }
            let w_var = w_sq - w_sum * w_sum / n as f32;
            if w_var <= 1e-6 {
                continue;
            }
            let score = cross / (w_var.sqrt() * t_norm);
            if best.map_or(true, |(_, _, b)| score > b) {
                best = Some((left, top, score));
            }
        }
    }

    best
}
