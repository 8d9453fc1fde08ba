//! Per-object template re-localization.
//!
//! Each tracked object owns one grayscale template patch, captured once at
//! initialization and never relearned. Every frame, a bounded window around
//! the object's last center is searched by normalized cross-correlation and
//! the position is updated only when the best score clears the confidence
//! threshold.

use std::collections::HashMap;

use image::{imageops, GrayImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::object::{BoundingBox, TrackedObject};
use crate::{Error, Result};

/// Configuration for the template tracker.
///
/// Empirically chosen defaults; tuning knobs, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTrackerConfig {
    /// Minimum correlation score to accept a re-localization.
    pub confidence_threshold: f64,

    /// Search window size as a multiple of the template size.
    pub search_multiplier: f64,
}

impl Default for TemplateTrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            search_multiplier: 2.0,
        }
    }
}

/// Re-localizes user-marked objects by bounded-window template search.
pub struct TemplateTracker {
    config: TemplateTrackerConfig,
    templates: HashMap<i64, GrayImage>,
}

impl TemplateTracker {
    /// Create a tracker with the given configuration.
    pub fn new(config: TemplateTrackerConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.confidence_threshold)
            || config.confidence_threshold <= 0.0
        {
            return Err(Error::InvalidConfig(
                "confidence_threshold must be in (0, 1]".to_string(),
            ));
        }
        if config.search_multiplier < 1.0 || !config.search_multiplier.is_finite() {
            return Err(Error::InvalidConfig(
                "search_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(Self {
            config,
            templates: HashMap::new(),
        })
    }

    /// Capture one template per object from its bounding box in `base`.
    ///
    /// Previously held templates are released first. Objects whose clipped
    /// box has zero area are logged and skipped; the call itself only fails
    /// on a degenerate base image.
    pub fn initialize_templates(
        &mut self,
        base: &GrayImage,
        objects: &[TrackedObject],
    ) -> Result<()> {
        if base.width() == 0 || base.height() == 0 {
            return Err(Error::InvalidFrame(format!(
                "base image has degenerate dimensions {}x{}",
                base.width(),
                base.height()
            )));
        }

        self.templates.clear();

        for obj in objects {
            let clipped = obj.bounding_box.clip(base.width(), base.height());
            let x = clipped.x.round() as u32;
            let y = clipped.y.round() as u32;
            let w = (clipped.width.round() as u32).min(base.width().saturating_sub(x));
            let h = (clipped.height.round() as u32).min(base.height().saturating_sub(y));

            if w == 0 || h == 0 {
                warn!(
                    "object {}: bounding box has zero area after clipping, skipping template",
                    obj.id
                );
                continue;
            }

            let template = imageops::crop_imm(base, x, y, w, h).to_image();
            self.templates.insert(obj.id, template);
        }

        debug!("initialized {} templates", self.templates.len());
        Ok(())
    }

    /// Number of templates currently held.
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Re-localize every object against the current frame.
    ///
    /// The result has the same length, ids, and order as the input. Objects
    /// whose search fails for any reason (no template, clipped window
    /// smaller than the template, best score below the confidence
    /// threshold) retain their prior state untouched.
    pub fn update_tracked_positions(
        &self,
        current: &GrayImage,
        objects: &[TrackedObject],
    ) -> Vec<TrackedObject> {
        objects
            .iter()
            .map(|obj| self.update_single(current, obj).unwrap_or_else(|| obj.clone()))
            .collect()
    }

    /// Release every held template. Safe to call when empty.
    pub fn clear_templates(&mut self) {
        self.templates.clear();
    }

    /// Search for one object; `None` means "retain prior state".
    fn update_single(&self, current: &GrayImage, obj: &TrackedObject) -> Option<TrackedObject> {
        let template = self.templates.get(&obj.id)?;
        let (t_w, t_h) = (template.width(), template.height());

        let win_w = t_w as f64 * self.config.search_multiplier;
        let win_h = t_h as f64 * self.config.search_multiplier;
        let window = BoundingBox::new(
            obj.center[0] - win_w / 2.0,
            obj.center[1] - win_h / 2.0,
            win_w,
            win_h,
        )
        .clip(current.width(), current.height());

        let wx = window.x.round() as u32;
        let wy = window.y.round() as u32;
        let ww = (window.width.round() as u32).min(current.width().saturating_sub(wx));
        let wh = (window.height.round() as u32).min(current.height().saturating_sub(wy));

        // A clipped window that cannot contain the template means the object
        // sits too close to (or beyond) the frame edge this tick.
        if ww < t_w || wh < t_h {
            debug!(
                "object {}: search window {}x{} smaller than template {}x{}, retaining",
                obj.id, ww, wh, t_w, t_h
            );
            return None;
        }

        let mut best_score = f64::NEG_INFINITY;
        let mut best_pos = (wx, wy);

        for y in wy..=(wy + wh - t_h) {
            for x in wx..=(wx + ww - t_w) {
                let score = ncc_score(current, x, y, template);
                if score > best_score {
                    best_score = score;
                    best_pos = (x, y);
                }
            }
        }

        if best_score < self.config.confidence_threshold {
            debug!(
                "object {}: best correlation {:.3} below threshold {:.3}, retaining",
                obj.id, best_score, self.config.confidence_threshold
            );
            return None;
        }

        let bounding_box = BoundingBox::new(
            best_pos.0 as f64,
            best_pos.1 as f64,
            t_w as f64,
            t_h as f64,
        );
        Some(TrackedObject {
            id: obj.id,
            center: bounding_box.center(),
            bounding_box,
        })
    }
}

/// Zero-mean normalized cross-correlation of `template` against the
/// same-size patch of `image` at `(ox, oy)`.
///
/// Scores lie in [-1, 1]; flat patches (zero variance on either side) score
/// 0 rather than dividing by zero.
fn ncc_score(image: &GrayImage, ox: u32, oy: u32, template: &GrayImage) -> f64 {
    let (t_w, t_h) = (template.width(), template.height());
    let n = (t_w * t_h) as f64;

    let mut sum_t = 0.0f64;
    let mut sum_i = 0.0f64;
    for y in 0..t_h {
        for x in 0..t_w {
            sum_t += template.get_pixel(x, y)[0] as f64;
            sum_i += image.get_pixel(ox + x, oy + y)[0] as f64;
        }
    }
    let mean_t = sum_t / n;
    let mean_i = sum_i / n;

    let mut cross = 0.0f64;
    let mut var_t = 0.0f64;
    let mut var_i = 0.0f64;
    for y in 0..t_h {
        for x in 0..t_w {
            let dt = template.get_pixel(x, y)[0] as f64 - mean_t;
            let di = image.get_pixel(ox + x, oy + y)[0] as f64 - mean_i;
            cross += dt * di;
            var_t += dt * dt;
            var_i += di * di;
        }
    }

    let denom = (var_t * var_i).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    cross / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Draw a deterministic textured 10x10 patch at `(ox, oy)`.
    fn draw_patch(img: &mut GrayImage, ox: u32, oy: u32) {
        for y in 0..10 {
            for x in 0..10 {
                let value = ((x * 7 + y * 13) % 251) as u8;
                img.put_pixel(ox + x, oy + y, image::Luma([value]));
            }
        }
    }

    fn tracker() -> TemplateTracker {
        TemplateTracker::new(TemplateTrackerConfig::default()).expect("valid config")
    }

    fn object_at(id: i64, x: f64, y: f64) -> TrackedObject {
        TrackedObject::new(id, BoundingBox::new(x, y, 10.0, 10.0)).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let config = TemplateTrackerConfig {
            confidence_threshold: 0.0,
            search_multiplier: 2.0,
        };
        assert!(TemplateTracker::new(config).is_err());

        let config = TemplateTrackerConfig {
            confidence_threshold: 0.7,
            search_multiplier: 0.5,
        };
        assert!(TemplateTracker::new(config).is_err());

        assert!(TemplateTracker::new(TemplateTrackerConfig::default()).is_ok());
    }

    #[test]
    fn test_initialize_skips_zero_area_boxes() {
        let base = GrayImage::from_pixel(64, 64, image::Luma([50u8]));
        let inside = object_at(0, 10.0, 10.0);
        let outside = object_at(1, 200.0, 200.0);

        let mut tracker = tracker();
        tracker
            .initialize_templates(&base, &[inside, outside])
            .expect("init succeeds");

        assert_eq!(tracker.template_count(), 1);
    }

    #[test]
    fn test_initialize_rejects_degenerate_base() {
        let base = GrayImage::new(0, 0);
        let mut tracker = tracker();
        assert!(tracker.initialize_templates(&base, &[]).is_err());
    }

    #[test]
    fn test_reinitialize_releases_old_templates() {
        let base = GrayImage::from_pixel(64, 64, image::Luma([50u8]));
        let mut tracker = tracker();

        tracker
            .initialize_templates(&base, &[object_at(0, 10.0, 10.0), object_at(1, 30.0, 30.0)])
            .unwrap();
        assert_eq!(tracker.template_count(), 2);

        tracker
            .initialize_templates(&base, &[object_at(2, 10.0, 10.0)])
            .unwrap();
        assert_eq!(tracker.template_count(), 1);
    }

    #[test]
    fn test_update_recovers_exact_shift() {
        // Object at (20, 20); the same textured patch appears at (23, 23)
        // in the current frame (a (3, 3) shift with a perfect match).
        let mut base = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
        draw_patch(&mut base, 20, 20);
        let mut current = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
        draw_patch(&mut current, 23, 23);

        let obj = object_at(0, 20.0, 20.0);
        let mut tracker = tracker();
        tracker.initialize_templates(&base, &[obj.clone()]).unwrap();

        let updated = tracker.update_tracked_positions(&current, &[obj.clone()]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, obj.id);
        assert_relative_eq!(updated[0].center[0], obj.center[0] + 3.0, epsilon = 1e-10);
        assert_relative_eq!(updated[0].center[1], obj.center[1] + 3.0, epsilon = 1e-10);
        assert_relative_eq!(updated[0].bounding_box.x, 23.0, epsilon = 1e-10);
        assert_relative_eq!(updated[0].bounding_box.y, 23.0, epsilon = 1e-10);
    }

    #[test]
    fn test_update_retains_on_low_confidence() {
        let mut base = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
        draw_patch(&mut base, 20, 20);
        // Current frame is flat: every candidate scores 0, below threshold.
        let current = GrayImage::from_pixel(64, 64, image::Luma([128u8]));

        let obj = object_at(0, 20.0, 20.0);
        let mut tracker = tracker();
        tracker.initialize_templates(&base, &[obj.clone()]).unwrap();

        let updated = tracker.update_tracked_positions(&current, &[obj.clone()]);
        assert_eq!(updated[0], obj, "low-confidence match must not mutate the object");
    }

    #[test]
    fn test_update_retains_when_window_smaller_than_template() {
        let mut base = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
        draw_patch(&mut base, 20, 20);

        let obj = object_at(0, 20.0, 20.0);
        let mut tracker = tracker();
        tracker.initialize_templates(&base, &[obj.clone()]).unwrap();

        // The current frame is smaller than the template: the clipped
        // window can never contain it.
        let tiny = GrayImage::from_pixel(8, 8, image::Luma([0u8]));
        let updated = tracker.update_tracked_positions(&tiny, &[obj.clone()]);
        assert_eq!(updated[0], obj);
    }

    #[test]
    fn test_update_passes_through_untemplated_objects() {
        let current = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
        let obj = object_at(9, 20.0, 20.0);

        let tracker = tracker();
        let updated = tracker.update_tracked_positions(&current, &[obj.clone()]);
        assert_eq!(updated, vec![obj]);
    }

    #[test]
    fn test_update_preserves_order_and_ids() {
        let mut base = GrayImage::from_pixel(96, 96, image::Luma([0u8]));
        draw_patch(&mut base, 10, 10);
        draw_patch(&mut base, 50, 50);

        let objects = vec![object_at(3, 10.0, 10.0), object_at(1, 50.0, 50.0)];
        let mut tracker = tracker();
        tracker.initialize_templates(&base, &objects).unwrap();

        let updated = tracker.update_tracked_positions(&base, &objects);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].id, 3);
        assert_eq!(updated[1].id, 1);
    }

    #[test]
    fn test_clear_templates() {
        let base = GrayImage::from_pixel(64, 64, image::Luma([50u8]));
        let mut tracker = tracker();
        tracker
            .initialize_templates(&base, &[object_at(0, 10.0, 10.0)])
            .unwrap();

        tracker.clear_templates();
        assert_eq!(tracker.template_count(), 0);

        // Safe when already empty.
        tracker.clear_templates();

        // All objects now pass through unchanged.
        let obj = object_at(0, 10.0, 10.0);
        let updated = tracker.update_tracked_positions(&base, &[obj.clone()]);
        assert_eq!(updated, vec![obj]);
    }

    #[test]
    fn test_ncc_perfect_match_scores_one() {
        let mut img = GrayImage::from_pixel(32, 32, image::Luma([0u8]));
        draw_patch(&mut img, 5, 5);
        let template = imageops::crop_imm(&img, 5, 5, 10, 10).to_image();

        let score = ncc_score(&img, 5, 5, &template);
        assert_relative_eq!(score, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ncc_flat_patch_scores_zero() {
        let img = GrayImage::from_pixel(32, 32, image::Luma([77u8]));
        let template = GrayImage::from_pixel(10, 10, image::Luma([77u8]));

        assert_eq!(ncc_score(&img, 0, 0, &template), 0.0);
    }
}
