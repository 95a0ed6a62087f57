//! Mean per-channel pixel difference.
//!
//! Decodes both frames and averages the absolute per-channel difference
//! across every pixel. The decoded baseline is cached so each cycle only
//! decodes the incoming frame. Frames that cannot be decoded, or whose
//! dimensions differ from the baseline, are reported as fully changed
//! rather than erroring out of the loop.

use std::time::Instant;

use image::RgbImage;
use serde_json::Value;

use super::{Baseline, ChangeDetectionResult, ChangeDetector, DetectionMethod};

/// Mean intensity delta that counts as fully changed at sensitivity 0.
const BASE_THRESHOLD: f64 = 50.0;

pub struct PixelDiffDetector {
    baseline: Option<Baseline>,
    baseline_rgb: Option<RgbImage>,
    sensitivity: f64,
}

impl PixelDiffDetector {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            baseline: None,
            baseline_rgb: None,
            sensitivity: sensitivity.clamp(0.0, 1.0),
        }
    }

    fn full_change(
        &self,
        reason: &str,
        start: Instant,
        extra: &[(&str, Value)],
    ) -> ChangeDetectionResult {
        let mut metadata = serde_json::Map::new();
        metadata.insert("reason".into(), Value::from(reason));
        for (key, value) in extra {
            metadata.insert((*key).into(), value.clone());
        }
        ChangeDetectionResult {
            changed: true,
            confidence: 1.0,
            score: 1.0,
            method: self.method(),
            metadata,
            processing: start.elapsed(),
        }
    }
}

/// Average absolute difference across the RGB channels of two same-size
/// images.
fn mean_channel_diff(a: &RgbImage, b: &RgbImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    total as f64 / a.as_raw().len().max(1) as f64
}

impl ChangeDetector for PixelDiffDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::PixelDiff
    }

    fn detect_change(&mut self, frame: &[u8]) -> ChangeDetectionResult {
        let start = Instant::now();

        if self.baseline.is_none() {
            self.set_baseline(frame);
            return ChangeDetectionResult::first_observation(self.method(), start.elapsed());
        }

        let Ok(current) = image::load_from_memory(frame) else {
            return self.full_change("frame_decode_failed", start, &[]);
        };
        let current = current.to_rgb8();

        let Some(baseline_rgb) = &self.baseline_rgb else {
            return self.full_change("baseline_undecodable", start, &[]);
        };

        if current.dimensions() != baseline_rgb.dimensions() {
            let (bw, bh) = baseline_rgb.dimensions();
            let (cw, ch) = current.dimensions();
            return self.full_change(
                "dimension_mismatch",
                start,
                &[
                    ("baseline_dims", Value::from(format!("{bw}x{bh}"))),
                    ("frame_dims", Value::from(format!("{cw}x{ch}"))),
                ],
            );
        }

        let mean = mean_channel_diff(baseline_rgb, &current);
        let threshold = (1.0 - self.sensitivity) * BASE_THRESHOLD;
        let (changed, confidence) = if threshold > f64::EPSILON {
            (mean > threshold, (mean / threshold).min(1.0))
        } else {
            (mean > 0.0, 1.0)
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("mean_diff".into(), Value::from(mean));
        metadata.insert("threshold".into(), Value::from(threshold));

        ChangeDetectionResult {
            changed,
            confidence,
            score: mean / 255.0,
            method: self.method(),
            metadata,
            processing: start.elapsed(),
        }
    }

    fn set_baseline(&mut self, frame: &[u8]) {
        self.baseline = Some(Baseline::new(frame));
        self.baseline_rgb = image::load_from_memory(frame)
            .ok()
            .map(|img| img.to_rgb8());
    }

    fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    fn reset_baseline(&mut self) {
        self.baseline = None;
        self.baseline_rgb = None;
    }

    fn update_sensitivity(&mut self, value: f64) {
        self.sensitivity = value.clamp(0.0, 1.0);
    }

    fn sensitivity(&self) -> f64 {
        self.sensitivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_support::uniform_png;

    #[test]
    fn identical_uniform_frames_are_unchanged() {
        let frame = uniform_png(64, 64, [100, 100, 100]);
        let mut det = PixelDiffDetector::new(0.5);

        let first = det.detect_change(&frame);
        assert!(!first.changed);
        assert_eq!(first.confidence, 1.0);

        let second = det.detect_change(&frame);
        assert!(!second.changed);
        assert!(second.score.abs() < 1e-9);
    }

    #[test]
    fn uniform_intensity_shift_of_60_changes_at_half_sensitivity() {
        // Threshold at sensitivity 0.5 is 25; a +60 shift on every channel
        // lands well past it.
        let baseline = uniform_png(64, 64, [100, 100, 100]);
        let shifted = uniform_png(64, 64, [160, 160, 160]);

        let mut det = PixelDiffDetector::new(0.5);
        det.detect_change(&baseline);

        let result = det.detect_change(&shifted);
        assert!(result.changed);
        assert_eq!(result.confidence, 1.0);
        assert!((result.score - 60.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn small_shift_below_threshold_is_unchanged() {
        let baseline = uniform_png(64, 64, [100, 100, 100]);
        let shifted = uniform_png(64, 64, [110, 110, 110]);

        let mut det = PixelDiffDetector::new(0.5);
        det.detect_change(&baseline);

        let result = det.detect_change(&shifted);
        assert!(!result.changed);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn dimension_mismatch_is_immediate_full_change() {
        let mut det = PixelDiffDetector::new(0.5);
        det.detect_change(&uniform_png(64, 64, [0, 0, 0]));

        let result = det.detect_change(&uniform_png(32, 64, [0, 0, 0]));
        assert!(result.changed);
        assert_eq!(result.score, 1.0);
        assert_eq!(
            result.metadata.get("reason").unwrap().as_str().unwrap(),
            "dimension_mismatch"
        );
    }

    #[test]
    fn undecodable_frame_is_full_change() {
        let mut det = PixelDiffDetector::new(0.5);
        det.detect_change(&uniform_png(16, 16, [0, 0, 0]));

        let result = det.detect_change(b"not a png at all");
        assert!(result.changed);
        assert_eq!(result.score, 1.0);
    }
}
