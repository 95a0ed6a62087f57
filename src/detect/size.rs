//! Byte-length change heuristic.
//!
//! Encoded frame size moves when content moves, so the relative size delta
//! is a serviceable cheap signal. It misses same-size content swaps, which
//! is what the hash and pixel strategies are for.

use std::time::Instant;

use serde_json::Value;

use super::{Baseline, ChangeDetectionResult, ChangeDetector, DetectionMethod};

/// Relative size delta that counts as fully changed at sensitivity 0.
const BASE_THRESHOLD: f64 = 0.10;

pub struct SizeDetector {
    baseline: Option<Baseline>,
    sensitivity: f64,
}

impl SizeDetector {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            baseline: None,
            sensitivity: sensitivity.clamp(0.0, 1.0),
        }
    }
}

impl ChangeDetector for SizeDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::SizeOnly
    }

    fn detect_change(&mut self, frame: &[u8]) -> ChangeDetectionResult {
        let start = Instant::now();

        let Some(baseline) = &self.baseline else {
            self.set_baseline(frame);
            return ChangeDetectionResult::first_observation(self.method(), start.elapsed());
        };

        let baseline_size = baseline.bytes.len().max(1) as f64;
        let delta = (frame.len() as f64 - baseline.bytes.len() as f64).abs();
        let score = delta / baseline_size;
        let threshold = (1.0 - self.sensitivity) * BASE_THRESHOLD;

        let (changed, confidence) = if threshold > f64::EPSILON {
            (score > threshold, (score / threshold).min(1.0))
        } else {
            // Sensitivity 1.0: any size movement at all is a change.
            (score > 0.0, 1.0)
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("baseline_bytes".into(), Value::from(baseline.bytes.len()));
        metadata.insert("frame_bytes".into(), Value::from(frame.len()));
        metadata.insert("threshold".into(), Value::from(threshold));

        ChangeDetectionResult {
            changed,
            confidence,
            score,
            method: self.method(),
            metadata,
            processing: start.elapsed(),
        }
    }

    fn set_baseline(&mut self, frame: &[u8]) {
        self.baseline = Some(Baseline::new(frame));
    }

    fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    fn reset_baseline(&mut self) {
        self.baseline = None;
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

    #[test]
    fn first_frame_adopted_unchanged() {
        let mut det = SizeDetector::new(0.5);
        assert!(!det.has_baseline());

        let result = det.detect_change(&vec![0u8; 1000]);
        assert!(!result.changed);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.score, 0.0);
        assert!(det.has_baseline());

        // Second identical frame stays unchanged with zero score.
        let result = det.detect_change(&vec![0u8; 1000]);
        assert!(!result.changed);
        assert!(result.score.abs() < f64::EPSILON);
    }

    #[test]
    fn large_size_delta_changes() {
        let mut det = SizeDetector::new(0.5);
        det.set_baseline(&vec![0u8; 1000]);

        // 20% delta against a 5% threshold at sensitivity 0.5.
        let result = det.detect_change(&vec![0u8; 1200]);
        assert!(result.changed);
        assert!((result.score - 0.2).abs() < 1e-9);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn small_delta_below_threshold_is_unchanged() {
        let mut det = SizeDetector::new(0.5);
        det.set_baseline(&vec![0u8; 1000]);

        let result = det.detect_change(&vec![0u8; 1020]);
        assert!(!result.changed);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn max_sensitivity_flags_any_delta() {
        let mut det = SizeDetector::new(1.0);
        det.set_baseline(&vec![0u8; 1000]);

        assert!(det.detect_change(&vec![0u8; 1001]).changed);
        assert!(!det.detect_change(&vec![0u8; 1000]).changed);
    }

    #[test]
    fn reset_forgets_baseline() {
        let mut det = SizeDetector::new(0.5);
        det.detect_change(b"frame");
        assert!(det.has_baseline());
        det.reset_baseline();
        assert!(!det.has_baseline());
    }
}
