//! Content fingerprint equality.
//!
//! Strict binary signal: any byte difference is a change. Sensitivity is
//! stored to honor the detector contract but plays no part in the verdict.

use std::time::Instant;

use serde_json::Value;

use super::{Baseline, ChangeDetectionResult, ChangeDetector, DetectionMethod};

pub struct HashDetector {
    baseline: Option<Baseline>,
    sensitivity: f64,
}

impl HashDetector {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            baseline: None,
            sensitivity: sensitivity.clamp(0.0, 1.0),
        }
    }
}

impl ChangeDetector for HashDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Hash
    }

    fn detect_change(&mut self, frame: &[u8]) -> ChangeDetectionResult {
        let start = Instant::now();

        let Some(baseline) = &self.baseline else {
            self.set_baseline(frame);
            return ChangeDetectionResult::first_observation(self.method(), start.elapsed());
        };

        let fingerprint = blake3::hash(frame);
        let changed = fingerprint != baseline.fingerprint;
        let score = if changed { 1.0 } else { 0.0 };

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "baseline_fingerprint".into(),
            Value::from(baseline.fingerprint.to_hex().as_str()),
        );
        metadata.insert(
            "frame_fingerprint".into(),
            Value::from(fingerprint.to_hex().as_str()),
        );

        ChangeDetectionResult {
            changed,
            confidence: 1.0,
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
    fn identical_bytes_are_unchanged() {
        let mut det = HashDetector::new(0.5);
        det.detect_change(b"stable frame");

        let result = det.detect_change(b"stable frame");
        assert!(!result.changed);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn any_distinct_bytes_are_changed() {
        let mut det = HashDetector::new(0.5);
        det.detect_change(b"frame one");

        let result = det.detect_change(b"frame two");
        assert!(result.changed);
        assert_eq!(result.score, 1.0);

        // Single-bit difference still trips it.
        det.set_baseline(&[0b0000_0000]);
        let result = det.detect_change(&[0b0000_0001]);
        assert!(result.changed);
    }

    #[test]
    fn first_call_adopts_baseline() {
        let mut det = HashDetector::new(0.0);
        let result = det.detect_change(b"frame");
        assert!(!result.changed);
        assert_eq!(result.confidence, 1.0);
        assert!(det.has_baseline());
    }
}
