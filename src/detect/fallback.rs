//! Capability-checked strategy selection.
//!
//! The preferred strategy is chosen once at construction; when its
//! dependency is unavailable the wrapper runs the fallback instead and tags
//! every result's metadata with the reason. Nothing inside the preferred
//! strategy does runtime availability handling.

use serde_json::Value;

use super::{ChangeDetectionResult, ChangeDetector, DetectionMethod};

pub struct FallbackDetector {
    active: Box<dyn ChangeDetector>,
    fallback_reason: Option<String>,
}

impl FallbackDetector {
    /// The preferred strategy is available; delegate untouched.
    pub fn preferred(active: Box<dyn ChangeDetector>) -> Self {
        Self {
            active,
            fallback_reason: None,
        }
    }

    /// The preferred strategy is unavailable; run `fallback` and tag results.
    pub fn degraded(fallback: Box<dyn ChangeDetector>, reason: impl Into<String>) -> Self {
        Self {
            active: fallback,
            fallback_reason: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

impl ChangeDetector for FallbackDetector {
    fn method(&self) -> DetectionMethod {
        self.active.method()
    }

    fn detect_change(&mut self, frame: &[u8]) -> ChangeDetectionResult {
        let mut result = self.active.detect_change(frame);
        if let Some(reason) = &self.fallback_reason {
            result
                .metadata
                .insert("fallback_reason".into(), Value::from(reason.as_str()));
        }
        result
    }

    fn set_baseline(&mut self, frame: &[u8]) {
        self.active.set_baseline(frame);
    }

    fn has_baseline(&self) -> bool {
        self.active.has_baseline()
    }

    fn reset_baseline(&mut self) {
        self.active.reset_baseline();
    }

    fn update_sensitivity(&mut self, value: f64) {
        self.active.update_sensitivity(value);
    }

    fn sensitivity(&self) -> f64 {
        self.active.sensitivity()
    }
}

#[cfg(test)]
mod tests {
    use super::super::HashDetector;
    use super::*;

    #[test]
    fn preferred_results_are_untagged() {
        let mut det = FallbackDetector::preferred(Box::new(HashDetector::new(0.5)));
        assert!(!det.is_degraded());

        det.detect_change(b"frame");
        let result = det.detect_change(b"frame");
        assert!(!result.metadata.contains_key("fallback_reason"));
    }

    #[test]
    fn degraded_results_carry_the_reason() {
        let mut det = FallbackDetector::degraded(
            Box::new(HashDetector::new(0.5)),
            "pixel decoding support not compiled in",
        );
        assert!(det.is_degraded());
        assert_eq!(det.method(), DetectionMethod::Hash);

        det.detect_change(b"frame one");
        let result = det.detect_change(b"frame two");
        assert!(result.changed);
        assert_eq!(
            result.metadata.get("fallback_reason").unwrap().as_str().unwrap(),
            "pixel decoding support not compiled in"
        );
    }

    #[test]
    fn baseline_operations_delegate() {
        let mut det = FallbackDetector::degraded(Box::new(HashDetector::new(0.5)), "why");
        assert!(!det.has_baseline());
        det.set_baseline(b"frame");
        assert!(det.has_baseline());
        det.reset_baseline();
        assert!(!det.has_baseline());

        det.update_sensitivity(0.9);
        assert!((det.sensitivity() - 0.9).abs() < 1e-12);
    }
}
