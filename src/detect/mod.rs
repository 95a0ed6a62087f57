/*!
 * Change detection strategies.
 *
 * A detector owns one baseline frame and answers "did this frame change
 * meaningfully?" for each new capture. Strategies share a contract: the
 * first frame ever seen is adopted as the baseline and reported as
 * unchanged; afterwards the baseline is replaced only by the session's
 * update policy, never by the detector itself.
 */

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SentinelError;

mod fallback;
mod hash;
#[cfg(feature = "pixel-diff")]
mod pixel;
mod size;

pub use fallback::FallbackDetector;
pub use hash::HashDetector;
#[cfg(feature = "pixel-diff")]
pub use pixel::PixelDiffDetector;
pub use size::SizeDetector;

/// Comparison strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Byte-length heuristic, cheapest.
    SizeOnly,
    /// Content fingerprint equality, strict binary signal.
    Hash,
    /// Mean per-channel pixel difference.
    PixelDiff,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::SizeOnly => "size_only",
            DetectionMethod::Hash => "hash",
            DetectionMethod::PixelDiff => "pixel_diff",
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" | "size_only" => Ok(DetectionMethod::SizeOnly),
            "hash" => Ok(DetectionMethod::Hash),
            "pixel" | "pixel_diff" => Ok(DetectionMethod::PixelDiff),
            other => Err(SentinelError::config(format!(
                "Unknown detection method '{other}' (expected size, hash, or pixel)"
            ))),
        }
    }
}

/// Outcome of one comparison. Immutable, one per call.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeDetectionResult {
    pub changed: bool,
    /// How sure the strategy is about its verdict, in [0, 1].
    pub confidence: f64,
    /// Normalized change magnitude; interpretation is per-strategy.
    pub score: f64,
    pub method: DetectionMethod,
    pub metadata: Map<String, Value>,
    /// Time the comparison itself took.
    #[serde(skip)]
    pub processing: Duration,
}

impl ChangeDetectionResult {
    /// The shared first-frame contract: no baseline existed, the frame is
    /// adopted, and nothing is reported as changed.
    pub(crate) fn first_observation(method: DetectionMethod, processing: Duration) -> Self {
        let mut metadata = Map::new();
        metadata.insert("first_observation".into(), Value::Bool(true));
        Self {
            changed: false,
            confidence: 1.0,
            score: 0.0,
            method,
            metadata,
            processing,
        }
    }
}

/// The most recently accepted frame plus detector-derived data. Owned by
/// exactly one detector and replaced wholesale.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub bytes: Vec<u8>,
    pub fingerprint: blake3::Hash,
    pub dims: Option<(u32, u32)>,
}

impl Baseline {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            fingerprint: blake3::hash(bytes),
            dims: crate::capture::png_dimensions(bytes),
        }
    }
}

/// Pluggable comparison strategy over a stored baseline.
pub trait ChangeDetector: Send {
    fn method(&self) -> DetectionMethod;

    /// Compares `frame` against the baseline. With no baseline present the
    /// frame is adopted and reported unchanged.
    fn detect_change(&mut self, frame: &[u8]) -> ChangeDetectionResult;

    fn set_baseline(&mut self, frame: &[u8]);

    fn has_baseline(&self) -> bool;

    fn reset_baseline(&mut self);

    /// Clamps into [0, 1].
    fn update_sensitivity(&mut self, value: f64);

    fn sensitivity(&self) -> f64;
}

/// Builds the detector for a requested method. Pixel difference is wrapped
/// in the capability-checked fallback selector; when pixel decoding support
/// is not compiled in, the wrapper degrades to hash equality and tags every
/// result with the reason.
pub fn build_detector(method: DetectionMethod, sensitivity: f64) -> Box<dyn ChangeDetector> {
    let sensitivity = sensitivity.clamp(0.0, 1.0);
    match method {
        DetectionMethod::SizeOnly => Box::new(SizeDetector::new(sensitivity)),
        DetectionMethod::Hash => Box::new(HashDetector::new(sensitivity)),
        DetectionMethod::PixelDiff => pixel_or_fallback(sensitivity),
    }
}

#[cfg(feature = "pixel-diff")]
fn pixel_or_fallback(sensitivity: f64) -> Box<dyn ChangeDetector> {
    Box::new(FallbackDetector::preferred(Box::new(
        PixelDiffDetector::new(sensitivity),
    )))
}

#[cfg(not(feature = "pixel-diff"))]
fn pixel_or_fallback(sensitivity: f64) -> Box<dyn ChangeDetector> {
    Box::new(FallbackDetector::degraded(
        Box::new(HashDetector::new(sensitivity)),
        "pixel decoding support not compiled in",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_from_str() {
        assert_eq!("size".parse::<DetectionMethod>().unwrap(), DetectionMethod::SizeOnly);
        assert_eq!("hash".parse::<DetectionMethod>().unwrap(), DetectionMethod::Hash);
        assert_eq!("pixel".parse::<DetectionMethod>().unwrap(), DetectionMethod::PixelDiff);
        assert_eq!(
            "pixel_diff".parse::<DetectionMethod>().unwrap(),
            DetectionMethod::PixelDiff
        );
        assert!("sepia".parse::<DetectionMethod>().is_err());
    }

    #[test]
    fn baseline_fingerprint_tracks_bytes() {
        let a = Baseline::new(b"frame-a");
        let b = Baseline::new(b"frame-a");
        let c = Baseline::new(b"frame-b");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert!(a.dims.is_none());
    }

    #[test]
    fn factory_honors_method() {
        assert_eq!(
            build_detector(DetectionMethod::SizeOnly, 0.5).method(),
            DetectionMethod::SizeOnly
        );
        assert_eq!(
            build_detector(DetectionMethod::Hash, 0.5).method(),
            DetectionMethod::Hash
        );
    }

    #[test]
    fn factory_clamps_sensitivity() {
        let det = build_detector(DetectionMethod::Hash, 7.0);
        assert_eq!(det.sensitivity(), 1.0);
        let det = build_detector(DetectionMethod::Hash, -3.0);
        assert_eq!(det.sensitivity(), 0.0);
    }

    #[cfg(feature = "pixel-diff")]
    #[test]
    fn factory_selects_pixel_when_available() {
        let det = build_detector(DetectionMethod::PixelDiff, 0.5);
        assert_eq!(det.method(), DetectionMethod::PixelDiff);
    }
}
