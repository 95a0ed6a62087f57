/*!
 * Screen capture backends.
 *
 * One backend per acquisition technology, all behind the [`CaptureBackend`]
 * trait. Expected failures (helper tool missing, a capture attempt that did
 * not produce an image) are values on [`CaptureResult`] so the chain can
 * advance to the next backend; only unexpected faults surface as errors.
 */

use std::time::Duration;

use async_trait::async_trait;
use image::GenericImageView;

use crate::error::SentinelResult;
use crate::platform::{BackendKind, PlatformProfile};
use crate::region::Region;

pub mod bridge;
pub mod chain;
pub mod display_server;
#[cfg(windows)]
pub mod native;
pub mod portable;

pub use bridge::HostBridgeBackend;
pub use chain::CaptureChain;
pub use display_server::DisplayServerBackend;
#[cfg(windows)]
pub use native::NativeGdiBackend;
pub use portable::PortableBackend;

/// Static descriptor of what one backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCapability {
    /// Can capture an arbitrary sub-rectangle natively.
    pub supports_region: bool,
    /// Sees the full virtual desktop, not just the primary monitor.
    pub supports_multi_monitor: bool,
    /// Needs elevated privileges to work at all.
    pub requires_elevation: bool,
    /// Relative speed, 1 is fastest.
    pub performance_rank: u8,
    /// Relative dependability, 1 is most reliable.
    pub reliability_rank: u8,
}

/// How a capture attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The helper tool or interpreter is not present. Drives fallback.
    ToolAbsent,
    /// The attempt ran and produced no usable image.
    Failed,
    /// The attempt exceeded its time budget.
    TimedOut,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ToolAbsent => "tool_absent",
            FailureKind::Failed => "failed",
            FailureKind::TimedOut => "timed_out",
        }
    }
}

/// Failure details attached to an unsuccessful [`CaptureResult`].
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Outcome of one capture attempt. Created once, never mutated.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub success: bool,
    /// Encoded PNG bytes; empty on failure.
    pub image: Vec<u8>,
    pub error: Option<CaptureFailure>,
    /// Name of the backend that produced this result.
    pub backend: &'static str,
    /// Wall time the attempt took.
    pub elapsed: Duration,
    /// Image dimensions in pixels; (0, 0) on failure.
    pub size: (u32, u32),
}

impl CaptureResult {
    pub fn captured(
        backend: &'static str,
        image: Vec<u8>,
        size: (u32, u32),
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            image,
            error: None,
            backend,
            elapsed,
            size,
        }
    }

    pub fn failed(
        backend: &'static str,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            image: Vec::new(),
            error: Some(CaptureFailure {
                kind,
                message: message.into(),
            }),
            backend,
            elapsed,
            size: (0, 0),
        }
    }

    /// Failure result for a malformed region, shared by all backends.
    pub fn invalid_region(backend: &'static str, region: &Region) -> Self {
        let message = match region.validate() {
            Err(e) => e.to_string(),
            Ok(()) => "region unexpectedly valid".to_string(),
        };
        Self::failed(backend, FailureKind::Failed, message, Duration::ZERO)
    }
}

/// Abstract interface over one capture technology.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn capability(&self) -> CaptureCapability;

    /// Cheap static check: could this backend work in the given environment?
    fn can_handle(&self, profile: &PlatformProfile) -> bool;

    /// One-time expensive setup (tool discovery, interpreter resolution).
    /// Idempotent. `Ok(false)` means the backend looked usable but is not,
    /// and the chain drops it.
    async fn initialize(&mut self) -> SentinelResult<bool>;

    async fn capture_full_screen(&self) -> SentinelResult<CaptureResult>;

    async fn capture_region(&self, region: &Region) -> SentinelResult<CaptureResult>;

    /// Releases backend resources. Default is a no-op.
    async fn cleanup(&mut self) {}
}

/// Reads the pixel dimensions out of an encoded image, if decodable.
pub(crate) fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes).ok().map(|img| img.dimensions())
}

/// Crops an encoded full-screen PNG down to `region`, clamping the region to
/// the image bounds first. Used by backends whose helper tool cannot take
/// rectangle arguments. Returns the re-encoded PNG and its dimensions.
pub(crate) fn crop_encoded(
    bytes: &[u8],
    region: &Region,
) -> Result<(Vec<u8>, (u32, u32)), String> {
    let full = image::load_from_memory(bytes)
        .map_err(|e| format!("full-screen image did not decode: {e}"))?;
    let (img_w, img_h) = full.dimensions();

    let clamped = region
        .clamped_to(img_w, img_h)
        .ok_or_else(|| format!("region {region} lies outside the {img_w}x{img_h} capture"))?;

    let cropped = full.crop_imm(
        clamped.left as u32,
        clamped.top as u32,
        clamped.width(),
        clamped.height(),
    );
    let mut out = Vec::new();
    cropped
        .write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageOutputFormat::Png,
        )
        .map_err(|e| format!("crop re-encode failed: {e}"))?;
    Ok((out, (clamped.width(), clamped.height())))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic PNG fixtures for backend and detector tests.

    use image::{Rgb, RgbImage};

    /// Encodes a `width` x `height` PNG filled with one color.
    pub fn uniform_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageOutputFormat::Png,
        )
        .expect("png encode");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::uniform_png;
    use super::*;

    #[test]
    fn crop_respects_region() {
        let png = uniform_png(100, 80, [10, 20, 30]);
        let region = Region::new(5, 5, 55, 45).unwrap();
        let (cropped, size) = crop_encoded(&png, &region).unwrap();
        assert_eq!(size, (50, 40));
        assert_eq!(png_dimensions(&cropped), Some((50, 40)));
    }

    #[test]
    fn crop_clamps_overshoot() {
        let png = uniform_png(100, 80, [0, 0, 0]);
        let region = Region::new(60, 60, 300, 300).unwrap();
        let (_, size) = crop_encoded(&png, &region).unwrap();
        assert_eq!(size, (40, 20));
    }

    #[test]
    fn crop_rejects_disjoint_region() {
        let png = uniform_png(100, 80, [0, 0, 0]);
        let region = Region::new(200, 200, 300, 300).unwrap();
        assert!(crop_encoded(&png, &region).is_err());
    }

    #[test]
    fn failure_results_carry_kind() {
        let res = CaptureResult::failed("x11", FailureKind::ToolAbsent, "maim missing", Duration::ZERO);
        assert!(!res.success);
        assert!(res.image.is_empty());
        assert_eq!(res.error.as_ref().unwrap().kind, FailureKind::ToolAbsent);
    }

    #[test]
    fn invalid_region_is_a_failure_value() {
        let bad = Region {
            left: 50,
            top: 0,
            right: 40,
            bottom: 100,
        };
        let res = CaptureResult::invalid_region("portable", &bad);
        assert!(!res.success);
        assert_eq!(res.error.unwrap().kind, FailureKind::Failed);
    }
}
