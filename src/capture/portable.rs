//! Portable capture via the `screenshots` library, the last-resort backend.
//!
//! Wraps the cross-platform capture crate and converts its native pixel
//! buffer to an encoded PNG. Only the primary screen is addressed; region
//! coordinates are interpreted relative to that screen's origin and clamped
//! to its bounds.

use std::time::Instant;

use async_trait::async_trait;
use screenshots::Screen;
use tracing::debug;

use crate::capture::{CaptureBackend, CaptureCapability, CaptureResult, FailureKind};
use crate::error::SentinelResult;
use crate::platform::{BackendKind, PlatformProfile};
use crate::region::Region;

pub struct PortableBackend {
    initialized: bool,
}

impl PortableBackend {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Runs the blocking library call off the async worker.
    async fn capture_blocking(
        &self,
        region: Option<Region>,
    ) -> SentinelResult<CaptureResult> {
        let start = Instant::now();
        let name = self.name();

        let outcome = tokio::task::spawn_blocking(move || capture_primary(region))
            .await
            .map_err(|e| crate::error::SentinelError::capture(format!("capture task died: {e}")))?;

        Ok(match outcome {
            Ok((image, size)) => {
                debug!(bytes = image.len(), width = size.0, height = size.1, "Portable frame captured");
                CaptureResult::captured(name, image, size, start.elapsed())
            }
            Err(message) => CaptureResult::failed(name, FailureKind::Failed, message, start.elapsed()),
        })
    }
}

/// Captures the primary screen (optionally a clamped sub-rectangle) and
/// encodes PNG with the capture library's own image types.
fn capture_primary(region: Option<Region>) -> Result<(Vec<u8>, (u32, u32)), String> {
    use screenshots::image::ImageFormat;
    use std::io::Cursor;

    let screens = Screen::all().map_err(|e| format!("screen enumeration failed: {e}"))?;
    let screen = screens
        .iter()
        .find(|s| s.display_info.is_primary)
        .or_else(|| screens.first())
        .ok_or_else(|| "no screens found".to_string())?;

    let info = screen.display_info;
    let image = match region {
        Some(r) => {
            let Some(clamped) = r.clamped_to(info.width, info.height) else {
                return Err(format!(
                    "region {r} lies outside the {}x{} primary screen",
                    info.width, info.height
                ));
            };
            screen
                .capture_area(clamped.left, clamped.top, clamped.width(), clamped.height())
                .map_err(|e| format!("area capture failed: {e}"))?
        }
        None => screen.capture().map_err(|e| format!("capture failed: {e}"))?,
    };

    let size = (image.width(), image.height());
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("png encode failed: {e}"))?;
    Ok((png, size))
}

impl Default for PortableBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for PortableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Portable
    }

    fn capability(&self) -> CaptureCapability {
        CaptureCapability {
            supports_region: true,
            supports_multi_monitor: false,
            requires_elevation: false,
            performance_rank: 2,
            reliability_rank: 4,
        }
    }

    fn can_handle(&self, _profile: &PlatformProfile) -> bool {
        // Last resort on every platform; initialize() weeds out hosts where
        // the library cannot reach a display.
        true
    }

    async fn initialize(&mut self) -> SentinelResult<bool> {
        if self.initialized {
            return Ok(true);
        }
        let usable = tokio::task::spawn_blocking(|| {
            Screen::all().map(|screens| !screens.is_empty()).unwrap_or(false)
        })
        .await
        .unwrap_or(false);
        self.initialized = usable;
        if !usable {
            debug!("Portable capture library sees no screens");
        }
        Ok(usable)
    }

    async fn capture_full_screen(&self) -> SentinelResult<CaptureResult> {
        self.capture_blocking(None).await
    }

    async fn capture_region(&self, region: &Region) -> SentinelResult<CaptureResult> {
        if region.validate().is_err() {
            return Ok(CaptureResult::invalid_region(self.name(), region));
        }
        self.capture_blocking(Some(*region)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_any_profile() {
        let backend = PortableBackend::new();
        assert!(backend.can_handle(&PlatformProfile::default()));
        let guest = PlatformProfile {
            is_guest_linux: true,
            ..Default::default()
        };
        assert!(backend.can_handle(&guest));
    }

    #[tokio::test]
    async fn malformed_region_rejected_as_value() {
        let backend = PortableBackend::new();
        let bad = Region {
            left: 100,
            top: 100,
            right: 90,
            bottom: 200,
        };
        let res = backend.capture_region(&bad).await.unwrap();
        assert!(!res.success);
        assert_eq!(res.error.unwrap().kind, FailureKind::Failed);
    }
}
