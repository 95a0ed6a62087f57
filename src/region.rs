//! Capture region geometry and validation.
//!
//! A [`Region`] is the rectangular screen area under observation. Coordinates
//! are screen-absolute pixels. Invariants: `left < right`, `top < bottom`,
//! and both dimensions at least [`MIN_DIMENSION`] pixels.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SentinelError, SentinelResult};

/// Smallest usable edge length in pixels for a capture region.
pub const MIN_DIMENSION: i64 = 10;

/// A rectangular screen region in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    /// Creates a validated region, rejecting invariant violations with a
    /// configuration error.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> SentinelResult<Self> {
        let region = Self {
            left,
            top,
            right,
            bottom,
        };
        region.validate()?;
        Ok(region)
    }

    /// Checks the region invariants without constructing anything.
    pub fn validate(&self) -> SentinelResult<()> {
        if self.left >= self.right {
            return Err(SentinelError::config(format!(
                "Region left {} must be less than right {}",
                self.left, self.right
            )));
        }
        if self.top >= self.bottom {
            return Err(SentinelError::config(format!(
                "Region top {} must be less than bottom {}",
                self.top, self.bottom
            )));
        }
        let width = self.right as i64 - self.left as i64;
        let height = self.bottom as i64 - self.top as i64;
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(SentinelError::config(format!(
                "Region {}x{} is smaller than the {}px minimum",
                width, height, MIN_DIMENSION
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    /// Pixel area of the region.
    pub fn size(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Clamps the region to an image of `img_width` x `img_height` pixels
    /// whose top-left corner is the coordinate origin.
    ///
    /// This is the one tolerated configuration mismatch: callers that hold a
    /// stale idea of the screen size may request coordinates beyond the
    /// captured image. The overshoot is clamped with a logged warning rather
    /// than rejected. Returns `None` when the region does not intersect the
    /// image at all.
    pub fn clamped_to(&self, img_width: u32, img_height: u32) -> Option<Region> {
        let clamped = Region {
            left: self.left.clamp(0, img_width as i32),
            top: self.top.clamp(0, img_height as i32),
            right: self.right.clamp(0, img_width as i32),
            bottom: self.bottom.clamp(0, img_height as i32),
        };
        if clamped.left >= clamped.right || clamped.top >= clamped.bottom {
            warn!(
                region = ?self,
                img_width, img_height,
                "Capture region lies entirely outside the captured image"
            );
            return None;
        }
        if clamped != *self {
            warn!(
                requested = ?self,
                clamped = ?clamped,
                "Capture region exceeds image bounds, clamping"
            );
        }
        Some(clamped)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width(),
            self.height(),
            self.left,
            self.top
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_regions() {
        let r = Region::new(0, 0, 100, 100).unwrap();
        assert_eq!(r.width(), 100);
        assert_eq!(r.height(), 100);
        assert_eq!(r.size(), 10_000);

        // Negative origins are legal on multi-monitor layouts.
        assert!(Region::new(-1920, -50, -10, 1030).is_ok());

        // Exactly the minimum edge length.
        assert!(Region::new(0, 0, 10, 10).is_ok());
    }

    #[test]
    fn rejects_inverted_edges() {
        assert!(Region::new(100, 0, 0, 100).is_err());
        assert!(Region::new(0, 100, 100, 0).is_err());
        assert!(Region::new(50, 50, 50, 100).is_err());
    }

    #[test]
    fn rejects_sub_minimum_dimensions() {
        assert!(Region::new(0, 0, 9, 100).is_err());
        assert!(Region::new(0, 0, 100, 9).is_err());
    }

    #[test]
    fn clamps_overshoot_to_image_bounds() {
        let r = Region::new(100, 100, 3000, 2000).unwrap();
        let clamped = r.clamped_to(1920, 1080).unwrap();
        assert_eq!(clamped.left, 100);
        assert_eq!(clamped.top, 100);
        assert_eq!(clamped.right, 1920);
        assert_eq!(clamped.bottom, 1080);
    }

    #[test]
    fn clamp_returns_none_without_overlap() {
        let r = Region::new(2000, 2000, 2100, 2100).unwrap();
        assert!(r.clamped_to(1920, 1080).is_none());
    }

    #[test]
    fn display_format() {
        let r = Region::new(10, 20, 110, 220).unwrap();
        assert_eq!(r.to_string(), "100x200+10+20");
    }
}
