//! Native Windows capture via Win32 GDI.
//!
//! In-process screen copy, no subprocess involved: fastest and most reliable
//! path when the agent runs on the Windows host itself. Coordinates are
//! screen-absolute; the virtual screen may start at negative coordinates and
//! BitBlt accepts them as-is.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::capture::{CaptureBackend, CaptureCapability, CaptureResult, FailureKind};
use crate::error::SentinelResult;
use crate::platform::{BackendKind, PlatformProfile};
use crate::region::Region;

pub struct NativeGdiBackend;

impl NativeGdiBackend {
    pub fn new() -> Self {
        Self
    }

    async fn capture_blocking(&self, region: Option<Region>) -> SentinelResult<CaptureResult> {
        let start = Instant::now();
        let name = self.name();

        let outcome = tokio::task::spawn_blocking(move || gdi_capture(region))
            .await
            .map_err(|e| crate::error::SentinelError::capture(format!("capture task died: {e}")))?;

        Ok(match outcome {
            Ok((image, size)) => {
                debug!(bytes = image.len(), width = size.0, height = size.1, "GDI frame captured");
                CaptureResult::captured(name, image, size, start.elapsed())
            }
            Err(message) => {
                CaptureResult::failed(name, FailureKind::Failed, message, start.elapsed())
            }
        })
    }
}

/// Virtual screen bounds: origin and extent across all monitors.
fn virtual_screen() -> (i32, i32, i32, i32) {
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN),
            GetSystemMetrics(SM_CYVIRTUALSCREEN),
        )
    }
}

/// Copies the requested rectangle off the screen DC and encodes it as PNG.
fn gdi_capture(region: Option<Region>) -> Result<(Vec<u8>, (u32, u32)), String> {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
        GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, CAPTUREBLT,
        DIB_RGB_COLORS, ROP_CODE, SRCCOPY,
    };

    let (vx, vy, vw, vh) = virtual_screen();
    if vw <= 0 || vh <= 0 {
        return Err("virtual screen reports zero extent".to_string());
    }

    let (left, top, width, height) = match region {
        Some(r) => {
            // Clamp against the virtual screen; stale caller assumptions about
            // the desktop extent are tolerated, not fatal.
            let l = r.left.max(vx);
            let t = r.top.max(vy);
            let rgt = r.right.min(vx + vw);
            let btm = r.bottom.min(vy + vh);
            if l >= rgt || t >= btm {
                return Err(format!("region {r} lies outside the virtual screen"));
            }
            if (l, t, rgt, btm) != (r.left, r.top, r.right, r.bottom) {
                warn!(requested = %r, "Capture region exceeds virtual screen, clamping");
            }
            (l, t, rgt - l, btm - t)
        }
        None => (vx, vy, vw, vh),
    };

    unsafe {
        let screen_dc = GetDC(HWND::default());
        if screen_dc.is_invalid() {
            return Err("GetDC failed".to_string());
        }
        let mem_dc = CreateCompatibleDC(screen_dc);
        let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
        let old = SelectObject(mem_dc, bitmap);

        let blt = BitBlt(
            mem_dc,
            0,
            0,
            width,
            height,
            screen_dc,
            left,
            top,
            ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
        );

        let result = if blt.is_err() {
            Err("BitBlt failed".to_string())
        } else {
            // Top-down 32bpp DIB; rows come back BGRA.
            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: 0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut pixels = vec![0u8; width as usize * height as usize * 4];
            let copied = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(pixels.as_mut_ptr() as *mut _),
                &mut info,
                DIB_RGB_COLORS,
            );
            if copied == 0 {
                Err("GetDIBits failed".to_string())
            } else {
                for px in pixels.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                Ok(pixels)
            }
        };

        SelectObject(mem_dc, old);
        let _ = DeleteObject(bitmap);
        let _ = DeleteDC(mem_dc);
        ReleaseDC(HWND::default(), screen_dc);

        let pixels = result?;
        let img = image::RgbaImage::from_raw(width as u32, height as u32, pixels)
            .ok_or_else(|| "pixel buffer has unexpected length".to_string())?;
        let mut png = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageOutputFormat::Png,
        )
        .map_err(|e| format!("png encode failed: {e}"))?;
        Ok((png, (width as u32, height as u32)))
    }
}

impl Default for NativeGdiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for NativeGdiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeGdi
    }

    fn capability(&self) -> CaptureCapability {
        CaptureCapability {
            supports_region: true,
            supports_multi_monitor: true,
            requires_elevation: false,
            performance_rank: 1,
            reliability_rank: 1,
        }
    }

    fn can_handle(&self, profile: &PlatformProfile) -> bool {
        profile.is_windows
    }

    async fn initialize(&mut self) -> SentinelResult<bool> {
        let (_, _, vw, vh) = virtual_screen();
        Ok(vw > 0 && vh > 0)
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
