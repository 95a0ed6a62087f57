//! Guest-to-host capture bridge.
//!
//! Used when the monitoring process runs inside a Linux guest on a Windows
//! host (WSL-style interop) with no framebuffer of its own. A generated
//! script is shelled to the host-side interpreter; the script reads the
//! virtual screen bounds, copies the requested rectangle into an off-screen
//! bitmap, and writes the PNG as base64 on stdout between payload markers.
//! Everything outside the markers is host diagnostics and gets stripped.
//!
//! Region coordinates are forwarded as already screen-absolute; the bridge
//! performs no virtual-screen-origin remapping. The virtual bounds the host
//! reported are logged at debug level so origin mismatches on negative-origin
//! monitor layouts stay diagnosable.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::capture::{
    png_dimensions, CaptureBackend, CaptureCapability, CaptureResult, FailureKind,
};
use crate::error::SentinelResult;
use crate::platform::{locate_host_interpreter, BackendKind, PlatformProfile};
use crate::region::Region;

/// Upper bound on one host-side invocation. Script startup on a loaded host
/// can take tens of seconds; anything past this is reported as a timeout,
/// distinct from the interpreter being absent.
const BRIDGE_CALL_TIMEOUT: Duration = Duration::from_secs(45);

const PAYLOAD_BEGIN: &str = "-----BEGIN SENTINEL FRAME-----";
const PAYLOAD_END: &str = "-----END SENTINEL FRAME-----";

/// Capture backend that shells a generated script to the host interpreter.
pub struct HostBridgeBackend {
    interpreter: Option<PathBuf>,
    /// Host-side invocations share one off-screen bitmap path; two racing
    /// invocations are undefined, so calls are serialized here.
    invoke_lock: Mutex<()>,
}

impl HostBridgeBackend {
    pub fn new() -> Self {
        Self {
            interpreter: None,
            invoke_lock: Mutex::new(()),
        }
    }

    /// Builds the host-side script. `region` of `None` captures the whole
    /// virtual screen.
    fn build_script(region: Option<&Region>) -> String {
        let (bounds, label) = match region {
            Some(r) => (
                format!(
                    "$cl = {}; $ct = {}; $cw = {}; $ch = {}",
                    r.left,
                    r.top,
                    r.width(),
                    r.height()
                ),
                "region",
            ),
            None => (
                "$cl = $vs.X; $ct = $vs.Y; $cw = $vs.Width; $ch = $vs.Height".to_string(),
                "full screen",
            ),
        };

        format!(
            r#"$ErrorActionPreference = 'Stop'
Add-Type -AssemblyName System.Windows.Forms
Add-Type -AssemblyName System.Drawing
$vs = [System.Windows.Forms.SystemInformation]::VirtualScreen
Write-Output ("capturing {label}; virtual screen {{0}},{{1}} {{2}}x{{3}}" -f $vs.X, $vs.Y, $vs.Width, $vs.Height)
{bounds}
$bmp = New-Object System.Drawing.Bitmap($cw, $ch)
$gfx = [System.Drawing.Graphics]::FromImage($bmp)
$gfx.CopyFromScreen($cl, $ct, 0, 0, $bmp.Size)
$ms = New-Object System.IO.MemoryStream
$bmp.Save($ms, [System.Drawing.Imaging.ImageFormat]::Png)
$gfx.Dispose()
$bmp.Dispose()
Write-Output '{begin}'
Write-Output ([Convert]::ToBase64String($ms.ToArray()))
Write-Output '{end}'
"#,
            label = label,
            bounds = bounds,
            begin = PAYLOAD_BEGIN,
            end = PAYLOAD_END,
        )
    }

    /// Pulls the base64 payload from between the markers, ignoring any
    /// interleaved diagnostic lines outside them.
    fn extract_payload(stdout: &str) -> Option<String> {
        let begin = stdout.find(PAYLOAD_BEGIN)? + PAYLOAD_BEGIN.len();
        let end = stdout[begin..].find(PAYLOAD_END)? + begin;
        let payload: String = stdout[begin..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        (!payload.is_empty()).then_some(payload)
    }

    async fn invoke(&self, script: String) -> SentinelResult<CaptureResult> {
        let _guard = self.invoke_lock.lock().await;
        let start = Instant::now();

        let Some(interpreter) = &self.interpreter else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::ToolAbsent,
                "host interpreter not resolved; initialize() first",
                start.elapsed(),
            ));
        };

        let invocation = Command::new(interpreter)
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output();

        let output = match tokio::time::timeout(BRIDGE_CALL_TIMEOUT, invocation).await {
            Err(_) => {
                warn!(timeout_secs = BRIDGE_CALL_TIMEOUT.as_secs(), "Host bridge call timed out");
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::TimedOut,
                    format!(
                        "host interpreter did not answer within {}s",
                        BRIDGE_CALL_TIMEOUT.as_secs()
                    ),
                    start.elapsed(),
                ));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::ToolAbsent,
                    format!("host interpreter vanished: {e}"),
                    start.elapsed(),
                ));
            }
            Ok(Err(e)) => {
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::Failed,
                    format!("failed to spawn host interpreter: {e}"),
                    start.elapsed(),
                ));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                format!(
                    "host script exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
                start.elapsed(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().take_while(|l| !l.contains(PAYLOAD_BEGIN)) {
            debug!(host = line, "Bridge diagnostic");
        }

        let Some(payload) = Self::extract_payload(&stdout) else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                "host output carried no payload markers",
                start.elapsed(),
            ));
        };

        let bytes = match general_purpose::STANDARD.decode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::Failed,
                    format!("payload is not valid base64: {e}"),
                    start.elapsed(),
                ));
            }
        };

        let Some(size) = png_dimensions(&bytes) else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                "decoded payload is not a valid PNG",
                start.elapsed(),
            ));
        };

        debug!(bytes = bytes.len(), width = size.0, height = size.1, "Bridge frame captured");
        Ok(CaptureResult::captured(
            self.name(),
            bytes,
            size,
            start.elapsed(),
        ))
    }
}

impl Default for HostBridgeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for HostBridgeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HostBridge
    }

    fn capability(&self) -> CaptureCapability {
        CaptureCapability {
            supports_region: true,
            supports_multi_monitor: true,
            requires_elevation: false,
            performance_rank: 4,
            reliability_rank: 2,
        }
    }

    fn can_handle(&self, profile: &PlatformProfile) -> bool {
        profile.is_guest_linux && profile.has_host_bridge
    }

    async fn initialize(&mut self) -> SentinelResult<bool> {
        if self.interpreter.is_some() {
            return Ok(true);
        }
        self.interpreter = locate_host_interpreter();
        if let Some(path) = &self.interpreter {
            debug!(interpreter = %path.display(), "Host bridge initialized");
        }
        Ok(self.interpreter.is_some())
    }

    async fn capture_full_screen(&self) -> SentinelResult<CaptureResult> {
        self.invoke(Self::build_script(None)).await
    }

    async fn capture_region(&self, region: &Region) -> SentinelResult<CaptureResult> {
        if region.validate().is_err() {
            return Ok(CaptureResult::invalid_region(self.name(), region));
        }
        self.invoke(Self::build_script(Some(region))).await
    }

    async fn cleanup(&mut self) {
        self.interpreter = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_extracted_between_markers() {
        let stdout = format!(
            "loading assemblies\nvirtual screen -1920,0 3840x1080\n{}\nSGVs\nbG8=\n{}\ntrailing noise\n",
            PAYLOAD_BEGIN, PAYLOAD_END
        );
        let payload = HostBridgeBackend::extract_payload(&stdout).unwrap();
        assert_eq!(payload, "SGVsbG8=");
        assert_eq!(general_purpose::STANDARD.decode(payload).unwrap(), b"Hello");
    }

    #[test]
    fn missing_markers_yield_none() {
        assert!(HostBridgeBackend::extract_payload("diagnostics only").is_none());
        let begin_only = format!("{}\nAAAA", PAYLOAD_BEGIN);
        assert!(HostBridgeBackend::extract_payload(&begin_only).is_none());
    }

    #[test]
    fn empty_payload_yields_none() {
        let stdout = format!("{}\n\n{}", PAYLOAD_BEGIN, PAYLOAD_END);
        assert!(HostBridgeBackend::extract_payload(&stdout).is_none());
    }

    #[test]
    fn region_script_uses_absolute_coordinates() {
        let region = Region::new(-100, 50, 540, 530).unwrap();
        let script = HostBridgeBackend::build_script(Some(&region));
        // Caller coordinates go through unmapped; width/height are derived.
        assert!(script.contains("$cl = -100; $ct = 50; $cw = 640; $ch = 480"));
        assert!(script.contains(PAYLOAD_BEGIN));
        assert!(script.contains(PAYLOAD_END));
    }

    #[test]
    fn full_screen_script_uses_virtual_bounds() {
        let script = HostBridgeBackend::build_script(None);
        assert!(script.contains("$cl = $vs.X"));
        assert!(script.contains("$cw = $vs.Width"));
    }

    #[tokio::test]
    async fn uninitialized_backend_reports_tool_absent() {
        let backend = HostBridgeBackend::new();
        let res = backend
            .invoke(HostBridgeBackend::build_script(None))
            .await
            .unwrap();
        assert!(!res.success);
        assert_eq!(res.error.unwrap().kind, FailureKind::ToolAbsent);
    }

    #[tokio::test]
    async fn malformed_region_rejected_as_value() {
        let backend = HostBridgeBackend::new();
        let bad = Region {
            left: 0,
            top: 0,
            right: 5,
            bottom: 5,
        };
        let res = backend.capture_region(&bad).await.unwrap();
        assert!(!res.success);
    }
}
