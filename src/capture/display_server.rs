//! Display-server capture via helper tools.
//!
//! One backend each for the X11 and Wayland tool families. Initialization
//! walks a priority list and keeps the first tool that exists on PATH;
//! capture shells the tool with the rectangle as command arguments and reads
//! PNG bytes from stdout. Tools that only write files get a temp path and a
//! read-back; tools that cannot take a rectangle capture the full screen and
//! the backend crops.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::capture::{
    crop_encoded, png_dimensions, CaptureBackend, CaptureCapability, CaptureResult, FailureKind,
};
use crate::error::SentinelResult;
use crate::platform::{BackendKind, PlatformProfile};
use crate::region::Region;

/// Helper tools answer fast or not at all.
const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    /// Tool writes the image to stdout.
    Stdout,
    /// Tool only writes files; capture via temp path and read back.
    TempFile,
}

/// One helper tool and how to drive it.
#[derive(Debug)]
struct ToolSpec {
    binary: &'static str,
    output: OutputMode,
    supports_region: bool,
}

impl ToolSpec {
    fn full_args(&self, out_path: &str) -> Vec<String> {
        match self.binary {
            "maim" => vec!["--format=png".into(), "/dev/stdout".into()],
            "scrot" => vec!["-o".into(), out_path.into()],
            "import" => vec!["-window".into(), "root".into(), "png:-".into()],
            "grim" => vec!["-t".into(), "png".into(), "-".into()],
            "gnome-screenshot" => vec!["-f".into(), out_path.into()],
            other => unreachable!("unknown helper tool {other}"),
        }
    }

    fn region_args(&self, region: &Region, out_path: &str) -> Vec<String> {
        let (x, y, w, h) = (region.left, region.top, region.width(), region.height());
        match self.binary {
            "maim" => vec![
                "--format=png".into(),
                "-g".into(),
                format!("{w}x{h}+{x}+{y}"),
                "/dev/stdout".into(),
            ],
            "scrot" => vec![
                "-o".into(),
                "-a".into(),
                format!("{x},{y},{w},{h}"),
                out_path.into(),
            ],
            "import" => vec![
                "-window".into(),
                "root".into(),
                "-crop".into(),
                format!("{w}x{h}+{x}+{y}"),
                "+repage".into(),
                "png:-".into(),
            ],
            "grim" => vec![
                "-t".into(),
                "png".into(),
                "-g".into(),
                format!("{x},{y} {w}x{h}"),
                "-".into(),
            ],
            other => unreachable!("tool {other} does not take region arguments"),
        }
    }
}

/// X11 tool ladder, most capable first.
static X11_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        binary: "maim",
        output: OutputMode::Stdout,
        supports_region: true,
    },
    ToolSpec {
        binary: "scrot",
        output: OutputMode::TempFile,
        supports_region: true,
    },
    ToolSpec {
        binary: "import",
        output: OutputMode::Stdout,
        supports_region: true,
    },
];

/// Wayland tool ladder.
static WAYLAND_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        binary: "grim",
        output: OutputMode::Stdout,
        supports_region: true,
    },
    ToolSpec {
        binary: "gnome-screenshot",
        output: OutputMode::TempFile,
        supports_region: false,
    },
];

/// Capture backend driving X11-class or Wayland-class helper tools.
pub struct DisplayServerBackend {
    kind: BackendKind,
    tools: &'static [ToolSpec],
    selected: Option<&'static ToolSpec>,
}

impl DisplayServerBackend {
    pub fn x11() -> Self {
        Self {
            kind: BackendKind::X11,
            tools: X11_TOOLS,
            selected: None,
        }
    }

    pub fn wayland() -> Self {
        Self {
            kind: BackendKind::Wayland,
            tools: WAYLAND_TOOLS,
            selected: None,
        }
    }

    fn temp_path(&self) -> String {
        format!(
            "/tmp/screen_sentinel_{}_{}.png",
            std::process::id(),
            self.kind.as_str()
        )
    }

    async fn run_tool(
        &self,
        tool: &ToolSpec,
        args: Vec<String>,
    ) -> SentinelResult<CaptureResult> {
        let start = Instant::now();
        let temp_path = self.temp_path();
        if tool.output == OutputMode::TempFile {
            let _ = std::fs::remove_file(&temp_path);
        }

        let invocation = Command::new(tool.binary)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(TOOL_TIMEOUT, invocation).await {
            Err(_) => {
                warn!(tool = tool.binary, "Helper tool timed out");
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::TimedOut,
                    format!(
                        "{} did not finish within {}s",
                        tool.binary,
                        TOOL_TIMEOUT.as_secs()
                    ),
                    start.elapsed(),
                ));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::ToolAbsent,
                    format!("{} is not installed", tool.binary),
                    start.elapsed(),
                ));
            }
            Ok(Err(e)) => {
                return Ok(CaptureResult::failed(
                    self.name(),
                    FailureKind::Failed,
                    format!("failed to run {}: {e}", tool.binary),
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
                format!("{} exited with {}: {}", tool.binary, output.status, stderr.trim()),
                start.elapsed(),
            ));
        }

        let bytes = match tool.output {
            OutputMode::Stdout => output.stdout,
            OutputMode::TempFile => {
                let bytes = std::fs::read(&temp_path).unwrap_or_default();
                let _ = std::fs::remove_file(&temp_path);
                bytes
            }
        };

        if bytes.is_empty() {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                format!("{} produced no image data", tool.binary),
                start.elapsed(),
            ));
        }

        let Some(size) = png_dimensions(&bytes) else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                format!("{} output did not decode as an image", tool.binary),
                start.elapsed(),
            ));
        };

        debug!(tool = tool.binary, bytes = bytes.len(), "Helper tool frame captured");
        Ok(CaptureResult::captured(self.name(), bytes, size, start.elapsed()))
    }
}

#[async_trait]
impl CaptureBackend for DisplayServerBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capability(&self) -> CaptureCapability {
        CaptureCapability {
            supports_region: true,
            supports_multi_monitor: true,
            requires_elevation: false,
            performance_rank: 3,
            reliability_rank: 3,
        }
    }

    fn can_handle(&self, profile: &PlatformProfile) -> bool {
        if profile.is_guest_linux {
            return false;
        }
        match self.kind {
            BackendKind::X11 => profile.has_x11,
            BackendKind::Wayland => profile.is_wayland,
            _ => false,
        }
    }

    async fn initialize(&mut self) -> SentinelResult<bool> {
        if self.selected.is_some() {
            return Ok(true);
        }
        self.selected = self
            .tools
            .iter()
            .find(|tool| which::which(tool.binary).is_ok());
        match self.selected {
            Some(tool) => {
                debug!(kind = %self.kind, tool = tool.binary, "Display-server backend initialized");
                Ok(true)
            }
            None => {
                debug!(kind = %self.kind, "No helper tool found on PATH");
                Ok(false)
            }
        }
    }

    async fn capture_full_screen(&self) -> SentinelResult<CaptureResult> {
        let Some(tool) = self.selected else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::ToolAbsent,
                "no helper tool selected",
                Duration::ZERO,
            ));
        };
        let args = tool.full_args(&self.temp_path());
        self.run_tool(tool, args).await
    }

    async fn capture_region(&self, region: &Region) -> SentinelResult<CaptureResult> {
        if region.validate().is_err() {
            return Ok(CaptureResult::invalid_region(self.name(), region));
        }
        let Some(tool) = self.selected else {
            return Ok(CaptureResult::failed(
                self.name(),
                FailureKind::ToolAbsent,
                "no helper tool selected",
                Duration::ZERO,
            ));
        };

        if tool.supports_region {
            let args = tool.region_args(region, &self.temp_path());
            return self.run_tool(tool, args).await;
        }

        // Tool can only do full frames; crop locally.
        let full = self.run_tool(tool, tool.full_args(&self.temp_path())).await?;
        if !full.success {
            return Ok(full);
        }
        match crop_encoded(&full.image, region) {
            Ok((image, size)) => Ok(CaptureResult::captured(
                self.name(),
                image,
                size,
                full.elapsed,
            )),
            Err(message) => Ok(CaptureResult::failed(
                self.name(),
                FailureKind::Failed,
                message,
                full.elapsed,
            )),
        }
    }

    async fn cleanup(&mut self) {
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maim_region_geometry_argument() {
        let region = Region::new(10, 20, 110, 220).unwrap();
        let args = X11_TOOLS[0].region_args(&region, "/tmp/unused.png");
        assert!(args.contains(&"100x200+10+20".to_string()));
    }

    #[test]
    fn grim_region_geometry_argument() {
        let region = Region::new(-1920, 0, -1280, 480).unwrap();
        let args = WAYLAND_TOOLS[0].region_args(&region, "/tmp/unused.png");
        assert!(args.contains(&"-1920,0 640x480".to_string()));
    }

    #[test]
    fn scrot_uses_temp_file() {
        let region = Region::new(0, 0, 100, 100).unwrap();
        let args = X11_TOOLS[1].region_args(&region, "/tmp/shot.png");
        assert_eq!(X11_TOOLS[1].output, OutputMode::TempFile);
        assert!(args.contains(&"/tmp/shot.png".to_string()));
        assert!(args.contains(&"0,0,100,100".to_string()));
    }

    #[test]
    fn guest_profile_is_never_handled() {
        let backend = DisplayServerBackend::x11();
        let profile = PlatformProfile {
            is_linux: true,
            is_guest_linux: true,
            has_x11: true,
            is_wayland: true,
            ..Default::default()
        };
        assert!(!backend.can_handle(&profile));
        assert!(!DisplayServerBackend::wayland().can_handle(&profile));
    }

    #[tokio::test]
    async fn capture_without_selected_tool_is_tool_absent() {
        let backend = DisplayServerBackend::wayland();
        let res = backend.capture_full_screen().await.unwrap();
        assert!(!res.success);
        assert_eq!(res.error.unwrap().kind, FailureKind::ToolAbsent);
    }
}
