//! Platform detection and capture backend recommendation.
//!
//! The probe inspects the runtime environment (display server variables,
//! guest-OS markers, helper binaries) and produces an ordered list of
//! backend kinds for the capture chain to try. Detection is cached per probe
//! instance; tests construct isolated probes and invalidate at will instead
//! of sharing module-level state.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// Identifier for one concrete capture technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process Win32 GDI capture on a native Windows host.
    NativeGdi,
    /// Guest Linux shelling a script to the Windows host interpreter.
    HostBridge,
    /// Wayland compositor helper tools.
    Wayland,
    /// X11 helper tools.
    X11,
    /// Cross-platform capture library, last resort.
    Portable,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::NativeGdi => "native-gdi",
            BackendKind::HostBridge => "host-bridge",
            BackendKind::Wayland => "wayland",
            BackendKind::X11 => "x11",
            BackendKind::Portable => "portable",
        }
    }

    /// True for backends that talk to a display server directly.
    pub fn is_display_server(&self) -> bool {
        matches!(self, BackendKind::Wayland | BackendKind::X11)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the probe learned about the runtime environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub is_windows: bool,
    pub is_linux: bool,
    /// Linux guest on a Windows host (WSL-style interop).
    pub is_guest_linux: bool,
    pub is_wayland: bool,
    pub has_x11: bool,
    /// Host-side script interpreter answered the probe.
    pub has_host_bridge: bool,
}

/// Timeout for the single host-interpreter probe subprocess.
const BRIDGE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Well-known interpreter location when PATH interop is not set up.
const HOST_INTERPRETER_FALLBACK: &str =
    "/mnt/c/Windows/System32/WindowsPowerShell/v1.0/powershell.exe";

/// Probes the runtime environment and recommends capture backends.
///
/// Results are cached for the lifetime of the probe; `invalidate` clears the
/// cache so the next `detect` re-reads the environment.
pub struct PlatformProbe {
    cache: Mutex<Option<PlatformProfile>>,
}

impl PlatformProbe {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    /// Detects the platform profile, reusing the cached result when present.
    pub async fn detect(&self) -> PlatformProfile {
        if let Some(profile) = self.cache.lock().unwrap().clone() {
            return profile;
        }

        let profile = Self::detect_uncached().await;
        info!(?profile, "Platform profile detected");
        *self.cache.lock().unwrap() = Some(profile.clone());
        profile
    }

    /// Drops the cached profile so the next `detect` re-probes.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    /// Ordered backend kinds for the detected profile.
    pub async fn recommended_backends(&self) -> Vec<BackendKind> {
        recommended_for(&self.detect().await)
    }

    async fn detect_uncached() -> PlatformProfile {
        let is_windows = cfg!(target_os = "windows");
        let is_linux = cfg!(target_os = "linux");
        let is_guest_linux = is_linux && guest_marker_present();

        // Guest detection suppresses display-server detection outright: a
        // DISPLAY variable inherited through a host tunnel must not route
        // capture at a display server the guest cannot reach.
        let (is_wayland, has_x11) = if is_guest_linux {
            debug!("Guest-Linux marker present, suppressing display server detection");
            (false, false)
        } else {
            (
                std::env::var_os("WAYLAND_DISPLAY").is_some(),
                std::env::var_os("DISPLAY").is_some(),
            )
        };

        let has_host_bridge = if is_guest_linux {
            probe_host_bridge().await
        } else {
            false
        };

        PlatformProfile {
            is_windows,
            is_linux,
            is_guest_linux,
            is_wayland,
            has_x11,
            has_host_bridge,
        }
    }
}

impl Default for PlatformProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure ordering logic over a profile. Guest Linux is checked before any
/// display-server kind so an inherited display variable can never reintroduce
/// X11/Wayland capture inside a guest.
pub fn recommended_for(profile: &PlatformProfile) -> Vec<BackendKind> {
    if profile.is_windows {
        return vec![BackendKind::NativeGdi, BackendKind::Portable];
    }
    if profile.is_guest_linux {
        return if profile.has_host_bridge {
            vec![BackendKind::HostBridge, BackendKind::Portable]
        } else {
            vec![BackendKind::Portable]
        };
    }
    if profile.is_wayland {
        let mut kinds = vec![BackendKind::Wayland];
        if profile.has_x11 {
            // XWayland lets the X11 tools work as a fallback.
            kinds.push(BackendKind::X11);
        }
        kinds.push(BackendKind::Portable);
        return kinds;
    }
    if profile.has_x11 {
        return vec![BackendKind::X11, BackendKind::Portable];
    }
    vec![BackendKind::Portable]
}

/// Checks the WSL-style guest markers: interop variables or the kernel
/// version string naming the host vendor.
fn guest_marker_present() -> bool {
    if std::env::var_os("WSL_DISTRO_NAME").is_some() || std::env::var_os("WSL_INTEROP").is_some() {
        return true;
    }
    match std::fs::read_to_string("/proc/version") {
        Ok(version) => {
            let version = version.to_ascii_lowercase();
            version.contains("microsoft") || version.contains("wsl")
        }
        Err(_) => false,
    }
}

/// Locates the host-side script interpreter, preferring PATH interop.
pub(crate) fn locate_host_interpreter() -> Option<PathBuf> {
    if let Ok(path) = which::which("powershell.exe") {
        return Some(path);
    }
    let fallback = PathBuf::from(HOST_INTERPRETER_FALLBACK);
    fallback.exists().then_some(fallback)
}

/// Runs the one short-timeout probe subprocess: does the host interpreter
/// answer at all? A timeout is treated as "bridge absent".
async fn probe_host_bridge() -> bool {
    let Some(interpreter) = locate_host_interpreter() else {
        debug!("Host interpreter not found on PATH or fallback location");
        return false;
    };

    let invocation = Command::new(&interpreter)
        .args(["-NoProfile", "-NonInteractive", "-Command", "exit 0"])
        .output();

    match tokio::time::timeout(BRIDGE_PROBE_TIMEOUT, invocation).await {
        Ok(Ok(output)) if output.status.success() => {
            debug!(interpreter = %interpreter.display(), "Host bridge probe succeeded");
            true
        }
        Ok(Ok(output)) => {
            debug!(status = ?output.status, "Host bridge probe exited nonzero");
            false
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Host bridge probe failed to spawn");
            false
        }
        Err(_) => {
            debug!("Host bridge probe timed out");
            false
        }
    }
}
