/*!
 * Screen Sentinel Library
 *
 * Core modules for periodic screen-region capture and change detection.
 *
 * The flow: a platform probe picks an ordered set of capture backends, the
 * capture chain walks them with fallback, a monitor session polls the chain
 * and runs a change detector against a rolling baseline, and typed events
 * reach downstream consumers through the in-process bus.
 */

pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod monitor;
pub mod platform;
pub mod region;

// Re-export commonly used types
pub use capture::{CaptureBackend, CaptureCapability, CaptureChain, CaptureResult};
pub use config::{LoggingConfig, MonitorConfig};
pub use detect::{build_detector, ChangeDetectionResult, ChangeDetector, DetectionMethod};
pub use error::{SentinelError, SentinelResult};
pub use events::{Event, EventBus, EventType};
pub use monitor::{MonitorSession, SessionStatus};
pub use platform::{BackendKind, PlatformProbe, PlatformProfile};
pub use region::Region;
