//! Monitoring session: a cancellable polling loop bound to one region, one
//! detector, and one capture chain.
//!
//! The loop runs on its own tokio worker with a single cooperative cadence.
//! Per-cycle failures are counted and published, never session-ending; only
//! an unexpected fault from the capture layer moves the session to the
//! terminal Error state. Stop is cooperative: the status flag is checked at
//! cycle start and again after the blocking capture call returns, and
//! `stop()` joins the worker so a stopped session emits nothing further.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::CaptureChain;
use crate::config::{validate_interval, validate_sensitivity, MonitorConfig};
use crate::detect::{build_detector, ChangeDetector, DetectionMethod};
use crate::error::{SentinelError, SentinelResult};
use crate::events::{Event, EventBus, EventType};
use crate::region::Region;

/// Sleep slice while paused; pauses poll without counting cycles.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of one monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    /// Terminal; a fatal fault ended the loop. Requires a new session.
    Error,
    Stopped,
}

/// Live counters for one session, updated only by its own loop.
#[derive(Debug, Default)]
pub struct SessionStats {
    cycles: AtomicU64,
    screenshots_taken: AtomicU64,
    changes_detected: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStatsSnapshot {
    pub cycles: u64,
    pub screenshots_taken: u64,
    pub changes_detected: u64,
    pub errors: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            screenshots_taken: self.screenshots_taken.load(Ordering::Relaxed),
            changes_detected: self.changes_detected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Live-tunable loop parameters.
#[derive(Debug, Clone)]
struct Settings {
    interval: Duration,
    sensitivity: f64,
    method: DetectionMethod,
}

/// Full status answer for external queries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub status: SessionStatus,
    pub region: Region,
    pub check_interval_secs: f64,
    pub sensitivity: f64,
    pub detection_method: DetectionMethod,
    pub stats: SessionStatsSnapshot,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

struct Shared {
    id: Uuid,
    region: Region,
    chain: Arc<CaptureChain>,
    bus: Arc<EventBus>,
    status: Mutex<SessionStatus>,
    detector: Mutex<Box<dyn ChangeDetector>>,
    settings: Mutex<Settings>,
    stats: SessionStats,
    last_error: Mutex<Option<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_check_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Counts a per-cycle failure and publishes it. The loop continues.
    fn transient_error(&self, message: String, detail: serde_json::Value) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = Some(message.clone());
        self.bus.publish(Event::new(
            EventType::MonitorError,
            self.id.to_string(),
            json!({ "fatal": false, "message": message, "detail": detail }),
        ));
    }
}

/// One region, one detector, one chain, one worker.
pub struct MonitorSession {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl MonitorSession {
    /// Validates the configuration and prepares an Idle session. Nothing
    /// runs until `start`.
    pub fn new(
        config: MonitorConfig,
        chain: Arc<CaptureChain>,
        bus: Arc<EventBus>,
    ) -> SentinelResult<Self> {
        config.validate()?;
        let detector = build_detector(config.detection_method, config.sensitivity);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            region: config.region,
            chain,
            bus,
            status: Mutex::new(SessionStatus::Idle),
            detector: Mutex::new(detector),
            settings: Mutex::new(Settings {
                interval: Duration::from_secs_f64(config.check_interval_secs),
                sensitivity: config.sensitivity,
                method: config.detection_method,
            }),
            stats: SessionStats::default(),
            last_error: Mutex::new(None),
            started_at: Mutex::new(None),
            last_check_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
        });
        Ok(Self {
            shared,
            task: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Starts the polling loop. Rejected unless the session is Idle and the
    /// chain has at least one usable backend.
    pub fn start(&mut self) -> SentinelResult<()> {
        {
            let mut status = self.shared.status.lock().unwrap();
            match *status {
                SessionStatus::Idle => {}
                SessionStatus::Running => {
                    return Err(SentinelError::session("session is already running"));
                }
                other => {
                    return Err(SentinelError::session(format!(
                        "cannot start a session in state {other:?}"
                    )));
                }
            }
            if self.shared.chain.is_empty() {
                return Err(SentinelError::session(
                    "capture chain has no usable backends",
                ));
            }
            *status = SessionStatus::Running;
        }

        *self.shared.started_at.lock().unwrap() = Some(Utc::now());
        let settings = self.shared.settings.lock().unwrap().clone();
        self.shared.bus.publish(Event::new(
            EventType::MonitorStarted,
            self.shared.id.to_string(),
            json!({
                "region": self.shared.region,
                "check_interval_secs": settings.interval.as_secs_f64(),
                "detection_method": settings.method.as_str(),
            }),
        ));

        info!(session = %self.shared.id, region = %self.shared.region, "Monitor session starting");
        let shared = self.shared.clone();
        self.task = Some(tokio::spawn(run_loop(shared)));
        Ok(())
    }

    /// Pauses the loop; only valid while Running.
    pub fn pause(&self) -> SentinelResult<()> {
        let mut status = self.shared.status.lock().unwrap();
        if *status != SessionStatus::Running {
            return Err(SentinelError::session(format!(
                "cannot pause a session in state {:?}",
                *status
            )));
        }
        *status = SessionStatus::Paused;
        info!(session = %self.shared.id, "Monitor session paused");
        Ok(())
    }

    /// Resumes a paused loop; only valid while Paused.
    pub fn resume(&self) -> SentinelResult<()> {
        let mut status = self.shared.status.lock().unwrap();
        if *status != SessionStatus::Paused {
            return Err(SentinelError::session(format!(
                "cannot resume a session in state {:?}",
                *status
            )));
        }
        *status = SessionStatus::Running;
        info!(session = %self.shared.id, "Monitor session resumed");
        Ok(())
    }

    /// Stops the loop and waits for the in-flight cycle to finish, so after
    /// this returns no further events are published. Idempotent; valid from
    /// any state. Latency is bounded by the active backend's own timeout.
    pub async fn stop(&mut self) -> SentinelResult<()> {
        let prior = {
            let mut status = self.shared.status.lock().unwrap();
            let prior = *status;
            if prior == SessionStatus::Stopped {
                return Ok(());
            }
            *status = SessionStatus::Stopped;
            prior
        };

        if let Some(task) = self.task.take() {
            if task.await.is_err() {
                warn!(session = %self.shared.id, "Monitor loop panicked before stop");
                *self.shared.last_error.lock().unwrap() =
                    Some("monitor loop panicked".to_string());
            }
        }

        *self.shared.stopped_at.lock().unwrap() = Some(Utc::now());
        self.shared.bus.publish(Event::new(
            EventType::MonitorStopped,
            self.shared.id.to_string(),
            json!({ "prior_status": format!("{prior:?}"), "stats": self.shared.stats.snapshot() }),
        ));
        info!(session = %self.shared.id, "Monitor session stopped");
        Ok(())
    }

    /// Applies live setting changes without a restart. A detection-method
    /// swap rebuilds the detector, which implicitly resets its baseline.
    pub fn update_settings(
        &self,
        check_interval_secs: Option<f64>,
        sensitivity: Option<f64>,
        detection_method: Option<DetectionMethod>,
    ) -> SentinelResult<()> {
        if let Some(secs) = check_interval_secs {
            validate_interval(secs)?;
        }
        if let Some(value) = sensitivity {
            validate_sensitivity(value)?;
        }

        let mut settings = self.shared.settings.lock().unwrap();
        if let Some(secs) = check_interval_secs {
            settings.interval = Duration::from_secs_f64(secs);
        }
        if let Some(value) = sensitivity {
            settings.sensitivity = value;
            self.shared.detector.lock().unwrap().update_sensitivity(value);
        }
        if let Some(method) = detection_method {
            settings.method = method;
            *self.shared.detector.lock().unwrap() =
                build_detector(method, settings.sensitivity);
            debug!(session = %self.shared.id, method = %method, "Detector swapped, baseline reset");
        }
        Ok(())
    }

    /// Status answer for external queries: state, counters, last error,
    /// timestamps.
    pub fn snapshot(&self) -> SessionSnapshot {
        let settings = self.shared.settings.lock().unwrap().clone();
        SessionSnapshot {
            id: self.shared.id,
            status: self.shared.status(),
            region: self.shared.region,
            check_interval_secs: settings.interval.as_secs_f64(),
            sensitivity: settings.sensitivity,
            detection_method: settings.method,
            stats: self.shared.stats.snapshot(),
            last_error: self.shared.last_error.lock().unwrap().clone(),
            started_at: *self.shared.started_at.lock().unwrap(),
            last_check_at: *self.shared.last_check_at.lock().unwrap(),
            stopped_at: *self.shared.stopped_at.lock().unwrap(),
        }
    }
}

async fn run_loop(shared: Arc<Shared>) {
    info!(session = %shared.id, "Monitor loop running");
    loop {
        match shared.status() {
            SessionStatus::Running => {}
            SessionStatus::Paused => {
                tokio::time::sleep(PAUSE_POLL).await;
                continue;
            }
            _ => break,
        }

        shared.stats.cycles.fetch_add(1, Ordering::Relaxed);
        match run_cycle(&shared).await {
            Ok(()) => {}
            Err(fatal) => {
                let message = format!("fatal capture fault: {fatal}");
                warn!(session = %shared.id, error = %fatal, "Monitor loop entering Error state");
                shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                *shared.last_error.lock().unwrap() = Some(message.clone());
                *shared.status.lock().unwrap() = SessionStatus::Error;
                shared.bus.publish(Event::new(
                    EventType::MonitorError,
                    shared.id.to_string(),
                    json!({ "fatal": true, "message": message }),
                ));
                break;
            }
        }

        let interval = shared.settings.lock().unwrap().interval;
        tokio::time::sleep(interval).await;
    }
    info!(session = %shared.id, "Monitor loop exited");
}

/// One poll: capture, compare, publish. `Err` is a fatal fault; everything
/// expected is handled inside and keeps the loop alive.
async fn run_cycle(shared: &Arc<Shared>) -> SentinelResult<()> {
    let capture = shared.chain.capture_region(&shared.region).await?;

    // The capture call can block for the backend's whole timeout; honor a
    // stop that arrived meanwhile instead of publishing stale work.
    if shared.status() == SessionStatus::Stopped {
        return Ok(());
    }

    if !capture.success {
        let failure = capture
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "capture failed".to_string());
        let kind = capture.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("failed");
        shared.transient_error(
            format!("capture failed via {}: {failure}", capture.backend),
            json!({ "backend": capture.backend, "kind": kind }),
        );
        return Ok(());
    }

    shared.stats.screenshots_taken.fetch_add(1, Ordering::Relaxed);
    *shared.last_check_at.lock().unwrap() = Some(Utc::now());

    let frame = Arc::new(capture.image);
    let detection = {
        let mut detector = shared.detector.lock().unwrap();
        catch_unwind(AssertUnwindSafe(|| detector.detect_change(&frame)))
    };
    let result = match detection {
        Ok(result) => result,
        Err(_) => {
            shared.transient_error(
                "change detector panicked".to_string(),
                json!({ "backend": capture.backend }),
            );
            return Ok(());
        }
    };

    debug!(
        session = %shared.id,
        changed = result.changed,
        score = result.score,
        method = %result.method,
        "Cycle complete"
    );

    if result.changed {
        shared.stats.changes_detected.fetch_add(1, Ordering::Relaxed);

        shared.bus.publish(
            Event::new(
                EventType::ChangeDetected,
                shared.id.to_string(),
                json!({
                    "score": result.score,
                    "confidence": result.confidence,
                    "method": result.method.as_str(),
                    "metadata": result.metadata,
                    "region": shared.region,
                }),
            )
            .with_frame(frame.clone()),
        );
        shared.bus.publish(
            Event::new(
                EventType::ScreenshotCaptured,
                shared.id.to_string(),
                json!({
                    "backend": capture.backend,
                    "region": shared.region,
                    "width": capture.size.0,
                    "height": capture.size.1,
                    "bytes": frame.len(),
                    "elapsed_ms": capture.elapsed.as_millis() as u64,
                    "score": result.score,
                    "confidence": result.confidence,
                }),
            )
            .with_frame(frame.clone()),
        );

        // Baseline policy: track the immediately preceding accepted frame,
        // not a fixed reference.
        shared.detector.lock().unwrap().set_baseline(&frame);
    }

    Ok(())
}
