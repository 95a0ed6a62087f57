//! Ordered fallback sequence over capture backends.
//!
//! The chain is built once from the probe's recommendation and shared
//! read-mostly across sessions. A capture request walks the list by index
//! and returns the first successful result; only when every backend has
//! failed does the caller see a terminal failure value. An empty chain is
//! legal (captures fail per-cycle); a chain where nothing was even
//! constructible is not, because no monitoring will ever be possible.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::{CaptureBackend, CaptureResult, FailureKind};
use crate::error::{SentinelError, SentinelResult};
use crate::platform::{BackendKind, PlatformProbe};
use crate::region::Region;

/// Result attribution when every backend in the sequence failed.
const CHAIN_EXHAUSTED: &str = "chain";

pub struct CaptureChain {
    backends: Vec<Box<dyn CaptureBackend>>,
}

impl CaptureChain {
    /// Builds the chain: probe order, construct, filter on `can_handle`,
    /// initialize survivors. A backend whose initialization fails is dropped
    /// with a warning; zero constructible backends is fatal.
    pub async fn build(probe: &PlatformProbe) -> SentinelResult<Self> {
        let profile = probe.detect().await;
        let kinds = probe.recommended_backends().await;

        let constructed: Vec<Box<dyn CaptureBackend>> = kinds
            .iter()
            .filter_map(|kind| construct_backend(*kind))
            .collect();
        if constructed.is_empty() {
            return Err(SentinelError::NoBackendAvailable);
        }

        let mut backends = Vec::with_capacity(constructed.len());
        for mut backend in constructed {
            if !backend.can_handle(&profile) {
                debug!(backend = backend.name(), "Backend cannot handle this platform, skipping");
                continue;
            }
            match backend.initialize().await {
                Ok(true) => {
                    debug!(
                        backend = backend.name(),
                        capability = ?backend.capability(),
                        "Backend initialized"
                    );
                    backends.push(backend);
                }
                Ok(false) => {
                    warn!(backend = backend.name(), "Backend did not initialize, dropping from chain");
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Backend initialization errored, dropping from chain");
                }
            }
        }

        info!(
            backends = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "Capture chain built"
        );
        Ok(Self { backends })
    }

    /// Builds a chain from pre-constructed backends, preserving their order.
    /// Lets embedders and tests supply custom backends without a probe.
    pub fn from_backends(backends: Vec<Box<dyn CaptureBackend>>) -> Self {
        Self { backends }
    }

    /// Tears everything down and reconstructs from a fresh probe reading.
    pub async fn rebuild(&mut self, probe: &PlatformProbe) -> SentinelResult<()> {
        for backend in &mut self.backends {
            backend.cleanup().await;
        }
        probe.invalidate();
        *self = Self::build(probe).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn capture_full_screen(&self) -> SentinelResult<CaptureResult> {
        self.walk(None).await
    }

    pub async fn capture_region(&self, region: &Region) -> SentinelResult<CaptureResult> {
        if region.validate().is_err() {
            return Ok(CaptureResult::invalid_region(CHAIN_EXHAUSTED, region));
        }
        self.walk(Some(region)).await
    }

    /// Walks the sequence in order, advancing past failure values. Fatal
    /// errors from a backend propagate immediately.
    async fn walk(&self, region: Option<&Region>) -> SentinelResult<CaptureResult> {
        for backend in &self.backends {
            let result = match region {
                Some(r) => backend.capture_region(r).await?,
                None => backend.capture_full_screen().await?,
            };
            if result.success {
                return Ok(result);
            }
            debug!(
                backend = result.backend,
                error = %result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "Backend failed, advancing to next"
            );
        }

        Ok(CaptureResult::failed(
            CHAIN_EXHAUSTED,
            FailureKind::Failed,
            format!("no backend available ({} tried)", self.backends.len()),
            Duration::ZERO,
        ))
    }
}

fn construct_backend(kind: BackendKind) -> Option<Box<dyn CaptureBackend>> {
    match kind {
        #[cfg(windows)]
        BackendKind::NativeGdi => Some(Box::new(crate::capture::NativeGdiBackend::new())),
        #[cfg(not(windows))]
        BackendKind::NativeGdi => None,
        BackendKind::HostBridge => Some(Box::new(crate::capture::HostBridgeBackend::new())),
        BackendKind::Wayland => Some(Box::new(crate::capture::DisplayServerBackend::wayland())),
        BackendKind::X11 => Some(Box::new(crate::capture::DisplayServerBackend::x11())),
        BackendKind::Portable => Some(Box::new(crate::capture::PortableBackend::new())),
    }
}

#[cfg(test)]
pub(crate) mod test_backends {
    //! Scripted backends for chain and session tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::capture::test_support::uniform_png;
    use crate::capture::{
        CaptureBackend, CaptureCapability, CaptureResult, FailureKind,
    };
    use crate::error::SentinelResult;
    use crate::platform::{BackendKind, PlatformProfile};
    use crate::region::Region;

    /// Backend that always fails or always succeeds, counting invocations.
    pub struct ScriptedBackend {
        pub succeed: bool,
        pub calls: Arc<AtomicUsize>,
        pub frame: Vec<u8>,
    }

    impl ScriptedBackend {
        pub fn failing(calls: Arc<AtomicUsize>) -> Self {
            Self {
                succeed: false,
                calls,
                frame: Vec::new(),
            }
        }

        pub fn succeeding(calls: Arc<AtomicUsize>) -> Self {
            Self {
                succeed: true,
                calls,
                frame: uniform_png(32, 32, [128, 128, 128]),
            }
        }

        fn result(&self) -> CaptureResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                CaptureResult::captured("scripted", self.frame.clone(), (32, 32), Duration::ZERO)
            } else {
                CaptureResult::failed(
                    "scripted",
                    FailureKind::Failed,
                    "scripted failure",
                    Duration::ZERO,
                )
            }
        }
    }

    #[async_trait]
    impl CaptureBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Portable
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn capability(&self) -> CaptureCapability {
            CaptureCapability {
                supports_region: true,
                supports_multi_monitor: false,
                requires_elevation: false,
                performance_rank: 1,
                reliability_rank: 1,
            }
        }

        fn can_handle(&self, _profile: &PlatformProfile) -> bool {
            true
        }

        async fn initialize(&mut self) -> SentinelResult<bool> {
            Ok(true)
        }

        async fn capture_full_screen(&self) -> SentinelResult<CaptureResult> {
            Ok(self.result())
        }

        async fn capture_region(&self, _region: &Region) -> SentinelResult<CaptureResult> {
            Ok(self.result())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::test_backends::ScriptedBackend;
    use super::*;

    fn counters(n: usize) -> Vec<Arc<AtomicUsize>> {
        (0..n).map(|_| Arc::new(AtomicUsize::new(0))).collect()
    }

    #[tokio::test]
    async fn build_succeeds_on_any_host() {
        // The portable backend is always constructible, so build never hits
        // the zero-constructible fatal path on a real machine; an empty
        // chain (nothing initialized) is still a legal outcome.
        let probe = crate::platform::PlatformProbe::new();
        assert!(CaptureChain::build(&probe).await.is_ok());
    }

    #[tokio::test]
    async fn first_success_stops_the_walk() {
        let calls = counters(4);
        let chain = CaptureChain::from_backends(vec![
            Box::new(ScriptedBackend::failing(calls[0].clone())),
            Box::new(ScriptedBackend::failing(calls[1].clone())),
            Box::new(ScriptedBackend::succeeding(calls[2].clone())),
            Box::new(ScriptedBackend::succeeding(calls[3].clone())),
        ]);

        let result = chain.capture_full_screen().await.unwrap();
        assert!(result.success);
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        assert_eq!(calls[2].load(Ordering::SeqCst), 1);
        // The backend past the first success is never invoked.
        assert_eq!(calls[3].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_terminal_failure() {
        let calls = counters(2);
        let chain = CaptureChain::from_backends(vec![
            Box::new(ScriptedBackend::failing(calls[0].clone())),
            Box::new(ScriptedBackend::failing(calls[1].clone())),
        ]);

        let result = chain.capture_full_screen().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.backend, "chain");
        assert!(result.error.unwrap().message.contains("no backend available"));
    }

    #[tokio::test]
    async fn empty_chain_fails_every_capture() {
        let chain = CaptureChain::from_backends(Vec::new());
        assert!(chain.is_empty());
        let result = chain.capture_full_screen().await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn malformed_region_short_circuits() {
        let calls = counters(1);
        let chain = CaptureChain::from_backends(vec![Box::new(ScriptedBackend::succeeding(
            calls[0].clone(),
        ))]);

        let bad = Region {
            left: 0,
            top: 0,
            right: 5,
            bottom: 5,
        };
        let result = chain.capture_region(&bad).await.unwrap();
        assert!(!result.success);
        // No backend was consulted for an invalid rectangle.
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
    }
}
