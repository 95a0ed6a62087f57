//! Monitoring configuration and logging setup.

use serde::{Deserialize, Serialize};

use crate::detect::DetectionMethod;
use crate::error::{SentinelError, SentinelResult};
use crate::region::Region;

/// Fastest allowed polling cadence in seconds.
pub const MIN_INTERVAL_SECS: f64 = 0.1;
/// Slowest allowed polling cadence in seconds.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;
/// Default polling cadence in seconds.
pub const DEFAULT_INTERVAL_SECS: f64 = 0.5;

/// Everything needed to create one monitoring session.
///
/// Validation is the core's responsibility and happens synchronously before
/// any session is created; an invalid config never reaches the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Screen region under observation.
    pub region: Region,

    /// Polling interval in seconds.
    pub check_interval_secs: f64,

    /// Change sensitivity in [0, 1]; higher means smaller changes trigger.
    pub sensitivity: f64,

    /// Comparison strategy.
    pub detection_method: DetectionMethod,
}

impl MonitorConfig {
    pub fn new(region: Region, detection_method: DetectionMethod) -> Self {
        Self {
            region,
            check_interval_secs: DEFAULT_INTERVAL_SECS,
            sensitivity: 0.5,
            detection_method,
        }
    }

    /// Rejects out-of-range values before session creation.
    pub fn validate(&self) -> SentinelResult<()> {
        self.region.validate()?;
        validate_interval(self.check_interval_secs)?;
        validate_sensitivity(self.sensitivity)?;
        Ok(())
    }
}

pub(crate) fn validate_interval(secs: f64) -> SentinelResult<()> {
    if !secs.is_finite() || !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&secs) {
        return Err(SentinelError::config(format!(
            "Check interval {}s is outside the {}..{}s range",
            secs, MIN_INTERVAL_SECS, MAX_INTERVAL_SECS
        )));
    }
    Ok(())
}

pub(crate) fn validate_sensitivity(value: f64) -> SentinelResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SentinelError::config(format!(
            "Sensitivity {} is outside the 0..1 range",
            value
        )));
    }
    Ok(())
}

/// Logging configuration for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "screen_sentinel=debug,warn").
    pub level: String,

    /// Emit structured JSON instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Initializes the tracing subscriber. RUST_LOG wins over the configured
/// level when set.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> MonitorConfig {
        MonitorConfig::new(
            Region::new(0, 0, 200, 200).unwrap(),
            DetectionMethod::Hash,
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn interval_bounds_enforced() {
        let mut config = base_config();
        config.check_interval_secs = 0.05;
        assert!(config.validate().is_err());

        config.check_interval_secs = 3601.0;
        assert!(config.validate().is_err());

        config.check_interval_secs = f64::NAN;
        assert!(config.validate().is_err());

        config.check_interval_secs = 0.1;
        assert!(config.validate().is_ok());
        config.check_interval_secs = 3600.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sensitivity_bounds_enforced() {
        let mut config = base_config();
        config.sensitivity = -0.01;
        assert!(config.validate().is_err());

        config.sensitivity = 1.01;
        assert!(config.validate().is_err());

        config.sensitivity = 1.0;
        assert!(config.validate().is_ok());
        config.sensitivity = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_region_rejected_through_config() {
        let mut config = base_config();
        config.region = Region {
            left: 10,
            top: 0,
            right: 10,
            bottom: 100,
        };
        assert!(config.validate().is_err());
    }
}
