//! screen-sentinel: watch a screen region and report meaningful changes.
//!
//! Probes the platform, builds the capture chain, runs one monitoring
//! session, and logs every published event. Consumers that want the frames
//! subscribe to the event bus; this binary just shows the stream and dumps
//! the final session snapshot as JSON.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use screen_sentinel::config::{init_logging, LoggingConfig};
use screen_sentinel::{
    CaptureChain, DetectionMethod, EventBus, EventType, MonitorConfig, MonitorSession,
    PlatformProbe, Region,
};

#[derive(Debug, Parser)]
#[command(name = "screen-sentinel", about = "Screen-region change monitor")]
struct Cli {
    /// Region left edge (absolute pixels). Omit all four for full screen.
    #[arg(long, requires = "top")]
    left: Option<i32>,

    #[arg(long, requires = "right")]
    top: Option<i32>,

    #[arg(long, requires = "bottom")]
    right: Option<i32>,

    #[arg(long, requires = "left")]
    bottom: Option<i32>,

    /// Polling interval in seconds.
    #[arg(long, default_value_t = 0.5)]
    interval: f64,

    /// Change sensitivity in [0, 1].
    #[arg(long, default_value_t = 0.5)]
    sensitivity: f64,

    /// Detection method: size, hash, or pixel.
    #[arg(long, default_value = "pixel")]
    method: String,

    /// Stop after this many seconds; runs until Ctrl-C when omitted.
    #[arg(long)]
    duration: Option<f64>,

    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    });

    let method: DetectionMethod = cli.method.parse()?;

    let probe = PlatformProbe::new();
    let profile = probe.detect().await;
    info!(?profile, "Detected platform");

    let chain = Arc::new(
        CaptureChain::build(&probe)
            .await
            .context("building the capture chain")?,
    );
    info!(backends = ?chain.backend_names(), "Capture chain ready");

    // Region from the CLI, or the full screen measured by a probe capture.
    let region = match (cli.left, cli.top, cli.right, cli.bottom) {
        (Some(l), Some(t), Some(r), Some(b)) => Region::new(l, t, r, b)?,
        _ => {
            let shot = chain.capture_full_screen().await?;
            if !shot.success {
                bail!(
                    "no backend could capture the screen: {}",
                    shot.error.map(|e| e.to_string()).unwrap_or_default()
                );
            }
            info!(width = shot.size.0, height = shot.size.1, "Monitoring full screen");
            Region::new(0, 0, shot.size.0 as i32, shot.size.1 as i32)?
        }
    };

    let bus = Arc::new(EventBus::new());
    bus.subscribe_all(|event| {
        match event.event_type {
            EventType::ChangeDetected => info!(
                source = %event.source,
                score = event.payload["score"].as_f64().unwrap_or(0.0),
                confidence = event.payload["confidence"].as_f64().unwrap_or(0.0),
                method = event.payload["method"].as_str().unwrap_or(""),
                "Change detected"
            ),
            EventType::ScreenshotCaptured => info!(
                backend = event.payload["backend"].as_str().unwrap_or(""),
                bytes = event.payload["bytes"].as_u64().unwrap_or(0),
                "Frame accepted"
            ),
            EventType::MonitorError => warn!(
                message = event.payload["message"].as_str().unwrap_or(""),
                "Monitor error"
            ),
            _ => info!(event = ?event.event_type, source = %event.source, "Session event"),
        }
        Ok(())
    });

    let mut config = MonitorConfig::new(region, method);
    config.check_interval_secs = cli.interval;
    config.sensitivity = cli.sensitivity;

    let mut session = MonitorSession::new(config, chain, bus)?;
    session.start()?;

    match cli.duration {
        Some(secs) => {
            tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        }
        None => {
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            info!("Interrupt received, stopping");
        }
    }

    session.stop().await?;
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    Ok(())
}
