//! Rovercam: MJPEG camera and rover control over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rovercam::actuator::{PwmDriver, SimulatedDriver, SysfsPwm};
use rovercam::capture::{FrameSource, Sensor, TestPatternSource, V4l2Capture};
use rovercam::server::{self, AppState};
use rovercam::{utils, Config, DriverKind, SourceKind};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROVERCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Control port; the stream is served one port above
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rovercam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Rovercam Launching...");

    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    rovercam::CONFIG.store(Arc::new(config));
    let config = rovercam::CONFIG.load_full();

    let (source, sensor): (Arc<dyn FrameSource>, Arc<dyn Sensor>) = match config.capture.source {
        SourceKind::V4l2 => {
            let mut capture_config = config.capture.clone();
            // Auto-detect capture device if needed
            if capture_config.device.is_empty() {
                let found = utils::auto_detect_device()?;
                capture_config.device = found.path;
                capture_config.format = found.format;
            }
            info!("Using capture device: {}", capture_config.device);

            let camera = Arc::new(V4l2Capture::new(&capture_config)?);
            (camera.clone(), camera)
        }
        SourceKind::TestPattern => {
            let camera = Arc::new(TestPatternSource::new(&config.capture));
            (camera.clone(), camera)
        }
    };

    let driver: Arc<dyn PwmDriver> = match config.actuator.driver {
        DriverKind::Simulated => {
            warn!("Actuators are simulated, PWM writes are only logged");
            Arc::new(SimulatedDriver::new())
        }
        DriverKind::Sysfs => Arc::new(SysfsPwm::open(&config.actuator.sysfs)?),
    };

    let state = Arc::new(AppState::new(&config, source, sensor, driver));
    let (control, stream) = server::bind(&config.server).await?;

    tokio::select! {
        res = server::serve(control, stream, state) => res?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    info!("Rovercam shutting down");
    Ok(())
}
