//! CLI entry point for flicamera
//!
//! List attached cameras:
//! ```bash
//! flicamera --config flicamera.toml list
//! ```
//!
//! Expose two cameras for 1.5 s, by logical name or serial:
//! ```bash
//! flicamera --config flicamera.toml expose gfa1 ML0001 --time 1.5
//! ```
//!
//! `--mock` runs against the in-memory library populated from the
//! configured cameras, so both commands work without hardware.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::info;

use flicamera::hardware::HardwareBinding;
use flicamera::{logging, CameraSystem, LibFliBinding, MockFliLibrary, SystemConfig};

#[derive(Parser)]
#[command(name = "flicamera")]
#[command(about = "Exposure control for FLI cameras", long_about = None)]
struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-memory mock library instead of libfli
    #[arg(long, global = true)]
    mock: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List visible cameras
    List,

    /// Expose one or more cameras concurrently
    Expose {
        /// Logical names or serials
        #[arg(required = true)]
        cameras: Vec<String>,

        /// Exposure time in seconds
        #[arg(long)]
        time: f64,

        /// Give up waiting after this many seconds (the exposure is aborted)
        #[arg(long)]
        timeout: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level).map_err(|e| anyhow!(e))?;

    let config = match &cli.config {
        Some(path) => SystemConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SystemConfig::default(),
    };

    let binding: Arc<dyn HardwareBinding> = if cli.mock {
        info!("Using mock camera library");
        Arc::new(MockFliLibrary::from_config(&config))
    } else {
        Arc::new(LibFliBinding::load()?)
    };
    let system = CameraSystem::new(binding, config).await?;

    let result = match cli.command {
        Commands::List => list(&system).await,
        Commands::Expose {
            cameras,
            time,
            timeout,
        } => expose(&system, &cameras, time, timeout).await,
    };

    system.shutdown().await?;
    result
}

async fn list(system: &CameraSystem) -> Result<()> {
    let devices = system.discover().await?;
    if devices.is_empty() {
        println!("No cameras found");
        return Ok(());
    }
    for device in devices {
        let name = system
            .config()
            .definition_for_serial(&device.serial)
            .map(|(name, _)| name)
            .unwrap_or("-");
        println!(
            "{:<16} {:<10} {:<8} {}",
            device.name, device.serial, name, device.model
        );
    }
    Ok(())
}

async fn expose(
    system: &CameraSystem,
    ids: &[String],
    time: f64,
    timeout: Option<f64>,
) -> Result<()> {
    let timeout = timeout
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds).map_err(|_| anyhow!("invalid timeout {}", seconds))
        })
        .transpose()?;

    let mut serials = Vec::with_capacity(ids.len());
    for id in ids {
        let camera = system.add_camera(id).await?;
        serials.push(camera.serial().to_string());
    }

    let mut handles = Vec::with_capacity(serials.len());
    for serial in &serials {
        handles.push(system.expose(serial, time).await?);
    }

    let waits = handles.iter().map(|handle| async move {
        let result = match timeout {
            Some(timeout) => handle.wait_timeout(timeout).await,
            None => handle.wait().await,
        };
        (handle, result)
    });

    let mut failures = 0;
    for (handle, result) in join_all(waits).await {
        match result {
            Ok(elapsed) => println!("{}: exposed for {:.3} s", handle.serial(), elapsed.as_secs_f64()),
            Err(e) => {
                failures += 1;
                eprintln!("{}", e);
                // Timed-out exposures are still running; shutdown aborts them.
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} exposures failed", failures, handles.len()));
    }
    Ok(())
}
