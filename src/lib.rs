//! Asynchronous exposure control for FLI scientific CCD cameras.
//!
//! The crate discovers cameras through the synchronous `libfli` library,
//! identifies them by serial number and drives each one through its exposure
//! lifecycle while the calling program keeps running. Cameras are operated
//! concurrently and independently.
//!
//! - [`hardware`]: the call surface over `libfli` and a mock implementation
//! - [`registry`]: serial-keyed identity map
//! - [`exposure`]: the per-camera exposure state machine
//! - [`camera`]: a camera entity pairing state transitions with hardware calls
//! - [`poller`]: the polling task behind every in-flight exposure
//! - [`system`]: the orchestrator most callers use
//!
//! ```no_run
//! use std::sync::Arc;
//! use flicamera::{CameraSystem, LibFliBinding, SystemConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SystemConfig::load_from("flicamera.toml")?;
//! let system = CameraSystem::new(Arc::new(LibFliBinding::load()?), config).await?;
//!
//! system.add_camera("gfa1").await?;
//! let exposure = system.expose("ML0000", 1.5).await?;
//! let elapsed = exposure.wait().await?;
//! println!("exposed for {:?}", elapsed);
//!
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod error;
pub mod exposure;
pub mod hardware;
pub mod logging;
pub mod poller;
pub mod registry;
pub mod system;

pub use camera::{Camera, CameraStatus};
pub use config::{CameraDefinition, ConfigError, SystemConfig, TeardownPolicy};
pub use error::{CameraError, CameraResult, ErrorKind, HardwareError};
pub use exposure::{ExposureId, ExposureState};
pub use hardware::{HardwareBinding, LibFliBinding, MockFliLibrary};
pub use poller::{ExposureHandle, ExposureProgress};
pub use registry::Registry;
pub use system::{CameraSystem, DeviceInfo};
