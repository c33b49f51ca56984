//! Hardware binding adapter.
//!
//! [`HardwareBinding`] is the synchronous call surface over the FLI library.
//! Two implementations exist:
//!
//! - [`LibFliBinding`] talks to the native `libfli` through `libfli-sys`
//!   (feature `libfli_hardware`).
//! - [`MockFliLibrary`] is a deterministic in-memory fake following the same
//!   status-code contract, used by tests and by `flicamera --mock`.
//!
//! Every binding call may block. [`FliAdapter`] is the boundary the rest of
//! the crate goes through: it either calls the binding in place or offloads
//! the call to the tokio blocking pool, without the state machine or the
//! poller knowing which.

pub mod libfli;
pub mod mock;

pub use libfli::LibFliBinding;
pub use mock::{MockFliLibrary, MockOperation};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::HardwareError;

/// Result of a single binding call.
pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// FLI device class for cameras.
pub const FLIDEVICE_CAMERA: i64 = 0x100;

/// Translate a raw `libfli` status into a typed result.
///
/// Zero is success; a negative value is a negated errno.
pub fn check_status(status: i64) -> HwResult<()> {
    if status >= 0 {
        return Ok(());
    }
    let code = i32::try_from(-status).unwrap_or(libc::EIO);
    match code {
        libc::ENXIO | libc::ENODEV => Err(HardwareError::DeviceNotFound),
        libc::EALREADY => Err(HardwareError::AlreadyInProgress),
        code => Err(HardwareError::Io { code }),
    }
}

/// Communication bus searched during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    /// Parallel port.
    ParallelPort,
    /// USB.
    #[default]
    Usb,
    /// Serial line.
    Serial,
    /// Network.
    Inet,
}

impl Interface {
    fn bits(self) -> i64 {
        match self {
            Interface::ParallelPort => 0x01,
            Interface::Usb => 0x02,
            Interface::Serial => 0x03,
            Interface::Inet => 0x04,
        }
    }
}

/// Enumeration scope: an interface combined with a device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Domain(pub i64);

impl Domain {
    /// Cameras on the given interface.
    pub fn camera(interface: Interface) -> Self {
        Domain(interface.bits() | FLIDEVICE_CAMERA)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Domain::camera(Interface::Usb)
    }
}

/// Opaque session handle returned by `open`. Not an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub i64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One row of `list`: a domain-scoped device name and its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Device name to pass to `open`.
    pub name: String,
    /// Model string.
    pub model: String,
}

/// Snapshot of an opened device taken during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Open session.
    pub handle: Handle,
    /// Device name the session was opened with.
    pub name: String,
    /// Serial read from the device.
    pub serial: String,
    /// Model string from the listing.
    pub model: String,
}

/// Synchronous call surface over the camera library.
///
/// Implementations translate raw status codes with [`check_status`] and do
/// nothing else: no retries, no camera state.
pub trait HardwareBinding: Send + Sync {
    /// Library version string. Fails with `LibraryUnavailable` if the native
    /// library cannot be used.
    fn library_version(&self) -> HwResult<String>;

    /// Devices currently visible in `domain`, freshly enumerated.
    fn list(&self, domain: Domain) -> HwResult<Vec<DeviceEntry>>;

    /// Open a device session.
    fn open(&self, name: &str, domain: Domain) -> HwResult<Handle>;

    /// Close a device session.
    fn close(&self, handle: Handle) -> HwResult<()>;

    /// Read the device serial number.
    fn read_serial(&self, handle: Handle) -> HwResult<String>;

    /// Configure the exposure time in seconds.
    fn set_exposure_time(&self, handle: Handle, seconds: f64) -> HwResult<()>;

    /// Time left in the current exposure (zero when none is running).
    fn exposure_status(&self, handle: Handle) -> HwResult<Duration>;

    /// Start an exposure with the configured time.
    fn expose_frame(&self, handle: Handle) -> HwResult<()>;

    /// Cancel the running exposure.
    fn cancel_exposure(&self, handle: Handle) -> HwResult<()>;
}

/// Async boundary over a [`HardwareBinding`].
#[derive(Clone)]
pub struct FliAdapter {
    binding: Arc<dyn HardwareBinding>,
    offload: bool,
}

impl fmt::Debug for FliAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FliAdapter")
            .field("binding", &"Arc<dyn HardwareBinding>")
            .field("offload", &self.offload)
            .finish()
    }
}

impl FliAdapter {
    /// Wrap `binding`. With `offload` every call runs on the blocking pool.
    pub fn new(binding: Arc<dyn HardwareBinding>, offload: bool) -> Self {
        Self { binding, offload }
    }

    /// Whether calls are offloaded to the blocking pool.
    pub fn offloads(&self) -> bool {
        self.offload
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> HwResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HardwareBinding) -> HwResult<T> + Send + 'static,
    {
        if !self.offload {
            return f(self.binding.as_ref());
        }

        let binding = Arc::clone(&self.binding);
        match tokio::task::spawn_blocking(move || f(binding.as_ref())).await {
            Ok(result) => result,
            Err(e) => {
                error!("Hardware call {} did not complete: {}", op, e);
                Err(HardwareError::Io { code: libc::EIO })
            }
        }
    }

    /// See [`HardwareBinding::library_version`].
    pub async fn library_version(&self) -> HwResult<String> {
        self.call("library_version", |b| b.library_version()).await
    }

    /// See [`HardwareBinding::list`].
    pub async fn list(&self, domain: Domain) -> HwResult<Vec<DeviceEntry>> {
        self.call("list", move |b| b.list(domain)).await
    }

    /// See [`HardwareBinding::open`].
    pub async fn open(&self, name: &str, domain: Domain) -> HwResult<Handle> {
        let name = name.to_string();
        self.call("open", move |b| b.open(&name, domain)).await
    }

    /// See [`HardwareBinding::close`].
    pub async fn close(&self, handle: Handle) -> HwResult<()> {
        self.call("close", move |b| b.close(handle)).await
    }

    /// See [`HardwareBinding::read_serial`].
    pub async fn read_serial(&self, handle: Handle) -> HwResult<String> {
        self.call("read_serial", move |b| b.read_serial(handle)).await
    }

    /// See [`HardwareBinding::set_exposure_time`].
    pub async fn set_exposure_time(&self, handle: Handle, seconds: f64) -> HwResult<()> {
        self.call("set_exposure_time", move |b| b.set_exposure_time(handle, seconds))
            .await
    }

    /// See [`HardwareBinding::exposure_status`].
    pub async fn exposure_status(&self, handle: Handle) -> HwResult<Duration> {
        self.call("exposure_status", move |b| b.exposure_status(handle))
            .await
    }

    /// See [`HardwareBinding::expose_frame`].
    pub async fn expose_frame(&self, handle: Handle) -> HwResult<()> {
        self.call("expose_frame", move |b| b.expose_frame(handle)).await
    }

    /// See [`HardwareBinding::cancel_exposure`].
    pub async fn cancel_exposure(&self, handle: Handle) -> HwResult<()> {
        self.call("cancel_exposure", move |b| b.cancel_exposure(handle))
            .await
    }

    /// Enumerate `domain`, open every device not named in `skip_names` and
    /// read its serial.
    ///
    /// Devices that fail to open or report a serial are logged and skipped;
    /// their handle is closed. Handles of returned descriptors stay open.
    pub async fn discover(
        &self,
        domain: Domain,
        skip_names: &HashSet<String>,
    ) -> HwResult<Vec<DeviceDescriptor>> {
        let entries = self.list(domain).await?;
        let mut descriptors = Vec::with_capacity(entries.len());

        for entry in entries {
            if skip_names.contains(&entry.name) {
                debug!("Skipping {} (already bound)", entry.name);
                continue;
            }

            let handle = match self.open(&entry.name, domain).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Failed to open {}: {}", entry.name, e);
                    continue;
                }
            };

            match self.read_serial(handle).await {
                Ok(serial) => descriptors.push(DeviceDescriptor {
                    handle,
                    name: entry.name,
                    serial,
                    model: entry.model,
                }),
                Err(e) => {
                    warn!("Failed to read serial of {}: {}", entry.name, e);
                    if let Err(e) = self.close(handle).await {
                        warn!("Failed to close {} ({}): {}", entry.name, handle, e);
                    }
                }
            }
        }

        Ok(descriptors)
    }
}
