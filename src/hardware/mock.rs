//! Mock FLI library for testing without hardware.
//!
//! Behaves like `libfli` at the status-code level: every operation produces
//! a raw status (`0` or a negated errno) which goes through
//! [`check_status`], so the translation path is the same as for the real
//! library. Exposure timing follows the tokio clock, which makes paused-time
//! tests deterministic.
//!
//! Sessions are numbered from a counter that never repeats within one
//! instance, so closing and reopening a device yields a new handle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{check_status, DeviceEntry, Domain, Handle, HardwareBinding, HwResult};
use crate::config::SystemConfig;
use crate::error::HardwareError;
use crate::exposure::exposure_duration;

/// Operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `open`.
    Open,
    /// `close`.
    Close,
    /// `read_serial`.
    ReadSerial,
    /// `set_exposure_time`.
    SetExposureTime,
    /// `exposure_status`.
    ExposureStatus,
    /// `expose_frame`.
    ExposeFrame,
    /// `cancel_exposure`.
    CancelExposure,
}

#[derive(Debug, Clone)]
struct MockDevice {
    name: String,
    serial: String,
    model: String,
    domain: Domain,
    exposure_time: f64,
    exposure_started: Option<Instant>,
}

impl MockDevice {
    fn time_left(&self, now: Instant) -> Duration {
        match self.exposure_started {
            Some(start) => {
                let elapsed = now.saturating_duration_since(start);
                let total = exposure_duration(self.exposure_time).unwrap_or_default();
                // libfli reports whole milliseconds
                let left = total.saturating_sub(elapsed);
                Duration::from_millis(left.as_millis() as u64)
            }
            None => Duration::ZERO,
        }
    }

    fn is_exposing(&self, now: Instant) -> bool {
        self.exposure_started.is_some() && !self.time_left(now).is_zero()
    }
}

#[derive(Debug)]
struct MockState {
    available: bool,
    devices: Vec<MockDevice>,
    sessions: HashMap<i64, String>,
    next_handle: i64,
    failures: HashMap<(String, MockOperation), i32>,
    calls: HashMap<MockOperation, usize>,
}

/// Deterministic in-memory stand-in for `libfli`.
#[derive(Debug)]
pub struct MockFliLibrary {
    state: Mutex<MockState>,
}

impl Default for MockFliLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFliLibrary {
    /// An available library with no devices attached.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                available: true,
                devices: Vec::new(),
                sessions: HashMap::new(),
                next_handle: 1,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    /// A library that reports itself as unavailable.
    pub fn unavailable() -> Self {
        let lib = Self::new();
        lib.lock().available = false;
        lib
    }

    /// A library with one USB camera per configured camera definition.
    ///
    /// Device names are the logical names; models default to
    /// `"MicroLine ML50100"` when the configuration has no expectation.
    pub fn from_config(config: &SystemConfig) -> Self {
        let lib = Self::new();
        for (name, camera) in &config.cameras {
            let model = camera.model.as_deref().unwrap_or("MicroLine ML50100");
            lib.add_camera(name, &camera.serial, model);
        }
        lib
    }

    /// Builder form of [`add_camera`](Self::add_camera).
    pub fn with_camera(self, name: &str, serial: &str, model: &str) -> Self {
        self.add_camera(name, serial, model);
        self
    }

    /// Attach a USB camera.
    pub fn add_camera(&self, name: &str, serial: &str, model: &str) {
        self.add_device(name, serial, model, Domain::default());
    }

    /// Attach a device in an explicit domain.
    pub fn add_device(&self, name: &str, serial: &str, model: &str, domain: Domain) {
        self.lock().devices.push(MockDevice {
            name: name.to_string(),
            serial: serial.to_string(),
            model: model.to_string(),
            domain,
            exposure_time: 0.0,
            exposure_started: None,
        });
        debug!("Mock device '{}' ({}) attached", name, serial);
    }

    /// Unplug a device. Open sessions on it become stale.
    pub fn remove_device(&self, serial: &str) {
        let mut state = self.lock();
        let names: Vec<String> = state
            .devices
            .iter()
            .filter(|d| d.serial == serial)
            .map(|d| d.name.clone())
            .collect();
        state.devices.retain(|d| d.serial != serial);
        state.sessions.retain(|_, name| !names.contains(name));
        info!("Mock device {} removed", serial);
    }

    /// Make the next `op` on device `serial` fail with `-errno`.
    pub fn inject_failure(&self, serial: &str, op: MockOperation, errno: i32) {
        self.lock().failures.insert((serial.to_string(), op), errno);
    }

    /// Start an exposure behind the caller's back, as another process would.
    pub fn start_external_exposure(&self, serial: &str, seconds: f64) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.serial == serial) {
            device.exposure_time = seconds;
            device.exposure_started = Some(Instant::now());
        }
    }

    /// Whether device `serial` is currently integrating.
    pub fn is_exposing(&self, serial: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .devices
            .iter()
            .any(|d| d.serial == serial && d.is_exposing(now))
    }

    /// Exposure time last configured on device `serial`.
    pub fn exposure_time(&self, serial: &str) -> Option<f64> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.serial == serial)
            .map(|d| d.exposure_time)
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// How many times `op` was called.
    pub fn call_count(&self, op: MockOperation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Mock library mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl MockState {
    /// Resolve `handle` to its device, applying any injected failure.
    /// Returns the raw status on failure.
    fn device_mut(&mut self, handle: Handle, op: MockOperation) -> Result<&mut MockDevice, i64> {
        *self.calls.entry(op).or_insert(0) += 1;

        let name = match self.sessions.get(&handle.0) {
            Some(name) => name.clone(),
            None => return Err(-(libc::ENXIO as i64)),
        };
        let index = match self.devices.iter().position(|d| d.name == name) {
            Some(index) => index,
            None => return Err(-(libc::ENXIO as i64)),
        };
        let key = (self.devices[index].serial.clone(), op);
        if let Some(errno) = self.failures.remove(&key) {
            return Err(-(errno as i64));
        }
        Ok(&mut self.devices[index])
    }
}

fn status<T>(result: Result<T, i64>) -> HwResult<T> {
    // Failure statuses are always negative, so `check_status` yields the error.
    result.or_else(|raw| check_status(raw).and(Err(HardwareError::Io { code: libc::EIO })))
}

impl HardwareBinding for MockFliLibrary {
    fn library_version(&self) -> HwResult<String> {
        if self.lock().available {
            Ok("Mock libfli 1.104".to_string())
        } else {
            Err(HardwareError::LibraryUnavailable)
        }
    }

    fn list(&self, domain: Domain) -> HwResult<Vec<DeviceEntry>> {
        let state = self.lock();
        Ok(state
            .devices
            .iter()
            .filter(|d| d.domain == domain)
            .map(|d| DeviceEntry {
                name: d.name.clone(),
                model: d.model.clone(),
            })
            .collect())
    }

    fn open(&self, name: &str, domain: Domain) -> HwResult<Handle> {
        let mut state = self.lock();
        *state.calls.entry(MockOperation::Open).or_insert(0) += 1;

        let serial = match state
            .devices
            .iter()
            .find(|d| d.name == name && d.domain == domain)
        {
            Some(device) => device.serial.clone(),
            None => return status(Err(-(libc::ENXIO as i64))),
        };
        if let Some(errno) = state.failures.remove(&(serial, MockOperation::Open)) {
            return status(Err(-(errno as i64)));
        }

        let handle = Handle(state.next_handle);
        state.next_handle += 1;
        state.sessions.insert(handle.0, name.to_string());
        debug!("Mock device '{}' opened with handle {}", name, handle);
        Ok(handle)
    }

    fn close(&self, handle: Handle) -> HwResult<()> {
        let mut state = self.lock();
        status(state.device_mut(handle, MockOperation::Close).map(|_| ()))?;
        state.sessions.remove(&handle.0);
        debug!("Mock handle {} closed", handle);
        Ok(())
    }

    fn read_serial(&self, handle: Handle) -> HwResult<String> {
        let mut state = self.lock();
        status(
            state
                .device_mut(handle, MockOperation::ReadSerial)
                .map(|d| d.serial.clone()),
        )
    }

    fn set_exposure_time(&self, handle: Handle, seconds: f64) -> HwResult<()> {
        let mut state = self.lock();
        let device = status(state.device_mut(handle, MockOperation::SetExposureTime))?;
        if exposure_duration(seconds).is_none() {
            return status(Err(-(libc::EINVAL as i64)));
        }
        device.exposure_time = seconds;
        Ok(())
    }

    fn exposure_status(&self, handle: Handle) -> HwResult<Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        status(
            state
                .device_mut(handle, MockOperation::ExposureStatus)
                .map(|d| d.time_left(now)),
        )
    }

    fn expose_frame(&self, handle: Handle) -> HwResult<()> {
        let now = Instant::now();
        let mut state = self.lock();
        let result = state
            .device_mut(handle, MockOperation::ExposeFrame)
            .and_then(|d| {
                if d.is_exposing(now) {
                    return Err(-(libc::EALREADY as i64));
                }
                d.exposure_started = Some(now);
                Ok(())
            });
        status(result)
    }

    fn cancel_exposure(&self, handle: Handle) -> HwResult<()> {
        let mut state = self.lock();
        status(
            state
                .device_mut(handle, MockOperation::CancelExposure)
                .map(|d| d.exposure_started = None),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_camera() -> MockFliLibrary {
        MockFliLibrary::new().with_camera("flipro0", "ML0000", "MicroLine ML50100")
    }

    #[test]
    fn test_list_filters_by_domain() {
        let lib = single_camera();
        lib.add_device(
            "serial0",
            "SR0001",
            "Filter Wheel",
            Domain::camera(crate::hardware::Interface::Serial),
        );

        let usb = lib.list(Domain::default()).unwrap();
        assert_eq!(usb.len(), 1);
        assert_eq!(usb[0].name, "flipro0");
        assert_eq!(usb[0].model, "MicroLine ML50100");
    }

    #[test]
    fn test_reopen_yields_new_handle() {
        let lib = single_camera();
        let first = lib.open("flipro0", Domain::default()).unwrap();
        lib.close(first).unwrap();
        let second = lib.open("flipro0", Domain::default()).unwrap();

        assert_ne!(first, second);
        assert_eq!(lib.read_serial(first), Err(HardwareError::DeviceNotFound));
        assert_eq!(lib.read_serial(second).unwrap(), "ML0000");
    }

    #[test]
    fn test_open_unknown_device() {
        let lib = single_camera();
        assert_eq!(
            lib.open("flipro9", Domain::default()),
            Err(HardwareError::DeviceNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exposure_timing_and_already_in_progress() {
        let lib = single_camera();
        let handle = lib.open("flipro0", Domain::default()).unwrap();

        lib.set_exposure_time(handle, 2.0).unwrap();
        lib.expose_frame(handle).unwrap();
        assert_eq!(
            lib.expose_frame(handle),
            Err(HardwareError::AlreadyInProgress)
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(
            lib.exposure_status(handle).unwrap(),
            Duration::from_millis(1500)
        );

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(lib.exposure_status(handle).unwrap(), Duration::ZERO);
        assert!(!lib.is_exposing("ML0000"));
        lib.expose_frame(handle).unwrap();
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let lib = single_camera();
        let handle = lib.open("flipro0", Domain::default()).unwrap();
        lib.inject_failure("ML0000", MockOperation::ExposureStatus, libc::EIO);

        assert_eq!(
            lib.exposure_status(handle),
            Err(HardwareError::Io { code: libc::EIO })
        );
        assert_eq!(lib.exposure_status(handle), Ok(Duration::ZERO));
        assert_eq!(lib.call_count(MockOperation::ExposureStatus), 2);
    }

    #[test]
    fn test_removed_device_invalidates_sessions() {
        let lib = single_camera();
        let handle = lib.open("flipro0", Domain::default()).unwrap();
        lib.remove_device("ML0000");

        assert_eq!(lib.open_sessions(), 0);
        assert_eq!(
            lib.exposure_status(handle),
            Err(HardwareError::DeviceNotFound)
        );
    }

    #[test]
    fn test_unavailable_library() {
        let lib = MockFliLibrary::unavailable();
        assert_eq!(
            lib.library_version(),
            Err(HardwareError::LibraryUnavailable)
        );
    }
}
