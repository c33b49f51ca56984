//! Camera entity.
//!
//! A [`Camera`] is the long-lived object a caller interacts with. Its identity
//! is the serial number; the hardware handle underneath can be released and
//! rebound without the camera changing identity.
//!
//! All mutable state sits behind one `tokio::sync::Mutex`. That lock is the
//! per-camera command queue: it is fair, so operations on one camera run
//! strictly in arrival order, and it is held across the hardware call of each
//! transition so that no two operations race on the device.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{CameraError, CameraResult, HardwareError};
use crate::exposure::{self, ExposureId, ExposureState, ExposureTracker, TransitionError};
use crate::hardware::{DeviceDescriptor, FliAdapter, Handle, HwResult};

#[derive(Debug)]
struct CameraInner {
    device_name: String,
    handle: Option<Handle>,
    exposure: ExposureTracker,
}

/// Result of one exposure status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still exposing; the hardware reported `time_left`.
    Pending {
        /// Hardware-reported time left.
        time_left: Duration,
        /// Suggested wait before the next query.
        next_delay: Duration,
    },
    /// The hardware reported zero time left; the camera is now reading out.
    Complete {
        /// Locally measured exposure duration.
        elapsed: Duration,
    },
    /// The polled exposure is no longer running: it was aborted, faulted or
    /// superseded by a later arm. Carries the camera's current state.
    NotExposing(ExposureState),
}

/// Point-in-time view of a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStatus {
    /// Serial number.
    pub serial: String,
    /// Model name.
    pub model: String,
    /// Domain-scoped device name of the current binding.
    pub device_name: String,
    /// `None` once the session was released.
    pub handle: Option<Handle>,
    /// Exposure state.
    pub state: ExposureState,
    /// Seconds requested by the last arm.
    pub exposure_time: f64,
    /// Last hardware report; stale outside `Exposing`.
    pub time_left: Option<Duration>,
    /// Local time since the last arm.
    pub elapsed: Option<Duration>,
    /// Wall-clock start of the last exposure.
    pub started_at: Option<DateTime<Utc>>,
    /// Reason of the fault that put the camera in `Error`.
    pub last_fault: Option<String>,
}

/// A physical camera, identified by serial number.
#[derive(Debug)]
pub struct Camera {
    serial: String,
    model: String,
    inner: Mutex<CameraInner>,
}

impl Camera {
    /// A new idle camera bound to the descriptor's handle.
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            serial: descriptor.serial,
            model: descriptor.model,
            inner: Mutex::new(CameraInner {
                device_name: descriptor.name,
                handle: Some(descriptor.handle),
                exposure: ExposureTracker::new(),
            }),
        }
    }

    /// Serial number (identity key).
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Model reported at first registration.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Current exposure state.
    pub async fn state(&self) -> ExposureState {
        self.inner.lock().await.exposure.state()
    }

    /// Current hardware handle, if bound.
    pub async fn handle(&self) -> Option<Handle> {
        self.inner.lock().await.handle
    }

    /// Domain-scoped device name of the current binding.
    pub async fn device_name(&self) -> String {
        self.inner.lock().await.device_name.clone()
    }

    /// Snapshot of the camera.
    pub async fn status(&self) -> CameraStatus {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let exposure = &inner.exposure;
        CameraStatus {
            serial: self.serial.clone(),
            model: self.model.clone(),
            device_name: inner.device_name.clone(),
            handle: inner.handle,
            state: exposure.state(),
            exposure_time: exposure.exposure_time(),
            time_left: exposure.time_left(),
            elapsed: exposure.elapsed(now),
            started_at: exposure.started_utc(),
            last_fault: exposure.last_fault().map(str::to_string),
        }
    }

    /// Rebind to a freshly opened session of the same device.
    ///
    /// Returns the previous handle if it differed, so the caller can release it.
    pub async fn rebind(&self, descriptor: &DeviceDescriptor) -> Option<Handle> {
        let mut inner = self.inner.lock().await;
        let previous = inner.handle.replace(descriptor.handle);
        inner.device_name = descriptor.name.clone();
        match previous {
            Some(old) if old != descriptor.handle => {
                debug!(serial = %self.serial, "Handle rebound {} -> {}", old, descriptor.handle);
                Some(old)
            }
            _ => None,
        }
    }

    /// `Idle -> Exposing`: configure the exposure time and start exposing.
    ///
    /// Returns the stamp of the new exposure, which [`poll`](Self::poll)
    /// and [`abort_armed`](Self::abort_armed) take.
    pub async fn arm(&self, adapter: &FliAdapter, exposure_time: f64) -> CameraResult<ExposureId> {
        if exposure::exposure_duration(exposure_time).is_none() {
            return Err(CameraError::InvalidExposureTime {
                serial: self.serial.clone(),
                value: exposure_time,
            });
        }

        let mut inner = self.inner.lock().await;
        inner
            .exposure
            .can_arm()
            .map_err(|e| self.transition_error(e))?;
        let handle = self.bound_handle(&inner)?;

        if let Err(e) = adapter.set_exposure_time(handle, exposure_time).await {
            return Err(self.hardware_failure(&mut inner, e, "set exposure time"));
        }

        match adapter.expose_frame(handle).await {
            Ok(()) => {
                let id = inner
                    .exposure
                    .arm(exposure_time, Instant::now())
                    .map_err(|e| self.transition_error(e))?;
                info!(serial = %self.serial, "Exposure started ({} s, {})", exposure_time, id);
                Ok(id)
            }
            Err(HardwareError::AlreadyInProgress) => {
                error!(
                    serial = %self.serial,
                    "Hardware reports an exposure in progress while camera is idle"
                );
                inner
                    .exposure
                    .fault("hardware already exposing while idle");
                Err(CameraError::AlreadyInProgress {
                    serial: self.serial.clone(),
                })
            }
            Err(e) => Err(self.hardware_failure(&mut inner, e, "start exposure")),
        }
    }

    /// Query the hardware once for `exposure` and apply `poll` or `complete`.
    ///
    /// A failed query faults the camera and returns the hardware error.
    pub async fn poll(
        &self,
        adapter: &FliAdapter,
        exposure: ExposureId,
        interval: Duration,
        min_interval: Duration,
    ) -> HwResult<PollOutcome> {
        let mut inner = self.inner.lock().await;
        if !inner.exposure.is_exposing(exposure) {
            return Ok(PollOutcome::NotExposing(inner.exposure.state()));
        }
        let Some(handle) = inner.handle else {
            error!(serial = %self.serial, "Handle released mid-exposure");
            inner.exposure.fault("handle released mid-exposure");
            return Err(HardwareError::DeviceNotFound);
        };

        let time_left = match adapter.exposure_status(handle).await {
            Ok(time_left) => time_left,
            Err(e) => {
                error!(serial = %self.serial, "Exposure status query failed: {}", e);
                inner.exposure.fault(format!("status query failed: {}", e));
                return Err(e);
            }
        };

        let now = Instant::now();
        if time_left.is_zero() {
            return Ok(match inner.exposure.complete(now) {
                Ok(elapsed) => {
                    info!(serial = %self.serial, "Exposure complete after {:?}", elapsed);
                    PollOutcome::Complete { elapsed }
                }
                Err(e) => PollOutcome::NotExposing(e.from),
            });
        }

        if let Err(e) = inner.exposure.refresh(time_left) {
            return Ok(PollOutcome::NotExposing(e.from));
        }
        let next_delay = inner.exposure.next_poll_delay(interval, min_interval, now);
        debug!(serial = %self.serial, "{:?} left, next poll in {:?}", time_left, next_delay);
        Ok(PollOutcome::Pending {
            time_left,
            next_delay,
        })
    }

    /// `ReadingOut -> Idle`.
    pub async fn finish_readout(&self) -> CameraResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .exposure
            .finish()
            .map_err(|e| self.transition_error(e))?;
        debug!(serial = %self.serial, "Readout finished");
        Ok(())
    }

    /// `Error -> Idle`.
    pub async fn reset(&self) -> CameraResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .exposure
            .reset()
            .map_err(|e| self.transition_error(e))?;
        info!(serial = %self.serial, "Camera reset to idle");
        Ok(())
    }

    /// Cancel a running exposure.
    ///
    /// On a successful hardware cancel the camera goes back to `Idle` and the
    /// resulting state is returned. If the cancel itself fails the camera
    /// faults and the hardware error is returned. Without a running exposure
    /// this is a no-op.
    pub async fn abort_exposure(&self, adapter: &FliAdapter) -> HwResult<ExposureState> {
        let mut inner = self.inner.lock().await;
        self.abort_locked(&mut inner, adapter).await
    }

    /// Cancel `exposure` if it is still the one running.
    ///
    /// A later exposure of the same camera is left untouched and the current
    /// state is returned.
    pub async fn abort_armed(
        &self,
        adapter: &FliAdapter,
        exposure: ExposureId,
    ) -> HwResult<ExposureState> {
        let mut inner = self.inner.lock().await;
        if !inner.exposure.is_exposing(exposure) {
            return Ok(inner.exposure.state());
        }
        self.abort_locked(&mut inner, adapter).await
    }

    /// Abort any exposure and close the hardware session.
    ///
    /// The camera keeps its identity and can be rebound later. The handle
    /// is dropped even if a call fails; the first failure is returned.
    pub async fn release(&self, adapter: &FliAdapter) -> HwResult<()> {
        let mut inner = self.inner.lock().await;
        let aborted = self.abort_locked(&mut inner, adapter).await.map(|_| ());
        let closed = match inner.handle.take() {
            Some(handle) => match adapter.close(handle).await {
                Ok(()) => {
                    debug!(serial = %self.serial, "Handle {} closed", handle);
                    Ok(())
                }
                Err(e) => {
                    warn!(serial = %self.serial, "Failed to close handle {}: {}", handle, e);
                    Err(e)
                }
            },
            None => Ok(()),
        };
        aborted.and(closed)
    }

    async fn abort_locked(
        &self,
        inner: &mut CameraInner,
        adapter: &FliAdapter,
    ) -> HwResult<ExposureState> {
        if inner.exposure.state() != ExposureState::Exposing {
            return Ok(inner.exposure.state());
        }

        let cancelled = match inner.handle {
            Some(handle) => adapter.cancel_exposure(handle).await,
            None => Err(HardwareError::DeviceNotFound),
        };
        match cancelled {
            Ok(()) => {
                if inner.exposure.abort().is_ok() {
                    info!(serial = %self.serial, "Exposure aborted");
                }
                Ok(inner.exposure.state())
            }
            Err(e) => {
                error!(serial = %self.serial, "Failed to cancel exposure: {}", e);
                inner.exposure.fault(format!("cancel failed: {}", e));
                Err(e)
            }
        }
    }

    fn bound_handle(&self, inner: &CameraInner) -> CameraResult<Handle> {
        inner.handle.ok_or_else(|| CameraError::DeviceNotFound {
            serial: self.serial.clone(),
        })
    }

    fn hardware_failure(
        &self,
        inner: &mut CameraInner,
        error: HardwareError,
        action: &str,
    ) -> CameraError {
        match error {
            HardwareError::DeviceNotFound => {
                // Stale handle: keep the state, drop the binding so the next
                // add re-enumerates.
                warn!(serial = %self.serial, "Device not found during {}", action);
                inner.handle = None;
            }
            _ => {
                error!(serial = %self.serial, "Failed to {}: {}", action, error);
                inner.exposure.fault(format!("{} failed: {}", action, error));
            }
        }
        CameraError::from_hardware(self.serial.clone(), error)
    }

    fn transition_error(&self, error: TransitionError) -> CameraError {
        if error.from == ExposureState::Exposing && error.action == "arm" {
            return CameraError::AlreadyInProgress {
                serial: self.serial.clone(),
            };
        }
        CameraError::InvalidState {
            serial: self.serial.clone(),
            state: error.from,
            action: error.action,
        }
    }
}
