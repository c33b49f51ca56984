//! Polling scheduler.
//!
//! Every in-flight exposure gets one tokio task that queries the hardware's
//! time-left, publishes progress on a `watch` channel and sleeps between
//! queries. The caller gets an [`ExposureHandle`] to observe, await or cancel
//! the exposure; the orchestrator keeps the matching [`PollTask`] so it can
//! shut the task down on disconnect.
//!
//! Cancellation is checked before every query and raced against every sleep,
//! so it is observed within one polling interval. A cancelled task aborts the
//! hardware exposure before it ends.
//!
//! A task is bound to the [`ExposureId`] it was spawned for. Once the camera
//! stops exposing that id, for whatever reason, the task ends; it never
//! drives or aborts a later exposure of the same camera.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{Camera, PollOutcome};
use crate::config::SystemConfig;
use crate::error::{CameraError, CameraResult, HardwareError};
use crate::exposure::{exposure_duration, ExposureId};
use crate::hardware::FliAdapter;

/// Bounds of the wait between two status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Longest wait.
    pub interval: Duration,
    /// Shortest wait.
    pub min_interval: Duration,
}

impl Cadence {
    /// Cadence configured in `config`.
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            min_interval: config.min_poll_interval(),
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::from_config(&SystemConfig::default())
    }
}

/// Progress of one exposure as published by its polling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureProgress {
    /// Still exposing.
    Exposing {
        /// Time left as last reported by the hardware.
        time_left: Duration,
    },
    /// The hardware reported completion; the camera is reading out.
    Complete {
        /// Locally measured exposure duration.
        elapsed: Duration,
    },
    /// A hardware call failed; the camera is in `Error`.
    Failed(HardwareError),
    /// The exposure was aborted before completion.
    Cancelled,
}

impl ExposureProgress {
    /// Whether no further progress will follow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExposureProgress::Exposing { .. })
    }
}

/// Caller-side view of an in-flight exposure.
///
/// Cloning is cheap; every clone observes the same exposure.
#[derive(Debug, Clone)]
pub struct ExposureHandle {
    serial: String,
    progress: watch::Receiver<ExposureProgress>,
    cancel: CancellationToken,
}

impl ExposureHandle {
    /// Serial of the exposing camera.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Latest published progress.
    pub fn progress(&self) -> ExposureProgress {
        *self.progress.borrow()
    }

    /// A receiver that is notified on every progress update.
    pub fn subscribe(&self) -> watch::Receiver<ExposureProgress> {
        self.progress.clone()
    }

    /// Wait for the exposure to end. Returns the measured exposure duration.
    pub async fn wait(&self) -> CameraResult<Duration> {
        let mut progress = self.progress.clone();
        let terminal = progress
            .wait_for(ExposureProgress::is_terminal)
            .await
            .map(|value| *value);
        let last = match terminal {
            Ok(last) => last,
            // Sender gone: whatever it published last is final.
            Err(_) => *progress.borrow(),
        };
        self.outcome(last)
    }

    /// Like [`wait`](Self::wait) with an upper bound. Timing out leaves the
    /// exposure running.
    pub async fn wait_timeout(&self, timeout: Duration) -> CameraResult<Duration> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(CameraError::Timeout {
                serial: self.serial.clone(),
                waited: timeout,
            }),
        }
    }

    /// Cancel the exposure and wait until the polling task has ended.
    ///
    /// Returns the final progress, which is `Complete` or `Failed` if the
    /// exposure ended before the cancellation was observed.
    pub async fn cancel(&self) -> ExposureProgress {
        self.cancel.cancel();
        let mut progress = self.progress.clone();
        while progress.changed().await.is_ok() {}
        let last = *progress.borrow();
        last
    }

    /// Whether the polling task has ended.
    pub fn is_finished(&self) -> bool {
        self.progress.has_changed().is_err()
    }

    fn outcome(&self, progress: ExposureProgress) -> CameraResult<Duration> {
        match progress {
            ExposureProgress::Complete { elapsed } => Ok(elapsed),
            ExposureProgress::Failed(e) => Err(CameraError::from_hardware(self.serial.clone(), e)),
            ExposureProgress::Cancelled | ExposureProgress::Exposing { .. } => {
                Err(CameraError::Cancelled {
                    serial: self.serial.clone(),
                })
            }
        }
    }
}

/// Orchestrator-side handle of a polling task.
#[derive(Debug)]
pub struct PollTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollTask {
    /// Cancel the task and wait for it to end.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("Polling task ended abnormally: {}", e);
        }
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Start polling `exposure`, which `camera` has just armed for
/// `exposure_time` seconds.
pub fn spawn(
    camera: Arc<Camera>,
    adapter: FliAdapter,
    exposure: ExposureId,
    exposure_time: f64,
    cadence: Cadence,
) -> (PollTask, ExposureHandle) {
    let initial = ExposureProgress::Exposing {
        time_left: exposure_duration(exposure_time).unwrap_or_default(),
    };
    let (tx, rx) = watch::channel(initial);
    let cancel = CancellationToken::new();

    let handle = ExposureHandle {
        serial: camera.serial().to_string(),
        progress: rx,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(run(camera, adapter, exposure, cadence, cancel.clone(), tx));

    (PollTask { cancel, join }, handle)
}

async fn run(
    camera: Arc<Camera>,
    adapter: FliAdapter,
    exposure: ExposureId,
    cadence: Cadence,
    cancel: CancellationToken,
    tx: watch::Sender<ExposureProgress>,
) {
    let serial = camera.serial().to_string();
    debug!(serial = %serial, "Polling task started for {}", exposure);

    let last = loop {
        if cancel.is_cancelled() {
            break abort(&camera, &adapter, exposure).await;
        }

        match camera
            .poll(&adapter, exposure, cadence.interval, cadence.min_interval)
            .await
        {
            Ok(PollOutcome::Pending {
                time_left,
                next_delay,
            }) => {
                tx.send_replace(ExposureProgress::Exposing { time_left });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break abort(&camera, &adapter, exposure).await,
                    _ = tokio::time::sleep(next_delay) => {}
                }
            }
            Ok(PollOutcome::Complete { elapsed }) => break ExposureProgress::Complete { elapsed },
            Ok(PollOutcome::NotExposing(state)) => {
                info!(serial = %serial, "{} ended outside the poller (camera {})", exposure, state);
                break ExposureProgress::Cancelled;
            }
            Err(e) => break ExposureProgress::Failed(e),
        }
    };

    debug!(serial = %serial, "Polling task finished: {:?}", last);
    tx.send_replace(last);
}

async fn abort(camera: &Camera, adapter: &FliAdapter, exposure: ExposureId) -> ExposureProgress {
    match camera.abort_armed(adapter, exposure).await {
        Ok(_) => ExposureProgress::Cancelled,
        Err(e) => ExposureProgress::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::exposure::ExposureState;
    use crate::hardware::{DeviceDescriptor, Domain, HardwareBinding, MockFliLibrary, MockOperation};

    const CADENCE: Cadence = Cadence {
        interval: Duration::from_millis(100),
        min_interval: Duration::from_millis(10),
    };

    fn setup() -> (Arc<MockFliLibrary>, FliAdapter, Arc<Camera>) {
        let lib = Arc::new(MockFliLibrary::new().with_camera(
            "flipro0",
            "ML0000",
            "MicroLine ML50100",
        ));
        let handle = lib.open("flipro0", Domain::default()).unwrap();
        let adapter = FliAdapter::new(lib.clone(), false);
        let camera = Arc::new(Camera::new(DeviceDescriptor {
            handle,
            name: "flipro0".into(),
            serial: "ML0000".into(),
            model: "MicroLine ML50100".into(),
        }));
        (lib, adapter, camera)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_completes_exposure() {
        let (_lib, adapter, camera) = setup();
        let id = camera.arm(&adapter, 1.0).await.unwrap();

        let (task, handle) = spawn(camera.clone(), adapter, id, 1.0, CADENCE);
        let elapsed = handle.wait().await.unwrap();

        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(1) + CADENCE.interval);
        assert_eq!(camera.state().await, ExposureState::ReadingOut);
        assert_eq!(handle.progress(), ExposureProgress::Complete { elapsed });

        task.shutdown().await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_hardware_exposure() {
        let (lib, adapter, camera) = setup();
        let id = camera.arm(&adapter, 30.0).await.unwrap();
        let (_task, handle) = spawn(camera.clone(), adapter, id, 30.0, CADENCE);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(matches!(handle.progress(), ExposureProgress::Exposing { .. }));

        assert_eq!(handle.cancel().await, ExposureProgress::Cancelled);
        assert!(!lib.is_exposing("ML0000"));
        assert_eq!(camera.state().await, ExposureState::Idle);

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_leaves_exposure_running() {
        let (_lib, adapter, camera) = setup();
        let id = camera.arm(&adapter, 2.0).await.unwrap();
        let (_task, handle) = spawn(camera.clone(), adapter, id, 2.0, CADENCE);

        let err = handle
            .wait_timeout(Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(camera.state().await, ExposureState::Exposing);

        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_failure_published() {
        let (lib, adapter, camera) = setup();
        let id = camera.arm(&adapter, 5.0).await.unwrap();
        lib.inject_failure("ML0000", MockOperation::ExposureStatus, libc::EIO);

        let (_task, handle) = spawn(camera.clone(), adapter, id, 5.0, CADENCE);
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::HardwareFault);
        assert_eq!(
            handle.progress(),
            ExposureProgress::Failed(HardwareError::Io { code: libc::EIO })
        );
        assert_eq!(camera.state().await, ExposureState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_task() {
        let (lib, adapter, camera) = setup();
        let id = camera.arm(&adapter, 10.0).await.unwrap();
        let (task, handle) = spawn(camera.clone(), adapter, id, 10.0, CADENCE);

        task.shutdown().await;
        assert_eq!(handle.progress(), ExposureProgress::Cancelled);
        assert!(!lib.is_exposing("ML0000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_its_exposure_is_superseded() {
        let (lib, adapter, camera) = setup();
        let first = camera.arm(&adapter, 10.0).await.unwrap();
        let (first_task, first_handle) = spawn(camera.clone(), adapter.clone(), first, 10.0, CADENCE);

        tokio::time::sleep(Duration::from_millis(150)).await;
        camera.abort_exposure(&adapter).await.unwrap();
        let second = camera.arm(&adapter, 5.0).await.unwrap();
        let (_second_task, second_handle) = spawn(camera.clone(), adapter, second, 5.0, CADENCE);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(first_task.is_finished());
        assert!(first_handle.is_finished());
        assert_eq!(first_handle.progress(), ExposureProgress::Cancelled);

        // Cancelling the stale handle does not touch the running exposure.
        assert_eq!(first_handle.cancel().await, ExposureProgress::Cancelled);
        assert!(lib.is_exposing("ML0000"));
        assert!(matches!(second_handle.progress(), ExposureProgress::Exposing { .. }));
        assert_eq!(camera.state().await, ExposureState::Exposing);
    }
}
