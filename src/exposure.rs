//! Exposure state machine.
//!
//! `ExposureTracker` holds the per-camera exposure bookkeeping and is the
//! only place where the exposure state changes. It performs no I/O: the
//! [`Camera`](crate::camera::Camera) issues the hardware calls and then
//! applies the matching transition here.
//!
//! ```text
//!            arm                 complete              finish
//!   Idle ──────────▶ Exposing ──────────────▶ ReadingOut ──────▶ Idle
//!    ▲                 │  ▲ poll (time left > 0)
//!    │     abort       │  │
//!    └─────────────────┘──┘
//!
//!   any ── fault ──▶ Error ── reset ──▶ Idle
//! ```
//!
//! Completion is only ever declared from a hardware-reported time-left of
//! zero. Local elapsed time feeds [`ExposureTracker::next_poll_delay`] and
//! nothing else.

use std::fmt;
use std::os::raw::c_long;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Longest exposure time accepted by `arm`, in seconds.
///
/// `libfli` takes the exposure time as a `long` count of milliseconds.
pub const MAX_EXPOSURE_TIME: f64 = c_long::MAX as f64 / 1000.0;

/// Requested exposure time as a `Duration`, or `None` if it is negative,
/// not finite, or too long for the library.
pub fn exposure_duration(seconds: f64) -> Option<Duration> {
    if !(0.0..=MAX_EXPOSURE_TIME).contains(&seconds) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Stamp of one arm of a camera.
///
/// A polling task only drives the exposure it was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposureId(u64);

impl fmt::Display for ExposureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exposure {}", self.0)
    }
}

/// Exposure lifecycle state of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExposureState {
    /// Ready to be armed.
    Idle,
    /// The hardware is integrating.
    Exposing,
    /// Exposure finished; readout bookkeeping still pending.
    ReadingOut,
    /// Unexpected hardware failure. Only `reset` leaves this state.
    Error,
}

impl ExposureState {
    /// Lower-case name used in logs and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureState::Idle => "idle",
            ExposureState::Exposing => "exposing",
            ExposureState::ReadingOut => "reading out",
            ExposureState::Error => "error",
        }
    }
}

impl fmt::Display for ExposureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected transition: the action is not allowed from `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    /// State the tracker was in.
    pub from: ExposureState,
    /// Name of the attempted transition.
    pub action: &'static str,
}

/// Per-camera exposure bookkeeping.
#[derive(Debug, Clone)]
pub struct ExposureTracker {
    state: ExposureState,
    exposure_id: Option<ExposureId>,
    arms: u64,
    exposure_time: f64,
    started_at: Option<Instant>,
    started_utc: Option<DateTime<Utc>>,
    time_left: Option<Duration>,
    last_fault: Option<String>,
}

impl Default for ExposureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureTracker {
    /// A fresh tracker in `Idle`.
    pub fn new() -> Self {
        Self {
            state: ExposureState::Idle,
            exposure_id: None,
            arms: 0,
            exposure_time: 0.0,
            started_at: None,
            started_utc: None,
            time_left: None,
            last_fault: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ExposureState {
        self.state
    }

    /// Stamp of the last arm.
    pub fn exposure_id(&self) -> Option<ExposureId> {
        self.exposure_id
    }

    /// Whether `exposure` is the one currently exposing.
    pub fn is_exposing(&self, exposure: ExposureId) -> bool {
        self.state == ExposureState::Exposing && self.exposure_id == Some(exposure)
    }

    /// Configured exposure time of the last arm, in seconds.
    pub fn exposure_time(&self) -> f64 {
        self.exposure_time
    }

    /// Monotonic start of the current/last exposure.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Wall-clock start of the current/last exposure.
    pub fn started_utc(&self) -> Option<DateTime<Utc>> {
        self.started_utc
    }

    /// Last time-left value reported by the hardware.
    pub fn time_left(&self) -> Option<Duration> {
        self.time_left
    }

    /// Reason of the last fault, cleared on reset.
    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    /// Time since the exposure started, as seen by the local clock.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
    }

    /// Check that `arm` is allowed without changing anything.
    ///
    /// The camera calls this before touching the hardware so that a second
    /// arm during an exposure never reaches the device.
    pub fn can_arm(&self) -> Result<(), TransitionError> {
        match self.state {
            ExposureState::Idle => Ok(()),
            from => Err(TransitionError {
                from,
                action: "arm",
            }),
        }
    }

    /// `Idle -> Exposing`. Records the start time and stamps a new exposure.
    pub fn arm(&mut self, exposure_time: f64, now: Instant) -> Result<ExposureId, TransitionError> {
        self.can_arm()?;
        self.arms += 1;
        let id = ExposureId(self.arms);
        self.exposure_id = Some(id);
        self.state = ExposureState::Exposing;
        self.exposure_time = exposure_time;
        self.started_at = Some(now);
        self.started_utc = Some(Utc::now());
        self.time_left = None;
        Ok(id)
    }

    /// `Exposing -> Exposing`: cache the hardware-reported time left.
    pub fn refresh(&mut self, time_left: Duration) -> Result<(), TransitionError> {
        self.require(ExposureState::Exposing, "poll")?;
        self.time_left = Some(time_left);
        Ok(())
    }

    /// `Exposing -> ReadingOut`. Returns the locally measured duration.
    pub fn complete(&mut self, now: Instant) -> Result<Duration, TransitionError> {
        self.require(ExposureState::Exposing, "complete")?;
        self.state = ExposureState::ReadingOut;
        self.time_left = Some(Duration::ZERO);
        Ok(self.elapsed(now).unwrap_or_default())
    }

    /// `ReadingOut -> Idle`.
    pub fn finish(&mut self) -> Result<(), TransitionError> {
        self.require(ExposureState::ReadingOut, "finish readout")?;
        self.state = ExposureState::Idle;
        Ok(())
    }

    /// `Exposing -> Idle` after the hardware exposure was cancelled.
    pub fn abort(&mut self) -> Result<(), TransitionError> {
        self.require(ExposureState::Exposing, "abort")?;
        self.state = ExposureState::Idle;
        self.time_left = None;
        Ok(())
    }

    /// Any state `-> Error`.
    pub fn fault(&mut self, reason: impl Into<String>) {
        self.state = ExposureState::Error;
        self.last_fault = Some(reason.into());
    }

    /// `Error -> Idle`. A no-op from `Idle`.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ExposureState::Error | ExposureState::Idle => {
                self.state = ExposureState::Idle;
                self.time_left = None;
                self.last_fault = None;
                Ok(())
            }
            from => Err(TransitionError {
                from,
                action: "reset",
            }),
        }
    }

    /// Delay before the next status query.
    ///
    /// Uses the hardware's last time-left when known, otherwise the local
    /// estimate, clamped to `[min_interval, interval]`.
    pub fn next_poll_delay(&self, interval: Duration, min_interval: Duration, now: Instant) -> Duration {
        let floor = min_interval.min(interval);
        let estimate = match self.time_left {
            Some(left) => left,
            None => {
                let elapsed = self.elapsed(now).unwrap_or_default();
                exposure_duration(self.exposure_time)
                    .unwrap_or(interval)
                    .saturating_sub(elapsed)
            }
        };
        estimate.clamp(floor, interval)
    }

    fn require(&self, expected: ExposureState, action: &'static str) -> Result<(), TransitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = ExposureTracker::new();
        let start = Instant::now();

        tracker.arm(1.5, start).unwrap();
        assert_eq!(tracker.state(), ExposureState::Exposing);
        assert_eq!(tracker.exposure_time(), 1.5);
        assert!(tracker.started_utc().is_some());

        tracker.refresh(Duration::from_millis(700)).unwrap();
        assert_eq!(tracker.state(), ExposureState::Exposing);
        assert_eq!(tracker.time_left(), Some(Duration::from_millis(700)));

        let elapsed = tracker.complete(start + Duration::from_millis(1500)).unwrap();
        assert_eq!(elapsed, Duration::from_millis(1500));
        assert_eq!(tracker.state(), ExposureState::ReadingOut);

        tracker.finish().unwrap();
        assert_eq!(tracker.state(), ExposureState::Idle);
    }

    #[test]
    fn test_second_arm_rejected() {
        let mut tracker = ExposureTracker::new();
        let start = Instant::now();
        tracker.arm(5.0, start).unwrap();

        let err = tracker.arm(1.0, start + Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.from, ExposureState::Exposing);
        assert_eq!(err.action, "arm");
        // The first exposure keeps its timing.
        assert_eq!(tracker.exposure_time(), 5.0);
        assert_eq!(tracker.started_at(), Some(start));
    }

    #[test]
    fn test_fault_is_terminal_until_reset() {
        let mut tracker = ExposureTracker::new();
        tracker.arm(1.0, Instant::now()).unwrap();
        tracker.fault("io error");

        assert_eq!(tracker.state(), ExposureState::Error);
        assert_eq!(tracker.last_fault(), Some("io error"));
        assert!(tracker.can_arm().is_err());
        assert!(tracker.finish().is_err());
        assert!(tracker.refresh(Duration::ZERO).is_err());

        tracker.reset().unwrap();
        assert_eq!(tracker.state(), ExposureState::Idle);
        assert_eq!(tracker.last_fault(), None);
    }

    #[test]
    fn test_reset_rejected_mid_exposure() {
        let mut tracker = ExposureTracker::new();
        tracker.arm(1.0, Instant::now()).unwrap();
        assert!(tracker.reset().is_err());
        assert_eq!(tracker.state(), ExposureState::Exposing);
    }

    #[test]
    fn test_abort_only_from_exposing() {
        let mut tracker = ExposureTracker::new();
        assert!(tracker.abort().is_err());

        tracker.arm(1.0, Instant::now()).unwrap();
        tracker.abort().unwrap();
        assert_eq!(tracker.state(), ExposureState::Idle);
    }

    #[test]
    fn test_poll_delay_prefers_hardware_time_left() {
        let interval = Duration::from_millis(500);
        let min = Duration::from_millis(10);
        let start = Instant::now();
        let mut tracker = ExposureTracker::new();
        tracker.arm(2.0, start).unwrap();

        // No report yet: local estimate, capped at the interval.
        assert_eq!(tracker.next_poll_delay(interval, min, start), interval);

        tracker.refresh(Duration::from_millis(120)).unwrap();
        assert_eq!(
            tracker.next_poll_delay(interval, min, start),
            Duration::from_millis(120)
        );

        tracker.refresh(Duration::from_millis(1)).unwrap();
        assert_eq!(tracker.next_poll_delay(interval, min, start), min);
    }

    #[test]
    fn test_each_arm_gets_a_new_id() {
        let mut tracker = ExposureTracker::new();
        let first = tracker.arm(1.0, Instant::now()).unwrap();
        assert!(tracker.is_exposing(first));

        tracker.abort().unwrap();
        assert!(!tracker.is_exposing(first));

        let second = tracker.arm(1.0, Instant::now()).unwrap();
        assert_ne!(first, second);
        assert!(tracker.is_exposing(second));
        assert!(!tracker.is_exposing(first));
        assert_eq!(tracker.exposure_id(), Some(second));
    }

    #[test]
    fn test_exposure_duration_bounds() {
        assert_eq!(exposure_duration(0.0), Some(Duration::ZERO));
        assert_eq!(exposure_duration(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(exposure_duration(-0.001), None);
        assert_eq!(exposure_duration(f64::NAN), None);
        assert_eq!(exposure_duration(f64::INFINITY), None);
        assert_eq!(exposure_duration(1e20), None);
        assert!(exposure_duration(MAX_EXPOSURE_TIME).is_some());
    }

    #[test]
    fn test_poll_delay_with_min_above_interval() {
        let tracker = ExposureTracker::new();
        let delay = tracker.next_poll_delay(
            Duration::from_millis(20),
            Duration::from_millis(50),
            Instant::now(),
        );
        assert_eq!(delay, Duration::from_millis(20));
    }
}
