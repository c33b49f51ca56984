//! Custom error types for the crate.
//!
//! Two layers of errors exist:
//!
//! - **`HardwareError`**: the typed form of a raw `libfli` status code. The
//!   hardware adapter never interprets these beyond the translation done in
//!   [`crate::hardware::check_status`]; it performs no retries.
//! - **`CameraError`**: what every public operation of the orchestrator and
//!   the camera state machine returns. Each variant names the serial of the
//!   camera involved so that failures local to one camera can be reported
//!   without ambiguity when many cameras are operated at once.
//!
//! By using `#[from]`, configuration errors convert seamlessly with `?`.
//! Hardware errors carry no serial, so they are lifted explicitly with
//! [`CameraError::from_hardware`].

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::exposure::ExposureState;

/// Convenience alias for results using the crate error type.
pub type CameraResult<T> = std::result::Result<T, CameraError>;

/// Typed hardware failure translated from a negative `libfli` status.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// `ENXIO`/`ENODEV`: the device or handle is gone.
    #[error("device not found")]
    DeviceNotFound,

    /// `EALREADY`: the device is already exposing.
    #[error("operation already in progress")]
    AlreadyInProgress,

    /// Any other negative status.
    #[error("I/O failure (errno {code})")]
    Io {
        /// Positive errno value.
        code: i32,
    },

    /// The native library cannot be loaded or used.
    #[error("libfli is not available")]
    LibraryUnavailable,
}

/// Taxonomy kind of a [`CameraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No attached device has the requested serial, or it disappeared.
    DeviceNotFound,
    /// An exposure is already running on the camera.
    AlreadyInProgress,
    /// Unexpected hardware failure.
    HardwareFault,
    /// The device does not match its configuration.
    ConfigMismatch,
    /// The camera library cannot be used.
    LibraryUnavailable,
    /// The camera was not added to the system.
    NotManaged,
    /// A caller-supplied value was rejected.
    InvalidArgument,
    /// The operation is not allowed in the camera's current state.
    InvalidState,
    /// A bounded wait ran out.
    Timeout,
    /// The exposure was aborted.
    Cancelled,
    /// The configuration could not be loaded or is invalid.
    Config,
}

/// Error returned by camera, registry and orchestrator operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// No attached device has this serial, or its handle went stale.
    #[error("Camera {serial}: device not found")]
    DeviceNotFound {
        /// Camera serial.
        serial: String,
    },

    /// A second exposure was requested while one is running.
    #[error("Camera {serial}: an exposure is already in progress")]
    AlreadyInProgress {
        /// Camera serial.
        serial: String,
    },

    /// A hardware call failed unexpectedly; the camera is in `Error`.
    #[error("Camera {serial}: hardware fault: {source}")]
    HardwareFault {
        /// Camera serial.
        serial: String,
        /// Underlying hardware error.
        #[source]
        source: HardwareError,
    },

    /// The device found does not match its configuration entry.
    #[error("Camera {serial}: configuration mismatch: {reason}")]
    ConfigMismatch {
        /// Camera serial.
        serial: String,
        /// What did not match.
        reason: String,
    },

    /// The camera library cannot be used.
    #[error("Camera library unavailable: {0}")]
    LibraryUnavailable(HardwareError),

    /// The camera was never added or has been disconnected.
    #[error("Camera {serial} is not managed by this system")]
    NotManaged {
        /// Camera serial.
        serial: String,
    },

    /// Negative, non-finite or too long exposure time.
    #[error("Camera {serial}: invalid exposure time {value}")]
    InvalidExposureTime {
        /// Camera serial.
        serial: String,
        /// Rejected value, in seconds.
        value: f64,
    },

    /// The transition is not allowed from the current state.
    #[error("Camera {serial}: cannot {action} while {state}")]
    InvalidState {
        /// Camera serial.
        serial: String,
        /// State the camera was in.
        state: ExposureState,
        /// Attempted transition.
        action: &'static str,
    },

    /// `wait_timeout` ran out; the exposure keeps running.
    #[error("Camera {serial}: timed out after {waited:?} waiting for exposure")]
    Timeout {
        /// Camera serial.
        serial: String,
        /// Time waited.
        waited: Duration,
    },

    /// The exposure was aborted before it completed.
    #[error("Camera {serial}: exposure cancelled")]
    Cancelled {
        /// Camera serial.
        serial: String,
    },

    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CameraError {
    /// Lift a hardware error into the camera taxonomy for `serial`.
    pub fn from_hardware(serial: impl Into<String>, error: HardwareError) -> Self {
        let serial = serial.into();
        match error {
            HardwareError::DeviceNotFound => CameraError::DeviceNotFound { serial },
            HardwareError::AlreadyInProgress => CameraError::AlreadyInProgress { serial },
            HardwareError::LibraryUnavailable => CameraError::LibraryUnavailable(error),
            HardwareError::Io { .. } => CameraError::HardwareFault {
                serial,
                source: error,
            },
        }
    }

    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            CameraError::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            CameraError::HardwareFault { .. } => ErrorKind::HardwareFault,
            CameraError::ConfigMismatch { .. } => ErrorKind::ConfigMismatch,
            CameraError::LibraryUnavailable(_) => ErrorKind::LibraryUnavailable,
            CameraError::NotManaged { .. } => ErrorKind::NotManaged,
            CameraError::InvalidExposureTime { .. } => ErrorKind::InvalidArgument,
            CameraError::InvalidState { .. } => ErrorKind::InvalidState,
            CameraError::Timeout { .. } => ErrorKind::Timeout,
            CameraError::Cancelled { .. } => ErrorKind::Cancelled,
            CameraError::Config(_) => ErrorKind::Config,
        }
    }

    /// Serial of the camera this error concerns, if any.
    pub fn serial(&self) -> Option<&str> {
        match self {
            CameraError::DeviceNotFound { serial }
            | CameraError::AlreadyInProgress { serial }
            | CameraError::HardwareFault { serial, .. }
            | CameraError::ConfigMismatch { serial, .. }
            | CameraError::NotManaged { serial }
            | CameraError::InvalidExposureTime { serial, .. }
            | CameraError::InvalidState { serial, .. }
            | CameraError::Timeout { serial, .. }
            | CameraError::Cancelled { serial } => Some(serial),
            CameraError::LibraryUnavailable(_) | CameraError::Config(_) => None,
        }
    }
}
