//! Custom error types for the stage controller.
//!
//! This module defines `StageError`, the single error type returned by every
//! library operation. It is built with `thiserror` and separates failures into
//! two groups:
//!
//! - **Session errors** end the session and must be surfaced to the user:
//!   `UnsupportedBackend`, `DeviceNotFound`, `InsufficientDevices`,
//!   `AlreadyInitialized`, `NotInitialized`, `ConnectionClosed`, transport
//!   failures and configuration problems.
//! - **Command errors** (`CommandRejected`, `InvalidTarget`) are local to one
//!   motion call. The axis stays usable, the command had no effect, and the
//!   caller is expected to report the rejection and carry on.
//!
//! No automatic retry happens anywhere in this crate; retrying is a caller policy.

use thiserror::Error;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Primary error type for stage control.
#[derive(Error, Debug)]
pub enum StageError {
    /// The backend selector was not one of the recognized values.
    #[error("Unsupported stage backend '{0}'. Expected 'hardware' or 'simulated'")]
    UnsupportedBackend(String),

    /// No serial device matched the expected USB identifiers and no manual
    /// port override was supplied.
    #[error("Stage not autodetected (no serial port with USB vid={vid:#06x} pid={pid:#06x})")]
    DeviceNotFound {
        /// USB vendor ID searched for
        vid: u16,
        /// USB product ID searched for
        pid: u16,
    },

    /// Fewer than two motion devices answered on an opened connection.
    #[error("Expected two motion devices on the connection, found {found}")]
    InsufficientDevices {
        /// Number of devices that answered detection
        found: usize,
    },

    /// The device refused a command (target outside travel limits, or the
    /// device is in a fault state). The command had no effect.
    #[error("Command rejected by axis {axis}: {reason}")]
    CommandRejected {
        /// Axis role that rejected the command (e.g. "x")
        axis: String,
        /// Rejection reason reported by the device
        reason: String,
    },

    /// A motion target was NaN, infinite, or outside the device's step range.
    /// Nothing was sent to the axis.
    #[error("Invalid target {value} for axis {axis}")]
    InvalidTarget {
        /// Axis role the target was meant for
        axis: String,
        /// The offending value, in the caller's unit
        value: f64,
    },

    /// `initialize()` was called on a controller that already handed out axes.
    #[error("Stage controller is already initialized")]
    AlreadyInitialized,

    /// Axis handles were requested before `initialize()`.
    #[error("Stage controller is not initialized")]
    NotInitialized,

    /// The connection was closed; no further commands are accepted.
    #[error("Stage connection is closed")]
    ConnectionClosed,

    /// Transport-level failure: timeout, unexpected EOF or a malformed reply.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or enumerated.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    InvalidConfig(String),

    /// The requested functionality was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl StageError {
    /// Whether the session can continue after this error.
    ///
    /// Only rejected commands are recoverable; everything else means the
    /// connection or the controller is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StageError::CommandRejected { .. } | StageError::InvalidTarget { .. }
        )
    }
}

impl From<figment::Error> for StageError {
    fn from(err: figment::Error) -> Self {
        StageError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StageError::CommandRejected {
            axis: "x".to_string(),
            reason: "BADDATA".to_string(),
        };
        assert_eq!(err.to_string(), "Command rejected by axis x: BADDATA");

        let err = StageError::DeviceNotFound {
            vid: 1027,
            pid: 24577,
        };
        assert!(err.to_string().contains("vid=0x0403"));
        assert!(err.to_string().contains("pid=0x6001"));
    }

    #[test]
    fn test_only_rejections_are_recoverable() {
        let rejected = StageError::CommandRejected {
            axis: "y".into(),
            reason: "BADDATA".into(),
        };
        assert!(rejected.is_recoverable());
        assert!(StageError::InvalidTarget {
            axis: "x".into(),
            value: f64::NAN
        }
        .is_recoverable());

        assert!(!StageError::AlreadyInitialized.is_recoverable());
        assert!(!StageError::InsufficientDevices { found: 1 }.is_recoverable());
        assert!(!StageError::UnsupportedBackend("laser".into()).is_recoverable());
        assert!(!StageError::Communication("timeout".into()).is_recoverable());
    }
}
