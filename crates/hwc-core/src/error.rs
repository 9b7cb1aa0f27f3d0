//! Error types shared by transports and drivers.
//!
//! Two layers, both built with `thiserror`:
//!
//! - [`TransportError`] covers the communication channel itself. Its
//!   [`TransportError::is_timeout`] classification is what the completion
//!   synchronizer uses to decide whether a failed poll is retried.
//! - [`DeviceError`] covers device semantics (limits, unrecognized settings,
//!   calibration) and wraps transport failures via `#[from]`, so drivers can
//!   use `?` on transport calls.
//!
//! Factories and the CLI work in `anyhow::Result` and attach context on top.

use std::time::Duration;
use thiserror::Error;

/// VISA status code for a timed-out I/O operation (`VI_ERROR_TMO`).
pub const VISA_TIMEOUT_CODE: i32 = -1_073_807_339;

/// Convenience alias for transport-level results.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Convenience alias for device-level results.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure of a message transport.
///
/// # Error Categories
///
/// 1. **Transient** - [`TransportError::Timeout`]. The instrument did not answer
///    within the read timeout. Long operations (sweeps) routinely trigger this,
///    so callers polling for completion retry it.
/// 2. **Fatal** - everything else. The channel is broken, closed, or the
///    instrument answered with something that does not parse.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No response arrived before the transport's read timeout elapsed.
    #[error("Timed out after {after:?} waiting for response to '{operation}'")]
    Timeout { operation: String, after: Duration },

    /// Underlying OS I/O failure (socket reset, serial port unplugged, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was closed by the owner or by the remote end.
    #[error("Transport is closed")]
    Closed,

    /// A response arrived but could not be interpreted.
    #[error("Malformed response to '{command}': {reason} (got {response:?})")]
    MalformedResponse {
        command: String,
        response: String,
        reason: String,
    },

    /// The resource address could not be parsed.
    #[error("Invalid resource address '{0}'")]
    InvalidResource(String),

    /// A VISA library call failed with a status code other than a timeout.
    #[error("VISA error {code}: {message}")]
    Visa { code: i32, message: String },

    /// The transport kind is not compiled into this build.
    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Build a timeout error for the given command.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Build a malformed-response error.
    pub fn malformed(
        command: impl Into<String>,
        response: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedResponse {
            command: command.into(),
            response: response.into(),
            reason: reason.into(),
        }
    }

    /// Map a VISA status code, folding `VI_ERROR_TMO` into [`TransportError::Timeout`].
    pub fn from_visa_status(
        operation: impl Into<String>,
        code: i32,
        message: impl Into<String>,
        after: Duration,
    ) -> Self {
        if code == VISA_TIMEOUT_CODE {
            Self::timeout(operation, after)
        } else {
            Self::Visa {
                code,
                message: message.into(),
            }
        }
    }

    /// True for the transient read-timeout class.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

// =============================================================================
// Device Errors
// =============================================================================

/// Failure of a device-level operation.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Communication with the instrument failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A mnemonic or value is not one the device accepts.
    ///
    /// Returned when parsing user input such as `"SING"` or `"TRG"` into a
    /// typed setting fails, so callers can fall back explicitly.
    #[error("Unrecognized {setting} setting '{value}'")]
    InvalidSetting { setting: &'static str, value: String },

    /// A motion target lies outside the configured software limits.
    #[error("Location {target} m would exceed software limits [{lower}, {upper}] m")]
    OutOfBounds { target: f64, lower: f64, upper: f64 },

    /// Software travel limits were never configured.
    #[error("Motor software limits not initialized")]
    LimitsNotSet,

    /// The stage has no step-to-distance calibration.
    #[error("Stage not calibrated: {0}")]
    NotCalibrated(String),

    /// Requested integration time is outside the spectrometer's range.
    #[error("Integration time error: {0}")]
    Integration(String),

    /// Requested number of averaged scans is not accepted.
    #[error("Scan averaging error: {0}")]
    Average(String),

    /// Semantically invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The device does not support the requested operation.
    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Build an [`DeviceError::InvalidSetting`].
    pub fn invalid_setting(setting: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting,
            value: value.into(),
        }
    }

    /// True if the underlying cause is a transport timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
