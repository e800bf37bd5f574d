//! Error type for camera operations.
//!
//! Every driver call can fail. Most failures leave the device in an unknown
//! state and are fatal for the session: they propagate to the session owner,
//! which decides whether to terminate or restart. A small set of conditions is
//! recoverable and is reported per call (see [`CameraError::is_fatal`]).

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionState;
use crate::traits::{ColorFormat, PropertyId, PropertyKind, SensorPort};

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No usable device could be opened.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    /// Port number outside the supported set.
    #[error("Invalid sensor port {0}, expected 1..=4")]
    InvalidPort(u32),

    /// Operation issued in a session state that does not allow it.
    #[error("Cannot {operation} while session is {state:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Acquisition requested before a target format was negotiated.
    #[error("No target format negotiated")]
    FormatNotNegotiated,

    /// The device enumerated no target format with the desired encoding.
    #[error("{wanted} not found in target format list of port {port}")]
    TargetFormatNotFound {
        /// Port whose list was scanned.
        port: SensorPort,
        /// Encoding that was requested.
        wanted: ColorFormat,
    },

    /// The converter has no path between the two encodings.
    #[error("No conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source encoding.
        from: ColorFormat,
        /// Target encoding.
        to: ColorFormat,
    },

    /// Image conversion failed.
    #[error("Image conversion failed: {0}")]
    ConversionFailed(String),

    /// Buffer pitch is smaller than a row or the buffer is too short.
    #[error("Invalid pitch {pitch} for {row_bytes} bytes per row, {height} rows in {len} bytes")]
    InvalidPitch {
        /// Bytes between row starts.
        pitch: usize,
        /// Logical bytes per row.
        row_bytes: usize,
        /// Number of rows.
        height: usize,
        /// Buffer length.
        len: usize,
    },

    /// No frame became available within the timeout.
    #[error("Could not lock image on port {port} within {timeout:?}")]
    AcquisitionTimeout {
        /// Port that was polled.
        port: SensorPort,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Hardware-reported or caller-supplied type disagrees with the property.
    #[error("Invalid type of property {property}: expected {expected}, got {reported}")]
    PropertyTypeMismatch {
        /// Property being accessed.
        property: PropertyId,
        /// Type the property is known to have.
        expected: PropertyKind,
        /// Type that was reported or supplied.
        reported: PropertyKind,
    },

    /// Property does not exist on the active sensor.
    #[error("Property '{0}' not supported")]
    PropertyUnsupported(PropertyId),

    /// A packed image does not hold the expected content.
    #[error("Frame validation failed: {0}")]
    ValidationFailed(String),

    /// A frame token not currently locked was passed back to the driver.
    #[error("Frame {0} is not locked")]
    UnknownFrame(u64),

    /// Unexpected failure of a driver call.
    #[error("{call} failed: {message}")]
    Sdk {
        /// Driver call that failed.
        call: &'static str,
        /// Driver-provided message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CameraError {
    /// Shorthand for an [`CameraError::Sdk`] error.
    pub fn sdk<M: ToString>(call: &'static str, message: M) -> Self {
        Self::Sdk {
            call,
            message: message.to_string(),
        }
    }

    /// Whether the error leaves the session unusable.
    ///
    /// Lock timeouts and unsupported properties are resolved per call; every
    /// other error means the hardware state is unknown.
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AcquisitionTimeout { .. } | Self::PropertyUnsupported(_)
        )
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
