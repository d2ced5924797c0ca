//! Error types and handling for GivEnergy Local
//!
//! This module defines the error taxonomy used throughout the crate. Each
//! layer has its own error enum (transport, codec, planner, poll cycle,
//! controller) and `GivEnergyError` wraps them together with configuration
//! and I/O failures.

use crate::model::plan::WriteStep;
use thiserror::Error;

/// Result type alias for GivEnergy Local operations
pub type Result<T> = std::result::Result<T, GivEnergyError>;

/// Main error type for GivEnergy Local
#[derive(Debug, Error)]
pub enum GivEnergyError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Poll(#[from] PollError),
}

impl GivEnergyError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GivEnergyError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GivEnergyError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GivEnergyError::Io {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GivEnergyError {
    fn from(err: std::io::Error) -> Self {
        GivEnergyError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GivEnergyError {
    fn from(err: serde_yaml::Error) -> Self {
        GivEnergyError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GivEnergyError {
    fn from(err: serde_json::Error) -> Self {
        GivEnergyError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Failures of a single request/response exchange with the device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, lost, or the response did not arrive in time
    #[error("Device unreachable: {message}")]
    Unreachable { message: String },

    /// A frame arrived but failed checksum or structural validation
    #[error("Corrupt response: {message}")]
    Corrupt { message: String },
}

impl TransportError {
    pub fn unreachable<S: Into<String>>(message: S) -> Self {
        TransportError::Unreachable {
            message: message.into(),
        }
    }

    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        TransportError::Corrupt {
            message: message.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, TransportError::Corrupt { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::unreachable(err.to_string())
    }
}

/// Register values that cannot be turned into a typed value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid time slot value {raw}: hour {hour}, minute {minute}")]
    InvalidTimeSlot { raw: u16, hour: u16, minute: u16 },

    #[error(
        "Invalid date {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
    )]
    InvalidDate {
        year: u16,
        month: u16,
        day: u16,
        hour: u16,
        minute: u16,
        second: u16,
    },

    #[error("Register {address} (+{width}) outside of the available registers")]
    OutOfRange { address: u16, width: usize },
}

/// Typed values that cannot be represented in registers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Value of {len} characters does not fit a field of {max} characters")]
    ValueTooLong { len: usize, max: usize },

    #[error("Value out of range: {message}")]
    OutOfRange { message: String },

    #[error("Field of kind {kind} cannot hold a {value} value")]
    KindMismatch {
        kind: &'static str,
        value: &'static str,
    },
}

/// Failures surfaced by the request planner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TransportError },

    #[error("Holding register {register} is not safe to write")]
    UnsafeRegister { register: u16 },

    #[error("Device rejected function {function} for slave {slave:#04x}")]
    Rejected { slave: u8, function: u8 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl RequestError {
    /// Reads may be retried on any transport failure; everything else is final
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Transport(_))
    }
}

/// Failures of a whole poll cycle
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Implausible {field} reading {value}, expected {range}")]
    Implausible {
        field: &'static str,
        value: f64,
        range: String,
    },
}

/// Failures of a mode change or setting command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("No device snapshot available yet")]
    NoSnapshot,

    #[error("Invalid time window: {message}")]
    InvalidWindow { message: String },

    #[error("Charge target {target}% must be within 4-100%")]
    InvalidTarget { target: u16 },

    #[error("Invalid value for {setting}: {message}")]
    InvalidSetting { setting: String, message: String },

    #[error("Current value of {field} is not known from the latest snapshot")]
    Unresolved { field: &'static str },

    #[error(
        "Write plan aborted at {failed_step} after {} completed writes: {source}",
        .completed.len()
    )]
    PartialApplication {
        completed: Vec<WriteStep>,
        failed_step: WriteStep,
        #[source]
        source: RequestError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GivEnergyError::config("test config error");
        assert!(matches!(err, GivEnergyError::Config { .. }));

        let err = GivEnergyError::validation("field", "test validation error");
        assert!(matches!(err, GivEnergyError::Validation { .. }));

        let err: GivEnergyError = TransportError::corrupt("bad crc").into();
        assert!(matches!(err, GivEnergyError::Transport(_)));
    }

    #[test]
    fn test_error_display() {
        let err = GivEnergyError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = GivEnergyError::validation("test_field", "invalid value");
        assert_eq!(
            format!("{}", err),
            "Validation error: test_field - invalid value"
        );

        let err = RequestError::Exhausted {
            attempts: 3,
            last: TransportError::corrupt("bad crc"),
        };
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempts: Corrupt response: bad crc"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RequestError::from(TransportError::unreachable("timeout")).is_retryable());
        assert!(RequestError::from(TransportError::corrupt("crc")).is_retryable());
        assert!(!RequestError::UnsafeRegister { register: 1 }.is_retryable());
        assert!(
            !RequestError::Rejected {
                slave: 0x32,
                function: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_io_error_maps_to_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = TransportError::from(io);
        assert!(matches!(err, TransportError::Unreachable { .. }));
        assert!(!err.is_corrupt());
    }
}
