//! Core error types and result handling
//!
//! All fallible API edges return [`ModbusResult`]. Errors never unwind:
//! protocol-level failures (exceptions, timeouts) are reported through the
//! response callbacks, while argument and resource problems surface here.

use thiserror::Error;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error type for all engine operations
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Invalid argument passed to an API function
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Unsupported or malformed function code
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Data outside protocol limits (register counts, payload sizes)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// No free request slot or queue space
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Protocol-level error
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Transport initialisation failure reported by the embedder
    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl ModbusError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ModbusError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    /// Create a resource exhaustion error
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        ModbusError::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        ModbusError::Transport {
            message: message.into(),
        }
    }
}

/// Modbus exception codes carried in `function | 0x80` responses.
///
/// Slave-side register handlers return these to turn a request into an
/// exception response; the master surfaces the raw code to its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code not supported by the slave
    IllegalFunction = 0x01,
    /// Register range not covered by any work entry
    IllegalDataAddress = 0x02,
    /// Register count or payload length outside protocol limits
    IllegalDataValue = 0x03,
    /// Unrecoverable failure while handling the request
    SlaveDeviceFailure = 0x04,
    /// Slave busy with a long-running operation
    SlaveDeviceBusy = 0x06,
}

impl ExceptionCode {
    /// Decode a wire exception code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::SlaveDeviceFailure),
            0x06 => Some(ExceptionCode::SlaveDeviceBusy),
            _ => None,
        }
    }

    /// Wire representation
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_round_trip() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x06] {
            let exc = ExceptionCode::from_u8(code).unwrap();
            assert_eq!(exc.to_u8(), code);
        }
        assert_eq!(ExceptionCode::from_u8(0x05), None);
        assert_eq!(ExceptionCode::from_u8(0x00), None);
    }

    #[test]
    fn test_error_constructors() {
        let err = ModbusError::invalid_data("count out of range");
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(err.to_string(), "Invalid data: count out of range");

        let err = ModbusError::resource_exhausted("no free request slot");
        assert!(matches!(err, ModbusError::ResourceExhausted { .. }));
    }
}
