//! Error handling for the Modbus master engine.
//!
//! The taxonomy follows the failure modes of a Modbus exchange: transport
//! problems (I/O, connection, timeout), frame integrity problems (CRC,
//! malformed frames), protocol-level rejections (exception responses), and
//! caller mistakes caught before any I/O (address/count validation).
//!
//! "Device absent" is deliberately NOT an error: `connect()` returns
//! `Ok(false)` when the serial port or host cannot be reached, so callers
//! can tell a missing slave apart from a fatal misconfiguration.

use thiserror::Error;

/// Result type alias for Modbus operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error variants for Modbus master operations.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O failure on the underlying socket or serial port.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or maintenance failure.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response within the configured window.
    ///
    /// `timeout_ms` is 0 when the timeout was configured as infinite but the
    /// operation was abandoned for another reason.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Modbus protocol violation that is not a frame or CRC problem,
    /// e.g. a response from an unexpected slave id on an RTU bus.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code outside the supported set.
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Offset/count combination that violates protocol limits.
    ///
    /// Raised before any bytes are sent: address-space overflow
    /// (start + count > 65536) or a count above the per-request ceiling.
    #[error("Invalid address range: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Caller-supplied data that cannot be encoded as requested.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// RTU frame whose trailing CRC16 does not match the computed value.
    ///
    /// Never retried transparently; surfacing it is the only way wiring or
    /// interference problems become visible.
    #[error("CRC validation failed: expected=0x{expected:04X}, actual=0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Exception response from the device (function code with the high bit
    /// set plus a one-byte exception code).
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Frame structure violation: truncated frame, MBAP length field not
    /// matching the bytes received, oversized frame.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Settings that cannot be realized, e.g. a parity mode the serial
    /// driver does not support. Detected lazily at connect time.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create an exception error with the standard human-readable name for
    /// the exception code.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = crate::protocol::ModbusException::from_u8(code)
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| "Unknown Exception".to_string());
        Self::Exception {
            function,
            code,
            message,
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a retry of the failed operation could plausibly succeed.
    ///
    /// Only the transport-level failures and the Acknowledge/SlaveDeviceBusy
    /// exceptions qualify; validation and frame-integrity failures are
    /// permanent for a given request.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Exception { code, .. } => matches!(*code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Whether the error originates in the transport rather than the
    /// Modbus protocol layer.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the error is a Modbus protocol-level failure.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::CrcMismatch { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}
