//! OBD-II Error Types

use thiserror::Error;

/// Failures of the byte-level link to the adapter.
///
/// These are never recovered inside the protocol layer: the session moves to
/// its error state when one of them surfaces from an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Link to the adapter is gone
    #[error("OBD adapter disconnected")]
    Disconnected,

    /// Adapter answered with bytes that do not form a response
    #[error("Garbled response: {0}")]
    Garbled(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout(0),
            std::io::ErrorKind::InvalidData => TransportError::Garbled(err.to_string()),
            _ => TransportError::Disconnected,
        }
    }
}

/// Failures turning a response into a value. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is shorter than the command's width
    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Adapter signalled that the vehicle did not answer
    #[error("No data")]
    NoData,

    /// Trouble code payload is not made of 2-byte groups
    #[error("DTC payload has odd length {0}")]
    OddLength(usize),

    /// Response echoes a different service or PID than was requested
    #[error("Unexpected response header: expected {expected:02X?}, got {actual:02X?}")]
    UnexpectedHeader { expected: Vec<u8>, actual: Vec<u8> },
}

/// Outcome of a failed exchange-and-decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failures of the supported-PID discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Block A produced no usable answer
    #[error("Vehicle did not answer the supported PIDs query")]
    NoResponse,

    /// Link failed while discovering
    #[error(transparent)]
    Transport(#[from] TransportError),
}
