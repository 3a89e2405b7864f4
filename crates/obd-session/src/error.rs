//! Session error types

use obd_protocol::{DecodeError, DiscoveryError, TransportError};
use thiserror::Error;

/// Errors returned by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The operation needs an open connection
    #[error("Not connected to a vehicle")]
    NotConnected,

    #[error("PID discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The vehicle answered with a value of the wrong shape
    #[error("{0} returned an unexpected value")]
    UnexpectedValue(&'static str),

    /// The session task is gone
    #[error("Session closed")]
    Closed,
}
