//! OBD-II Protocol Implementation
//!
//! This crate provides the OBD-II command catalog, request/response codec,
//! trouble code decoding and supported-PID discovery, on top of an async
//! byte-level [`Transport`]. An ELM327 serial transport and a simulated
//! vehicle are included.

pub mod codec;
pub mod discovery;
pub mod dtc;
mod elm327;
mod error;
pub mod registry;
mod simulator;
mod transport;

pub use codec::DecodedValue;
pub use discovery::{discover, SupportedSet};
pub use dtc::{DiagnosticTroubleCode, DtcDomain, DtcList};
pub use elm327::{parse_response, Elm327Connector, Elm327Transport};
pub use error::{DecodeError, DiscoveryError, QueryError, TransportError};
pub use registry::{Command, Payload, Unit};
pub use simulator::SimulatedVehicle;
pub use transport::{exchange, query, Connector, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Trouble codes pending in the current or last drive cycle
    pub const PENDING_DTC: u8 = 0x07;
    /// Added to the service byte in a positive response
    pub const RESPONSE_OFFSET: u8 = 0x40;
}
