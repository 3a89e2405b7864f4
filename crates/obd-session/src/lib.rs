//! OBD-II Connection Session
//!
//! Owns the link to the vehicle and serializes everything that travels over
//! it: discovery, polling ticks and on-demand trouble code services. Callers
//! drive the session through a cheap handle and observe it through state and
//! sample events.

mod config;
mod error;
mod session;
mod state;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::ConnectionSession;
pub use state::{ConnectionState, SessionEvent};
