//! Transport trait for adapter communication.
//!
//! The [`Transport`] trait abstracts the byte-level link to an OBD-II adapter.
//! OBD-II is strictly half-duplex: a request is sent, then exactly one
//! response (or a timeout) is awaited. [`exchange`] and [`query`] take the
//! transport by mutable reference so the borrow checker rules out a second
//! request while one is outstanding.

use crate::codec::{self, DecodedValue};
use crate::error::{QueryError, TransportError};
use crate::registry::Command;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Asynchronous request/response link to an adapter.
#[async_trait]
pub trait Transport: Send {
    /// Send one complete request.
    async fn send(&mut self, request: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the response to the last request.
    ///
    /// An empty response means the adapter reported that the vehicle had no
    /// data for the request.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying link.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens transports; one call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh link to the adapter
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// One request/response round trip for `command`
pub async fn exchange<T>(
    transport: &mut T,
    command: &Command,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError>
where
    T: Transport + ?Sized,
{
    let request = codec::encode(command);
    debug!("Sending {} ({:02X?})", command.mnemonic, request);
    transport.send(&request).await?;
    let response = transport.receive(timeout).await?;
    debug!("Received {:02X?} for {}", response, command.mnemonic);
    Ok(response)
}

/// Exchange and decode in one step
pub async fn query<T>(
    transport: &mut T,
    command: &Command,
    timeout: Duration,
) -> Result<DecodedValue, QueryError>
where
    T: Transport + ?Sized,
{
    let response = exchange(transport, command, timeout).await?;
    Ok(codec::decode(command, &response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::registry;
    use crate::simulator::SimulatedVehicle;

    #[tokio::test]
    async fn test_query_decodes_response() {
        let mut vehicle = SimulatedVehicle::new();
        let coolant = registry::by_id(0x05).unwrap();
        let value = query(&mut vehicle, coolant, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(value.as_f64().is_some());
        assert_eq!(vehicle.requests(), vec![vec![0x01, 0x05]]);
    }

    #[tokio::test]
    async fn test_query_unsupported_is_no_data() {
        let mut vehicle = SimulatedVehicle::new().with_supported(&[0x0C]);
        let speed = registry::by_id(0x0D).unwrap();
        let err = query(&mut vehicle, speed, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Decode(DecodeError::NoData));
    }
}
