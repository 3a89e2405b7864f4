//! ELM327 Serial Transport
//!
//! Frames requests as ASCII hex terminated by a carriage return and reads the
//! adapter's answer up to its `>` prompt. The adapter is expected to be set up
//! already (echo and headers off); no AT commands are sent from here.

use crate::error::TransportError;
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Prompt the adapter prints when it is ready for the next command
const PROMPT: u8 = b'>';

/// Upper bound on a single answer, to stop a babbling adapter
const MAX_RESPONSE_LEN: usize = 4096;

/// How long a late answer to a timed-out request is waited for
const LATE_ANSWER_GRACE: Duration = Duration::from_millis(100);

/// Adapter messages that mean the request could not be carried out
const ERROR_MESSAGES: &[&str] = &[
    "?",
    "ERROR",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "BUS BUSY",
    "FB ERROR",
    "DATA ERROR",
    "BUFFER FULL",
    "STOPPED",
];

/// Transport speaking the ELM327 text dialect over any byte stream
pub struct Elm327Transport<S = SerialStream> {
    stream: S,
    /// Bytes read past the last prompt
    pending: Vec<u8>,
    /// A request went out and its prompt has not been read yet
    awaiting_prompt: bool,
}

impl Elm327Transport<SerialStream> {
    /// Open a serial port (e.g. `/dev/ttyUSB0` or `COM3`)
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, TransportError> {
        info!("Opening ELM327 adapter on {} at {} baud", device, baud_rate);
        let stream = tokio_serial::new(device, baud_rate)
            .open_native_async()
            .map_err(|err| {
                warn!("Could not open {}: {}", device, err);
                TransportError::Disconnected
            })?;
        Ok(Self::new(stream))
    }
}

impl<S> Elm327Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already open stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            awaiting_prompt: false,
        }
    }

    /// Swallow the answer to a request that timed out, if it shows up
    async fn discard_late_answer(&mut self) {
        match tokio::time::timeout(LATE_ANSWER_GRACE, self.read_until_prompt()).await {
            Ok(Ok(stale)) => {
                debug!("Discarded late answer {:?}", String::from_utf8_lossy(&stale));
            }
            Ok(Err(err)) => debug!("Could not drain late answer: {}", err),
            Err(_) => {
                debug!("No late answer within {:?}", LATE_ANSWER_GRACE);
                self.pending.clear();
            }
        }
        self.awaiting_prompt = false;
    }

    async fn read_until_prompt(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == PROMPT) {
                let answer: Vec<u8> = self.pending.drain(..=end).collect();
                return Ok(answer);
            }
            if self.pending.len() > MAX_RESPONSE_LEN {
                self.pending.clear();
                return Err(TransportError::Garbled("response too long".to_string()));
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Disconnected);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl<S> Transport for Elm327Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, request: &[u8]) -> Result<(), TransportError> {
        if self.awaiting_prompt {
            self.discard_late_answer().await;
        }
        // Leftovers belong to an earlier, abandoned request
        self.pending.clear();
        let mut line = hex::encode_upper(request).into_bytes();
        line.push(b'\r');
        self.stream.write_all(&line).await?;
        self.stream.flush().await?;
        self.awaiting_prompt = true;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let answer = tokio::time::timeout(timeout, self.read_until_prompt())
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))??;
        self.awaiting_prompt = false;
        let text = String::from_utf8_lossy(&answer);
        debug!("ELM327 answered {:?}", text);
        parse_response(&text)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Turn an adapter answer into response bytes.
///
/// `NO DATA` becomes an empty response; adapter error messages and text that
/// is not hex become [`TransportError::Garbled`].
pub fn parse_response(text: &str) -> Result<Vec<u8>, TransportError> {
    let mut bytes = Vec::new();

    for line in text
        .split(['\r', '\n', PROMPT as char])
        .map(str::trim)
        .filter(|line| !line.is_empty())
    {
        if line.starts_with("SEARCHING") {
            continue;
        }
        if line == "NO DATA" {
            return Ok(Vec::new());
        }
        if ERROR_MESSAGES.contains(&line) {
            return Err(TransportError::Garbled(line.to_string()));
        }

        // Multi-frame answers open with a 3 digit byte count, then prefix
        // each line with a frame index, e.g. "0: 49 02"
        let data = match line.split_once(':') {
            Some((_, rest)) => rest,
            None if line.len() == 3 => continue,
            None => line,
        };
        let digits: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = hex::decode(&digits)
            .map_err(|err| TransportError::Garbled(format!("{line:?}: {err}")))?;
        bytes.extend(decoded);
    }

    Ok(bytes)
}

/// Opens [`Elm327Transport`]s on a serial device
#[derive(Debug, Clone)]
pub struct Elm327Connector {
    /// Serial port device path
    pub device: String,
    /// Baud rate for serial communication
    pub baud_rate: u32,
}

impl Elm327Connector {
    /// Create a connector for `device`
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Connector for Elm327Connector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(Elm327Transport::open(&self.device, self.baud_rate)?))
    }
}
