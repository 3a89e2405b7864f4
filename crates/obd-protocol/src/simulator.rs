//! Simulated vehicle for testing without hardware.
//!
//! [`SimulatedVehicle`] answers support masks, live PIDs and the trouble code
//! services like an ECU behind an adapter with echo and headers turned off.
//! It rejects a request sent while the previous response has not been read,
//! so it doubles as a single-flight checker in tests.

use crate::codec;
use crate::error::TransportError;
use crate::mode;
use crate::registry;
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// PIDs a default simulated vehicle supports, spread over all three blocks
const DEFAULT_SUPPORTED: &[u8] = &[
    0x01, 0x03, 0x04, 0x05, 0x06, 0x07, 0x0B, 0x0C, 0x0D, 0x10, 0x11, 0x14, 0x1C, 0x1F, 0x2F,
    0x33, 0x42, 0x46, 0x51,
];

/// State shared by every clone, so tests can observe a boxed transport
#[derive(Debug, Default)]
struct Shared {
    requests: Mutex<Vec<Vec<u8>>>,
    stored_dtcs: Mutex<Vec<[u8; 2]>>,
    unplugged: AtomicBool,
}

/// Simulated ECU implementing [`Transport`] and [`Connector`]
#[derive(Debug, Clone)]
pub struct SimulatedVehicle {
    /// Mode 01 PIDs the vehicle answers
    supported: BTreeSet<u8>,
    /// PIDs that never answer
    silent: BTreeSet<u8>,
    /// Mode 07 codes
    pending_dtcs: Vec<[u8; 2]>,
    /// Delay before a response is available
    latency: Duration,
    /// Response to the last request; `Some(None)` means the ECU stays silent
    outstanding: Option<Option<Vec<u8>>>,
    /// Number of answered live PIDs, drives the generated values
    sequence: u64,
    shared: Arc<Shared>,
}

impl SimulatedVehicle {
    /// Vehicle with a typical PID set and two stored codes (P0143, P0300)
    pub fn new() -> Self {
        info!("Creating simulated vehicle");
        let shared = Shared::default();
        *lock(&shared.stored_dtcs) = vec![[0x01, 0x43], [0x03, 0x00]];
        Self {
            supported: DEFAULT_SUPPORTED.iter().copied().collect(),
            silent: BTreeSet::new(),
            pending_dtcs: Vec::new(),
            latency: Duration::from_millis(20),
            outstanding: None,
            sequence: 0,
            shared: Arc::new(shared),
        }
    }

    /// Replace the supported PID set
    pub fn with_supported(mut self, pids: &[u8]) -> Self {
        self.supported = pids.iter().copied().collect();
        self
    }

    /// Replace the stored trouble codes
    pub fn with_stored_dtcs(self, codes: &[[u8; 2]]) -> Self {
        *lock(&self.shared.stored_dtcs) = codes.to_vec();
        self
    }

    /// Set the pending trouble codes
    pub fn with_pending_dtcs(mut self, codes: &[[u8; 2]]) -> Self {
        self.pending_dtcs = codes.to_vec();
        self
    }

    /// PIDs that time out instead of answering
    pub fn with_silent(mut self, pids: &[u8]) -> Self {
        self.silent = pids.iter().copied().collect();
        self
    }

    /// Response latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request received so far, across clones
    pub fn requests(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.requests).clone()
    }

    /// Number of stored trouble codes
    pub fn stored_dtc_count(&self) -> usize {
        lock(&self.shared.stored_dtcs).len()
    }

    /// Simulate pulling the adapter out of the port
    pub fn unplug(&self) {
        info!("Simulated adapter unplugged");
        self.shared.unplugged.store(true, Ordering::SeqCst);
    }

    /// Simulate plugging the adapter back in
    pub fn replug(&self) {
        self.shared.unplugged.store(false, Ordering::SeqCst);
    }

    fn is_unplugged(&self) -> bool {
        self.shared.unplugged.load(Ordering::SeqCst)
    }

    /// Answer a request; `None` means the ECU stays silent
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        match request {
            [mode::CURRENT_DATA, pid] => self.respond_current(*pid),
            [mode::READ_DTC] => Some(codes_response(mode::READ_DTC, &lock(&self.shared.stored_dtcs))),
            [mode::PENDING_DTC] => Some(codes_response(mode::PENDING_DTC, &self.pending_dtcs)),
            [mode::CLEAR_DTC] => {
                lock(&self.shared.stored_dtcs).clear();
                Some(vec![mode::CLEAR_DTC + mode::RESPONSE_OFFSET])
            }
            // Negative response: service not supported
            _ => Some(vec![0x7F, request.first().copied().unwrap_or(0), 0x11]),
        }
    }

    fn respond_current(&mut self, pid: u8) -> Option<Vec<u8>> {
        if self.silent.contains(&pid) {
            return None;
        }
        let Some(command) = registry::by_id(pid) else {
            return Some(Vec::new());
        };

        let mut response = codec::response_header(command);
        if let Some(mask) = self.support_mask(pid) {
            response.extend_from_slice(&mask.to_be_bytes());
            return Some(response);
        }
        if !self.supported.contains(&pid) {
            return Some(Vec::new());
        }

        self.sequence += 1;
        response.extend(self.generate_payload(pid, command.payload.width()));
        Some(response)
    }

    /// Mask for a support query PID, or `None` if `pid` is not one
    fn support_mask(&self, pid: u8) -> Option<u32> {
        if pid % 0x20 != 0 {
            return None;
        }
        let base = u32::from(pid);
        let mut mask = 0u32;
        for &id in self.supported.iter().filter(|&&id| u32::from(id) > base) {
            let offset = u32::from(id) - base;
            if offset <= 32 {
                mask |= 1 << (32 - offset);
            } else {
                // Something beyond this block: flag the next support query
                mask |= 1;
            }
        }
        // Block A always answers; later blocks only when announced
        if base > 0 && !self.supported.iter().any(|&id| u32::from(id) > base) {
            return None;
        }
        Some(mask)
    }

    fn generate_payload(&self, pid: u8, width: usize) -> Vec<u8> {
        // Pseudo-random but deterministic per request
        let mut hasher = DefaultHasher::new();
        self.sequence.hash(&mut hasher);
        pid.hash(&mut hasher);
        let hash = hasher.finish();

        match pid {
            // RPM: 800-3500 RPM range
            0x0C => {
                let encoded = (800 + (hash % 2700) as u16) * 4;
                encoded.to_be_bytes().to_vec()
            }
            // Speed: 0-120 km/h
            0x0D => vec![(hash % 120) as u8],
            // Coolant temp: 70-105°C (stored as value + 40)
            0x05 => vec![(110 + (hash % 35)) as u8],
            // Engine load: 20-80%
            0x04 => vec![(51 + (hash % 153)) as u8],
            // MAF: 5-50 g/s
            0x10 => (500 + (hash % 4500) as u16).to_be_bytes().to_vec(),
            // Fuel trims: -10% to +10%
            0x06 | 0x07 => vec![(115 + (hash % 26)) as u8],
            // O2 voltage: 0.1-0.9V, trim byte unused
            0x14 => vec![(20 + (hash % 160)) as u8, 0xFF],
            // Closed loop on fuel system 1
            0x03 => vec![0x02, 0x00],
            // OBD-II as defined by the CARB
            0x1C => vec![0x01],
            // Gasoline
            0x51 => vec![0x01],
            // Control module voltage: 13.5-14.5 V
            0x42 => (13_500 + (hash % 1000) as u16).to_be_bytes().to_vec(),
            _ => hash.to_be_bytes().iter().cycle().take(width).copied().collect(),
        }
    }
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedVehicle {
    async fn send(&mut self, request: &[u8]) -> Result<(), TransportError> {
        if self.is_unplugged() {
            return Err(TransportError::Disconnected);
        }
        if self.outstanding.is_some() {
            return Err(TransportError::Garbled(format!(
                "request {request:02X?} sent while a response is outstanding"
            )));
        }

        lock(&self.shared.requests).push(request.to_vec());
        let response = self.respond(request);
        debug!("Simulated ECU: {:02X?} -> {:02X?}", request, response);
        self.outstanding = Some(response);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let timed_out = TransportError::Timeout(timeout.as_millis() as u64);
        let Some(response) = self.outstanding.take() else {
            tokio::time::sleep(timeout).await;
            return Err(timed_out);
        };

        match response {
            Some(bytes) if self.latency <= timeout => {
                tokio::time::sleep(self.latency).await;
                if self.is_unplugged() {
                    return Err(TransportError::Disconnected);
                }
                Ok(bytes)
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(timed_out)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!("Simulated transport closed");
        self.outstanding = None;
        Ok(())
    }
}

#[async_trait]
impl Connector for SimulatedVehicle {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        if self.is_unplugged() {
            return Err(TransportError::Disconnected);
        }
        let mut link = self.clone();
        link.outstanding = None;
        Ok(Box::new(link))
    }
}

fn codes_response(service: u8, codes: &[[u8; 2]]) -> Vec<u8> {
    let mut response = vec![service + mode::RESPONSE_OFFSET];
    response.extend(codes.iter().flatten());
    response
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
