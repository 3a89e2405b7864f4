//! Polling Scheduler Implementation

use obd_protocol::{
    query, Command, DecodedValue, QueryError, SupportedSet, Transport, TransportError, Unit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a tick emits for a command whose exchange failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Emit a sample marked unavailable
    #[default]
    EmitUnavailable,
    /// Emit nothing for the command this tick
    Skip,
}

/// Configuration for the polling scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between the last exchange of a tick and the next tick (default: 1000)
    pub interval_ms: u64,
    /// Per-exchange response timeout in milliseconds (default: 2000)
    pub exchange_timeout_ms: u64,
    /// Handling of failed commands
    pub failure_policy: FailurePolicy,
    /// Consecutive complete ticks with every exchange timed out before the
    /// link is declared lost (default: 3)
    pub max_silent_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            exchange_timeout_ms: 2000,
            failure_policy: FailurePolicy::EmitUnavailable,
            max_silent_ticks: 3,
        }
    }
}

impl SchedulerConfig {
    /// Interval between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-exchange timeout
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

/// Value carried by a live sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    /// Decoded response
    Value(DecodedValue),
    /// The exchange timed out or could not be decoded this tick
    Unavailable(QueryError),
}

/// One polled value, handed straight to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSample {
    /// PID the sample belongs to
    pub command_id: u8,
    /// Registry name of the PID
    pub mnemonic: &'static str,
    /// Decoded value or the reason it is missing
    pub value: SampleValue,
    /// Unit of numeric values
    pub unit: Option<Unit>,
    /// When the response arrived
    pub timestamp: Instant,
}

impl LiveSample {
    /// Whether the sample carries a value
    pub fn is_available(&self) -> bool {
        matches!(self.value, SampleValue::Value(_))
    }
}

/// Summary of a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Exchanges performed
    pub attempted: usize,
    /// Exchanges that produced a value
    pub sampled: usize,
    /// Exchanges that timed out
    pub timed_out: usize,
    /// Exchanges that could not be decoded
    pub undecodable: usize,
    /// Whether a stop request cut the tick short
    pub interrupted: bool,
}

/// Cooperative, single-flight polling loop over the supported PIDs.
///
/// Each tick queries every pollable PID once, in ascending order, and waits
/// for each response before sending the next request. The next tick starts
/// one interval after the last exchange of the previous one.
pub struct PollingScheduler {
    /// Configuration
    config: SchedulerConfig,
    /// Commands polled each tick, ascending by PID
    commands: Vec<&'static Command>,
    /// Stop token of the current run; `None` when never started
    stop: Option<CancellationToken>,
    /// Earliest start of the next tick
    next_tick: Instant,
    /// Consecutive failure count per PID
    failures: HashMap<u8, u32>,
    /// Ticks completed in the current run
    ticks: u64,
    /// Complete ticks in a row in which every exchange timed out
    silent_ticks: u32,
}

impl PollingScheduler {
    /// Create an idle scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            commands: Vec::new(),
            stop: None,
            next_tick: Instant::now(),
            failures: HashMap::new(),
            ticks: 0,
            silent_ticks: 0,
        }
    }

    /// Begin a run over `supported`; the first tick is due immediately.
    ///
    /// Returns the run's stop token, or `None` (with a warning) when a run is
    /// already active.
    pub fn start(&mut self, supported: &SupportedSet) -> Option<CancellationToken> {
        if self.is_running() {
            warn!("Polling scheduler already running, ignoring start");
            return None;
        }

        self.commands = supported.commands().filter(|c| c.is_pollable()).collect();
        if self.commands.is_empty() {
            warn!("No pollable PIDs in the supported set");
        }
        self.failures.clear();
        self.ticks = 0;
        self.silent_ticks = 0;
        self.next_tick = Instant::now();

        let token = CancellationToken::new();
        self.stop = Some(token.clone());
        info!("Polling scheduler started with {} PIDs", self.commands.len());
        Some(token)
    }

    /// Request a stop; an in-flight exchange still completes
    pub fn stop(&mut self) {
        if let Some(token) = &self.stop {
            if !token.is_cancelled() {
                info!("Stopping polling scheduler");
                token.cancel();
            }
        }
    }

    /// Check if scheduler is running
    pub fn is_running(&self) -> bool {
        self.stop.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// When the next tick is due, while running
    pub fn deadline(&self) -> Option<Instant> {
        self.is_running().then_some(self.next_tick)
    }

    /// PIDs polled each tick, in order
    pub fn pids(&self) -> impl Iterator<Item = u8> + '_ {
        self.commands.iter().map(|command| command.id)
    }

    /// Consecutive failures recorded for `pid`
    pub fn failures(&self, pid: u8) -> u32 {
        self.failures.get(&pid).copied().unwrap_or(0)
    }

    /// Ticks completed in the current run
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick, passing every sample to `emit`.
    ///
    /// Timeouts and decode failures only affect their own command. Any other
    /// transport error ends the run and is returned. So is a timeout once
    /// `max_silent_ticks` complete ticks in a row got no answer at all; a
    /// tick cut short by a stop never counts towards that.
    pub async fn tick<T, F>(&mut self, transport: &mut T, emit: &mut F) -> Result<TickReport, TransportError>
    where
        T: Transport + ?Sized,
        F: FnMut(LiveSample) + Send,
    {
        let Some(stop) = self.stop.clone() else {
            return Ok(TickReport::default());
        };
        let timeout = self.config.exchange_timeout();
        let mut report = TickReport::default();
        let commands = self.commands.clone();

        for command in commands {
            if stop.is_cancelled() {
                debug!("Stop requested, ending tick before {}", command.mnemonic);
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            let result = query(transport, command, timeout).await;
            let timestamp = Instant::now();

            let value = match result {
                Ok(value) => {
                    report.sampled += 1;
                    self.failures.remove(&command.id);
                    SampleValue::Value(value)
                }
                Err(QueryError::Transport(TransportError::Timeout(ms))) => {
                    report.timed_out += 1;
                    let count = record_failure(&mut self.failures, command.id);
                    warn!("PID {:02X} timed out after {}ms ({} in a row)", command.id, ms, count);
                    SampleValue::Unavailable(TransportError::Timeout(ms).into())
                }
                Err(QueryError::Transport(err)) => {
                    error!("Transport failed while polling {}: {}", command.mnemonic, err);
                    self.stop();
                    return Err(err);
                }
                Err(QueryError::Decode(err)) => {
                    report.undecodable += 1;
                    let count = record_failure(&mut self.failures, command.id);
                    warn!("PID {:02X} could not be decoded: {} ({} in a row)", command.id, err, count);
                    SampleValue::Unavailable(err.into())
                }
            };

            if matches!(value, SampleValue::Unavailable(_)) && self.config.failure_policy == FailurePolicy::Skip {
                continue;
            }
            emit(LiveSample {
                command_id: command.id,
                mnemonic: command.mnemonic,
                value,
                unit: command.unit(),
                timestamp,
            });
        }

        if !report.interrupted {
            let silent = report.attempted > 0 && report.timed_out == report.attempted;
            self.silent_ticks = if silent { self.silent_ticks + 1 } else { 0 };
            if self.silent_ticks >= self.config.max_silent_ticks.max(1) {
                error!("No answer for {} ticks in a row", self.silent_ticks);
                self.stop();
                return Err(TransportError::Timeout(self.config.exchange_timeout_ms));
            }
        }

        self.ticks += 1;
        self.next_tick = Instant::now() + self.config.interval();
        debug!("Tick {} done: {:?}", self.ticks, report);
        Ok(report)
    }

    /// Tick until stopped, for callers that own the transport exclusively
    pub async fn run<T, F>(&mut self, transport: &mut T, emit: &mut F) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
        F: FnMut(LiveSample) + Send,
    {
        let Some(stop) = self.stop.clone() else {
            warn!("Polling scheduler run without start");
            return Ok(());
        };

        while !stop.is_cancelled() {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = sleep_until(self.next_tick) => {}
            }
            self.tick(transport, emit).await?;
        }

        info!("Polling scheduler stopped after {} ticks", self.ticks);
        Ok(())
    }
}

fn record_failure(failures: &mut HashMap<u8, u32>, pid: u8) -> u32 {
    let count = failures.entry(pid).or_insert(0);
    *count += 1;
    *count
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use obd_protocol::{DecodeError, SimulatedVehicle};

    const PIDS: &[u8] = &[0x0D, 0x05, 0x0C];

    fn supported(pids: &[u8]) -> SupportedSet {
        pids.iter().copied().collect()
    }

    /// Cancels a token when a given request goes out
    struct StopOnRequest {
        inner: SimulatedVehicle,
        trigger: Vec<u8>,
        token: CancellationToken,
    }

    #[async_trait]
    impl Transport for StopOnRequest {
        async fn send(&mut self, request: &[u8]) -> Result<(), TransportError> {
            if request == self.trigger.as_slice() {
                self.token.cancel();
            }
            self.inner.send(request).await
        }

        async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
            self.inner.receive(timeout).await
        }
    }

    #[test]
    fn test_start_is_single_run() {
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        assert!(!scheduler.is_running());
        assert!(scheduler.start(&supported(PIDS)).is_some());
        assert!(scheduler.is_running());
        assert!(scheduler.start(&supported(PIDS)).is_none());

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.deadline().is_none());
        assert!(scheduler.start(&supported(PIDS)).is_some());
    }

    #[test]
    fn test_support_masks_not_polled() {
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(&[0x0C, 0x00, 0x20, 0x05]));
        assert_eq!(scheduler.pids().collect::<Vec<_>>(), vec![0x05, 0x0C]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_ascending_single_flight() {
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(PIDS));

        let mut samples = Vec::new();
        let report = scheduler
            .tick(&mut vehicle, &mut |sample| samples.push(sample))
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.sampled, 3);
        // The simulator rejects a request sent before the previous response
        // was read, so three clean samples prove the exchanges never overlapped
        assert!(samples.iter().all(LiveSample::is_available));
        assert_eq!(samples.iter().map(|s| s.command_id).collect::<Vec<_>>(), vec![0x05, 0x0C, 0x0D]);
        assert_eq!(
            vehicle.requests(),
            vec![vec![0x01, 0x05], vec![0x01, 0x0C], vec![0x01, 0x0D]]
        );
        assert_eq!(samples[0].unit, Some(Unit::Celsius));
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_tick_end() {
        let latency = Duration::from_millis(300);
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS).with_latency(latency);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(PIDS));

        let mut samples = Vec::new();
        scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();
        let first_tick_end = Instant::now();
        assert_eq!(scheduler.deadline(), Some(first_tick_end + Duration::from_millis(1000)));

        sleep_until(scheduler.deadline().unwrap()).await;
        scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();

        // Last sample of tick 1 to first sample of tick 2: interval plus one latency
        let gap = samples[3].timestamp - samples[2].timestamp;
        assert_eq!(gap, Duration::from_millis(1000) + latency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_does_not_abort_tick() {
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS).with_silent(&[0x0C]);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(PIDS));

        let mut samples = Vec::new();
        let report = scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();

        assert_eq!(report.timed_out, 1);
        assert_eq!(samples.len(), 3);
        assert_eq!(
            samples[1].value,
            SampleValue::Unavailable(QueryError::Transport(TransportError::Timeout(2000)))
        );
        assert!(samples[2].is_available());
        assert_eq!(scheduler.failures(0x0C), 1);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_policy_and_decode_failures() {
        // 0x0D unsupported by the vehicle answers NO DATA
        let mut vehicle = SimulatedVehicle::new().with_supported(&[0x05, 0x0C]);
        let config = SchedulerConfig {
            failure_policy: FailurePolicy::Skip,
            ..Default::default()
        };
        let mut scheduler = PollingScheduler::new(config);
        scheduler.start(&supported(PIDS));

        let mut samples = Vec::new();
        let report = scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();
        assert_eq!(report.undecodable, 1);
        assert_eq!(samples.iter().map(|s| s.command_id).collect::<Vec<_>>(), vec![0x05, 0x0C]);

        scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();
        assert_eq!(scheduler.failures(0x0D), 2);
        assert_eq!(scheduler.failures(0x05), 0);

        let mut emit_unavailable = PollingScheduler::new(SchedulerConfig::default());
        emit_unavailable.start(&supported(&[0x0D]));
        let mut seen = Vec::new();
        emit_unavailable.tick(&mut vehicle, &mut |s| seen.push(s)).await.unwrap();
        assert_eq!(
            seen[0].value,
            SampleValue::Unavailable(QueryError::Decode(DecodeError::NoData))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_timeouts_escalate() {
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS).with_silent(PIDS);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(PIDS));

        for _ in 0..2 {
            let report = scheduler.tick(&mut vehicle, &mut |_| {}).await.unwrap();
            assert_eq!(report.timed_out, 3);
            assert!(scheduler.is_running());
        }
        let err = scheduler.tick(&mut vehicle, &mut |_| {}).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(2000));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_silent_pid_tolerated_until_limit() {
        let mut vehicle = SimulatedVehicle::new().with_supported(&[0x0C]).with_silent(&[0x0C]);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(&[0x0C]));

        scheduler.tick(&mut vehicle, &mut |_| {}).await.unwrap();
        scheduler.tick(&mut vehicle, &mut |_| {}).await.unwrap();
        assert_eq!(scheduler.failures(0x0C), 2);
        assert!(scheduler.tick(&mut vehicle, &mut |_| {}).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_resets_silent_ticks() {
        let vehicle = SimulatedVehicle::new().with_supported(&[0x05]).with_silent(PIDS);
        let config = SchedulerConfig {
            max_silent_ticks: 2,
            ..Default::default()
        };
        let mut scheduler = PollingScheduler::new(config);
        scheduler.start(&supported(PIDS));

        let mut silent = vehicle.clone();
        scheduler.tick(&mut silent, &mut |_| {}).await.unwrap();
        // One answer in between breaks the streak
        let mut answering = vehicle.clone().with_silent(&[]);
        let report = scheduler.tick(&mut answering, &mut |_| {}).await.unwrap();
        assert_eq!(report.sampled, 1);
        scheduler.tick(&mut silent, &mut |_| {}).await.unwrap();
        assert!(scheduler.tick(&mut silent, &mut |_| {}).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_timeout_is_not_a_link_failure() {
        let vehicle = SimulatedVehicle::new().with_supported(PIDS).with_silent(&[0x05]);
        let config = SchedulerConfig {
            max_silent_ticks: 1,
            ..Default::default()
        };
        let mut scheduler = PollingScheduler::new(config);
        let token = scheduler.start(&supported(PIDS)).unwrap();
        let mut link = StopOnRequest {
            inner: vehicle.clone(),
            trigger: vec![0x01, 0x05],
            token,
        };

        let report = scheduler.tick(&mut link, &mut |_| {}).await.unwrap();
        assert!(report.interrupted);
        assert_eq!((report.attempted, report.timed_out), (1, 1));
        assert_eq!(vehicle.requests(), vec![vec![0x01, 0x05]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_ends_run() {
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS);
        vehicle.unplug();
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        scheduler.start(&supported(PIDS));

        let mut samples = Vec::new();
        let err = scheduler.tick(&mut vehicle, &mut |s| samples.push(s)).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
        assert!(samples.is_empty());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_tick_completes_in_flight_exchange() {
        let vehicle = SimulatedVehicle::new().with_supported(PIDS);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        let token = scheduler.start(&supported(PIDS)).unwrap();
        let mut link = StopOnRequest {
            inner: vehicle.clone(),
            trigger: vec![0x01, 0x0C],
            token,
        };

        let mut samples = Vec::new();
        scheduler.run(&mut link, &mut |s| samples.push(s)).await.unwrap();

        // 0x0C was already sent when the stop arrived: it completes, 0x0D never goes out
        assert_eq!(vehicle.requests(), vec![vec![0x01, 0x05], vec![0x01, 0x0C]]);
        assert_eq!(samples.iter().map(|s| s.command_id).collect::<Vec<_>>(), vec![0x05, 0x0C]);
        assert!(samples.iter().all(LiveSample::is_available));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped_between_ticks() {
        let mut vehicle = SimulatedVehicle::new().with_supported(PIDS);
        let mut scheduler = PollingScheduler::new(SchedulerConfig::default());
        let token = scheduler.start(&supported(PIDS)).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            token.cancel();
        });

        let mut samples = Vec::new();
        scheduler.run(&mut vehicle, &mut |s| samples.push(s)).await.unwrap();

        // Ticks start at 0, ~1060 and ~2120ms; the stop at 2500ms lands between ticks
        assert_eq!(scheduler.ticks(), 3);
        assert_eq!(samples.len(), 9);
        for pid in PIDS {
            let stamps: Vec<_> = samples
                .iter()
                .filter(|s| s.command_id == *pid)
                .map(|s| s.timestamp)
                .collect();
            assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
