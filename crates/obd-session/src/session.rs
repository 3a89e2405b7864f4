//! Session handle and the task that owns the transport.
//!
//! Every operation is a request to a single task holding the transport, so
//! discovery, polling ticks and trouble code services can never overlap on
//! the wire. Requests that arrive during a tick wait for the tick to end.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::state::{ConnectionState, SessionEvent};
use obd_protocol::{
    discover, query, registry, Command, Connector, DecodeError, DecodedValue,
    DiagnosticTroubleCode, QueryError, SupportedSet, Transport, TransportError,
};
use obd_scheduler::PollingScheduler;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Stop token of the active polling run, shared so a stop can land mid-tick
type PollSlot = Arc<Mutex<Option<CancellationToken>>>;

/// Operations sent from the handle to the session task
enum Request {
    Connect { reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    StartPolling { reply: Reply<()> },
    StopPolling { reply: Reply<()> },
    SupportedPids { reply: Reply<SupportedSet> },
    ReadCodes {
        command: &'static Command,
        reply: Reply<Vec<DiagnosticTroubleCode>>,
    },
    ClearCodes { reply: Reply<()> },
}

/// Handle to a vehicle session.
///
/// Creating a session spawns its task on the current Tokio runtime. The
/// task ends, closing any open transport, when the handle is dropped or
/// [`ConnectionSession::shutdown`] is called.
pub struct ConnectionSession {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<ConnectionState>,
    polling: PollSlot,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionSession {
    /// Create a disconnected session that opens links through `connector`
    pub fn new<C>(connector: C, config: SessionConfig) -> Self
    where
        C: Connector + 'static,
    {
        Self::with_connector(Box::new(connector), config)
    }

    /// Same as [`ConnectionSession::new`] for an already boxed connector
    pub fn with_connector(connector: Box<dyn Connector>, config: SessionConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.request_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let polling = PollSlot::default();
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            connector,
            scheduler: PollingScheduler::new(config.scheduler.clone()),
            config,
            transport: None,
            supported: None,
            state: state_tx,
            events: events.clone(),
            polling: polling.clone(),
        };
        let task = tokio::spawn(actor.run(request_rx, cancel.clone()));

        Self {
            requests: request_tx,
            events,
            state: state_rx,
            polling,
            cancel,
            task,
        }
    }

    /// Open the link. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::Connect { reply }).await
    }

    /// Close the link from any state, dropping the supported set
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.interrupt_polling();
        self.request(|reply| Request::Disconnect { reply }).await
    }

    /// Start polling, discovering supported PIDs first when needed.
    ///
    /// Fails with [`SessionError::NotConnected`] unless connected; the
    /// state is left as it was in that case.
    pub async fn start_polling(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::StartPolling { reply }).await
    }

    /// Stop polling. A tick in progress ends after its current exchange.
    pub async fn stop_polling(&self) -> Result<(), SessionError> {
        self.interrupt_polling();
        self.request(|reply| Request::StopPolling { reply }).await
    }

    /// Supported PIDs of the connected vehicle, discovering them if needed
    pub async fn supported_pids(&self) -> Result<SupportedSet, SessionError> {
        self.request(|reply| Request::SupportedPids { reply }).await
    }

    /// Read stored trouble codes (Mode 03)
    pub async fn fetch_dtcs(&self) -> Result<Vec<DiagnosticTroubleCode>, SessionError> {
        self.request(|reply| Request::ReadCodes {
            command: &registry::GET_DTC,
            reply,
        })
        .await
    }

    /// Read pending trouble codes (Mode 07)
    pub async fn fetch_pending_dtcs(&self) -> Result<Vec<DiagnosticTroubleCode>, SessionError> {
        self.request(|reply| Request::ReadCodes {
            command: &registry::GET_PENDING_DTC,
            reply,
        })
        .await
    }

    /// Clear stored trouble codes (Mode 04)
    pub async fn clear_dtcs(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::ClearCodes { reply }).await
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to state changes and live samples
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the session task and wait for it to release the transport
    pub async fn shutdown(self) {
        self.interrupt_polling();
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("Session task failed: {}", err);
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Cancel the running poll without waiting for the task
    fn interrupt_polling(&self) {
        if let Some(token) = lock(&self.polling).take() {
            debug!("Interrupting polling run");
            token.cancel();
        }
    }
}

/// State owned by the session task
struct SessionActor {
    connector: Box<dyn Connector>,
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    /// `None` until discovery has run on the current link
    supported: Option<SupportedSet>,
    scheduler: PollingScheduler,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    polling: PollSlot,
}

impl SessionActor {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>, cancel: CancellationToken) {
        debug!("Session task started");

        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.poll_tick().await;
                }
            }
        }

        self.release().await;
        debug!("Session task stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Connect { reply } => {
                let _ = reply.send(self.connect().await);
            }
            Request::Disconnect { reply } => {
                self.release().await;
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(Ok(()));
            }
            Request::StartPolling { reply } => {
                let _ = reply.send(self.start_polling().await);
            }
            Request::StopPolling { reply } => {
                self.stop_polling();
                let _ = reply.send(Ok(()));
            }
            Request::SupportedPids { reply } => {
                let result = self.ensure_supported().await.map(SupportedSet::clone);
                let _ = reply.send(result);
            }
            Request::ReadCodes { command, reply } => {
                let _ = reply.send(self.read_codes(command).await);
            }
            Request::ClearCodes { reply } => {
                let _ = reply.send(self.clear_codes().await);
            }
        }
    }

    fn current(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            info!("Session state: {}", next);
            // No subscribers is fine
            let _ = self.events.send(SessionEvent::State(next));
        }
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.current().is_connected() {
            warn!("Already connected, ignoring connect");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.connector.open().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.supported = None;
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                error!("Connection failed: {}", err);
                self.set_state(ConnectionState::Error(err.to_string()));
                Err(err.into())
            }
        }
    }

    async fn start_polling(&mut self) -> Result<(), SessionError> {
        match self.current() {
            ConnectionState::Connected => {}
            ConnectionState::Polling => {
                warn!("Already polling, ignoring start");
                return Ok(());
            }
            _ => return Err(SessionError::NotConnected),
        }

        let supported = self.ensure_supported().await?.clone();
        if let Some(token) = self.scheduler.start(&supported) {
            *lock(&self.polling) = Some(token);
        }
        self.set_state(ConnectionState::Polling);
        Ok(())
    }

    fn stop_polling(&mut self) {
        lock(&self.polling).take();
        self.scheduler.stop();
        if self.current() == ConnectionState::Polling {
            self.set_state(ConnectionState::Connected);
        } else {
            debug!("Not polling, nothing to stop");
        }
    }

    /// Run discovery once per link
    async fn ensure_supported(&mut self) -> Result<&SupportedSet, SessionError> {
        if self.supported.is_none() {
            let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;
            match discover(&mut **transport, self.config.exchange_timeout()).await {
                Ok(set) => self.supported = Some(set),
                Err(err) => {
                    self.fail(&err.to_string()).await;
                    return Err(err.into());
                }
            }
        }
        self.supported.as_ref().ok_or(SessionError::NotConnected)
    }

    async fn poll_tick(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            self.scheduler.stop();
            return;
        };

        let events = self.events.clone();
        let mut emit = move |sample| {
            let _ = events.send(SessionEvent::Sample(sample));
        };
        if let Err(err) = self.scheduler.tick(&mut **transport, &mut emit).await {
            self.fail(&err.to_string()).await;
        }
    }

    async fn read_codes(
        &mut self,
        command: &'static Command,
    ) -> Result<Vec<DiagnosticTroubleCode>, SessionError> {
        match self.service(command).await {
            Ok(DecodedValue::Codes(codes)) => {
                info!("{} reported {} trouble codes", command.mnemonic, codes.len());
                Ok(codes)
            }
            Ok(_) => Err(SessionError::UnexpectedValue(command.mnemonic)),
            Err(SessionError::Decode(DecodeError::NoData)) => {
                debug!("{} answered NO DATA, no codes", command.mnemonic);
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn clear_codes(&mut self) -> Result<(), SessionError> {
        match self.service(&registry::CLEAR_DTC).await? {
            DecodedValue::Acknowledged => {
                info!("Stored trouble codes cleared");
                Ok(())
            }
            _ => Err(SessionError::UnexpectedValue(registry::CLEAR_DTC.mnemonic)),
        }
    }

    /// One exchange outside the polling loop
    async fn service(&mut self, command: &'static Command) -> Result<DecodedValue, SessionError> {
        if !self.current().is_connected() {
            return Err(SessionError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;

        match query(&mut **transport, command, self.config.exchange_timeout()).await {
            Ok(value) => Ok(value),
            Err(QueryError::Decode(err)) => {
                warn!("{} could not be decoded: {}", command.mnemonic, err);
                Err(err.into())
            }
            Err(QueryError::Transport(TransportError::Timeout(ms))) => {
                warn!("{} timed out after {}ms", command.mnemonic, ms);
                Err(TransportError::Timeout(ms).into())
            }
            Err(QueryError::Transport(err)) => {
                self.fail(&err.to_string()).await;
                Err(err.into())
            }
        }
    }

    /// Drop the link after an unrecoverable failure
    async fn fail(&mut self, reason: &str) {
        error!("Session failed: {}", reason);
        self.release().await;
        self.set_state(ConnectionState::Error(reason.to_string()));
    }

    async fn release(&mut self) {
        lock(&self.polling).take();
        self.scheduler.stop();
        self.supported = None;
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                warn!("Error closing transport: {}", err);
            }
        }
    }
}

fn lock(slot: &PollSlot) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
