//! Device Session
//!
//! Binds one cipher and one protocol driver to a live transport. A single
//! tokio task owns all session state and processes transport notifications
//! and caller requests in arrival order; command writes go through a
//! separate writer task so decoding never waits on the radio.
//!
//! Decoding never waits on the consumer either. Events that do not fit in
//! the event channel are held in an in-order backlog that the task drains
//! as room appears, so a caller can always reach [`SessionHandle::disconnect`].
//!
//! Teardown happens exactly once, whoever triggers it: the transport
//! reports a disconnect, the cube asks for one, the sequencer gives up, or
//! the caller invokes [`SessionHandle::disconnect`]. The transport is
//! released first, then a single [`CubeEvent::Disconnect`] is published and
//! the event channel closes. Events still in the backlog when the caller
//! disconnects are discarded.

use crate::domain::models::{now_millis, CubeCommand, CubeEvent};
use crate::domain::sequencer::SequencerConfig;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::cipher::GanCipher;
use crate::infrastructure::bluetooth::driver::ProtocolDriver;
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// What the BLE layer reports for a connected cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw (encrypted) value of the state characteristic
    Notification(Vec<u8>),
    /// The link dropped
    Disconnected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("characteristic write failed: {0}")]
    Write(String),
    #[error("transport already closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// GATT access for one connected cube, implemented by the platform layer.
#[async_trait]
pub trait CubeTransport: Send + Sync {
    /// Write an encrypted command to the command characteristic
    async fn write_command(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Stop notifications and drop the GATT connection
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is disconnected")]
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub event_channel_capacity: usize,
    /// Sent right after the session starts
    pub initial_commands: Vec<CubeCommand>,
    pub sequencer: SequencerConfig,
    /// Log every decrypted notification as hex
    pub debug_raw_data_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            event_channel_capacity: settings.event_channel_capacity.max(1),
            initial_commands: settings.initial_commands.clone(),
            sequencer: settings.sequencer_config(),
            debug_raw_data_logging: settings.debug_raw_data_logging,
        }
    }
}

enum SessionRequest {
    Command(CubeCommand),
    Disconnect(oneshot::Sender<()>),
}

/// Caller side of a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<SessionRequest>,
    connected: Arc<AtomicBool>,
    generation: CubeGeneration,
}

impl SessionHandle {
    pub fn generation(&self) -> CubeGeneration {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a command; it is encrypted and written without waiting for
    /// the cube to acknowledge it.
    pub fn send_command(&self, command: CubeCommand) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected);
        }
        self.requests
            .send(SessionRequest::Command(command))
            .map_err(|_| SessionError::Disconnected)
    }

    /// Tear the session down and wait until the transport is released.
    /// Calling it again, or after the cube dropped, is a no-op.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.requests.send(SessionRequest::Disconnect(ack_tx)).is_err() {
            return;
        }
        // The sender is dropped unanswered if the session ended on its own
        let _ = ack_rx.await;
    }
}

/// Start a session task for an already connected cube.
///
/// Returns the event stream and a handle. The stream yields events in
/// decode order and ends after the one `Disconnect` event.
pub fn spawn_session(
    transport: Arc<dyn CubeTransport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    cipher: GanCipher,
    driver: ProtocolDriver,
    config: SessionConfig,
) -> (mpsc::Receiver<CubeEvent>, SessionHandle) {
    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));
    let generation = driver.generation();

    let (write_tx, writer) = spawn_writer(transport.clone());

    let session = Session {
        transport,
        cipher,
        driver,
        events: event_tx,
        backlog: VecDeque::new(),
        writes: write_tx,
        writer,
        connected: connected.clone(),
        debug_raw_data_logging: config.debug_raw_data_logging,
    };
    info!(%generation, "Cube session started");
    tokio::spawn(session.run(transport_events, request_rx, config.initial_commands));

    let handle = SessionHandle {
        requests: request_tx,
        connected,
        generation,
    };
    (event_rx, handle)
}

/// Writes commands one at a time in queue order. Failures are logged and
/// the queue moves on.
fn spawn_writer(
    transport: Arc<dyn CubeTransport>,
) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let handle = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = transport.write_command(data).await {
                warn!(error = %e, "Command write failed");
            }
        }
    });
    (tx, handle)
}

/// Backlog sizes at which a lagging consumer is reported
const BACKLOG_WARN_INTERVAL: usize = 64;

struct Session {
    transport: Arc<dyn CubeTransport>,
    cipher: GanCipher,
    driver: ProtocolDriver,
    events: mpsc::Sender<CubeEvent>,
    /// Events waiting for room in `events`, oldest first
    backlog: VecDeque<CubeEvent>,
    writes: mpsc::UnboundedSender<Vec<u8>>,
    writer: JoinHandle<()>,
    connected: Arc<AtomicBool>,
    debug_raw_data_logging: bool,
}

impl Session {
    async fn run(
        mut self,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        mut requests: mpsc::UnboundedReceiver<SessionRequest>,
        initial_commands: Vec<CubeCommand>,
    ) {
        for command in initial_commands {
            self.send_command(command);
        }

        let mut pending_ack = None;
        let mut requests_open = true;

        loop {
            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(TransportEvent::Notification(data)) => {
                        if self.handle_notification(&data) {
                            break;
                        }
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        info!("Transport reported disconnect");
                        break;
                    }
                },
                request = requests.recv(), if requests_open => match request {
                    Some(SessionRequest::Command(command)) => self.send_command(command),
                    Some(SessionRequest::Disconnect(ack)) => {
                        info!("Disconnect requested by caller");
                        pending_ack = Some(ack);
                        break;
                    }
                    None => requests_open = false,
                },
                // This task is the only sender, so freed capacity stays free
                ready = async { self.events.reserve().await.map(drop) },
                    if !self.backlog.is_empty() => match ready {
                    Ok(()) => self.flush_backlog(),
                    Err(_) => {
                        trace!(dropped = self.backlog.len(), "Event receiver dropped");
                        self.backlog.clear();
                    }
                },
            }
        }

        // Stop accepting requests before the flag flips so late callers see
        // a closed session
        requests.close();
        if pending_ack.is_some() && !self.backlog.is_empty() {
            debug!(dropped = self.backlog.len(), "Discarding undelivered events");
            self.backlog.clear();
        }
        let released = self.release_transport().await;

        // Callers are answered before the final events, which may have to
        // wait for a slow consumer
        if let Some(ack) = pending_ack {
            let _ = ack.send(());
        }
        while let Ok(request) = requests.try_recv() {
            trace!("Discarding request queued during shutdown");
            if let SessionRequest::Disconnect(ack) = request {
                let _ = ack.send(());
            }
        }

        if released {
            self.finish().await;
        }
    }

    /// Returns true when the session must end.
    fn handle_notification(&mut self, data: &[u8]) -> bool {
        let message = match self.cipher.decrypt(data) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, len = data.len(), "Dropping undecryptable notification");
                return false;
            }
        };
        if self.debug_raw_data_logging {
            debug!(raw = %hex::encode(&message), "State notification");
        }

        let outcome = match self.driver.handle_state_event(&message, now_millis()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, raw = %hex::encode(&message), "Dropping malformed notification");
                return false;
            }
        };

        for command in outcome.commands {
            self.write(command);
        }
        for event in outcome.events {
            self.emit(event);
        }
        outcome.disconnect
    }

    fn send_command(&mut self, command: CubeCommand) {
        match self.driver.create_command_message(command) {
            Some(message) => {
                debug!(?command, "Sending command");
                self.write(message);
            }
            None => debug!(?command, generation = %self.driver.generation(), "Command not supported"),
        }
    }

    fn write(&self, message: Vec<u8>) {
        match self.cipher.encrypt(&message) {
            Ok(encrypted) => {
                if self.writes.send(encrypted).is_err() {
                    warn!("Command writer stopped, dropping command");
                }
            }
            Err(e) => warn!(error = %e, "Could not encrypt command"),
        }
    }

    /// Queue an event behind any undelivered ones and push what fits.
    fn emit(&mut self, event: CubeEvent) {
        self.backlog.push_back(event);
        self.flush_backlog();
    }

    fn flush_backlog(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    if self.backlog.len() % BACKLOG_WARN_INTERVAL == 0 {
                        warn!(backlog = self.backlog.len(), "Event consumer is falling behind");
                    }
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("Event receiver dropped");
                    self.backlog.clear();
                    return;
                }
            }
        }
    }

    /// Returns false when the session was already torn down.
    async fn release_transport(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }

        self.writer.abort();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        true
    }

    /// Deliver the backlog and the single `Disconnect`, then close the
    /// event channel.
    async fn finish(mut self) {
        self.backlog.push_back(CubeEvent::Disconnect {
            timestamp: now_millis(),
        });
        for event in self.backlog.drain(..) {
            if self.events.send(event).await.is_err() {
                trace!("Event receiver dropped");
                break;
            }
        }
        info!("Cube session closed");
        // Dropping `self` closes the event channel
    }
}
