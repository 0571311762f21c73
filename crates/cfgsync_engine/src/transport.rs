//! Dual transport: a live push channel with a request/response fallback.
//!
//! The live channel is owned by a supervisor task that connects, pumps
//! inbound frames into a [`TransportEvent`] queue and reconnects with
//! capped backoff when the link drops. The engine observes those events
//! and the [`TransportChannel`] picks the send path from what the engine
//! has observed, not from the supervisor's current state.

use crate::config::{ReconnectConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::http::FallbackPersistence;
use async_trait::async_trait;
use cfgsync_protocol::{
    ClientFrame, ConfigSnapshot, Credentials, FieldUpdate, ServerFrame, UpdateBatch,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected and not trying to.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Live link is up.
    Connected,
    /// Link was lost or an attempt failed; trying again.
    Reconnecting,
}

/// Which path a send would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePath {
    /// The live channel.
    Live,
    /// The request/response fallback.
    Fallback,
}

/// How an update left the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live channel, no acknowledgement.
    Live,
    /// Confirmed by the fallback endpoint.
    Persisted,
}

/// Client side of an established live link.
#[derive(Debug)]
pub struct LiveLink {
    /// Frames to the server.
    pub outbound: mpsc::UnboundedSender<ClientFrame>,
    /// Frames from the server. The link is closed when this yields `None`.
    pub inbound: mpsc::UnboundedReceiver<ServerFrame>,
}

impl LiveLink {
    /// Creates a connected in-memory link and its server side.
    pub fn pair() -> (LiveLink, LivePeer) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        (
            LiveLink {
                outbound: to_server,
                inbound: from_server,
            },
            LivePeer {
                to_client,
                from_client,
            },
        )
    }
}

/// Server side of an in-memory live link.
#[derive(Debug)]
pub struct LivePeer {
    /// Frames to the client. Dropping it closes the link.
    pub to_client: mpsc::UnboundedSender<ServerFrame>,
    /// Frames from the client.
    pub from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl LivePeer {
    /// Sends a frame to the client. Returns false if the client is gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    /// Receives the next frame from the client.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }
}

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct LiveSender {
    connection: u64,
    tx: mpsc::UnboundedSender<ClientFrame>,
}

impl LiveSender {
    /// Wraps the outbound half of connection `connection`.
    pub fn new(connection: u64, tx: mpsc::UnboundedSender<ClientFrame>) -> Self {
        Self { connection, tx }
    }

    /// Connection id.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Returns true if the link has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues a frame. Fire-and-forget; fails only if the link is gone.
    pub fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        self.tx.send(frame).map_err(|e| {
            SyncError::transport_retryable(format!(
                "live link {} closed, dropped {}",
                self.connection,
                e.0.event_name()
            ))
        })
    }
}

/// Something the transport wants the engine to know.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A live connection was established.
    Connected {
        /// Monotonic connection id.
        connection: u64,
        /// Outbound half of the link.
        sender: LiveSender,
    },
    /// A live connection was lost.
    Disconnected {
        /// Id of the lost connection.
        connection: u64,
    },
    /// Authoritative updates from the server.
    RemoteUpdate(UpdateBatch),
    /// Capability snapshot pushed by the server.
    ServerPush(ConfigSnapshot),
    /// The server rejected the credentials of a connection.
    AuthRejected {
        /// Rejected connection.
        connection: u64,
    },
    /// Informational log entry from the server.
    Log(String),
    /// Error reported by the server.
    ServerError(String),
    /// A connection attempt failed.
    TransportError(String),
}

/// Receiving end of the transport event queue.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens live links.
#[async_trait]
pub trait LiveConnector: Send + Sync + 'static {
    /// Connects to `url`.
    async fn connect(&self, url: &str) -> SyncResult<LiveLink>;
}

#[async_trait]
impl<T: LiveConnector + ?Sized> LiveConnector for Arc<T> {
    async fn connect(&self, url: &str) -> SyncResult<LiveLink> {
        (**self).connect(url).await
    }
}

enum Scripted {
    Accept(LiveLink),
    Fail(String),
}

/// A scripted live connector (for testing).
///
/// Each `connect` waits for the next outcome queued through the
/// [`MockConnectorHandle`].
pub struct MockConnector {
    script: Mutex<mpsc::UnboundedReceiver<Scripted>>,
    attempts: Arc<AtomicU32>,
    urls: Arc<parking_lot::Mutex<Vec<String>>>,
}

/// Controls a [`MockConnector`].
#[derive(Clone)]
pub struct MockConnectorHandle {
    script: mpsc::UnboundedSender<Scripted>,
    attempts: Arc<AtomicU32>,
    urls: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl MockConnector {
    /// Creates a connector and its handle.
    pub fn new() -> (Self, MockConnectorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let urls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        (
            Self {
                script: Mutex::new(rx),
                attempts: Arc::clone(&attempts),
                urls: Arc::clone(&urls),
            },
            MockConnectorHandle {
                script: tx,
                attempts,
                urls,
            },
        )
    }
}

impl MockConnectorHandle {
    /// Lets the next attempt succeed and returns the server side.
    pub fn accept(&self) -> LivePeer {
        let (link, peer) = LiveLink::pair();
        let _ = self.script.send(Scripted::Accept(link));
        peer
    }

    /// Lets the next attempt fail.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.script.send(Scripted::Fail(message.into()));
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// URLs passed to `connect`.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(&self, url: &str) -> SyncResult<LiveLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        match self.script.lock().await.recv().await {
            Some(Scripted::Accept(link)) => Ok(link),
            Some(Scripted::Fail(message)) => Err(SyncError::transport_retryable(message)),
            None => Err(SyncError::transport_retryable("connector script closed")),
        }
    }
}

/// Owns the live session and the fallback path.
pub struct TransportChannel<C: LiveConnector, F: FallbackPersistence> {
    connector: Arc<C>,
    fallback: F,
    url: String,
    reconnect: ReconnectConfig,
    request_timeout: Duration,
    session: Arc<RwLock<SessionState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    live: Option<LiveSender>,
    connection: u64,
    shutdown: watch::Sender<bool>,
    supervisor: Option<JoinHandle<()>>,
}

impl<C: LiveConnector, F: FallbackPersistence> TransportChannel<C, F> {
    /// Creates a disconnected channel and the queue its events arrive on.
    pub fn new(connector: C, fallback: F, config: &SyncConfig) -> (Self, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let channel = Self {
            connector: Arc::new(connector),
            fallback,
            url: config.live_url(),
            reconnect: config.reconnect.clone(),
            request_timeout: config.request_timeout,
            session: Arc::new(RwLock::new(SessionState::Disconnected)),
            events,
            live: None,
            connection: 0,
            shutdown,
            supervisor: None,
        };
        (channel, rx)
    }

    /// Live channel URL.
    pub fn live_url(&self) -> &str {
        &self.url
    }

    /// Current state of the live session.
    pub fn session_state(&self) -> SessionState {
        *self.session.read()
    }

    /// Path the next send would take.
    pub fn active_path(&self) -> ActivePath {
        match self.live {
            Some(_) => ActivePath::Live,
            None => ActivePath::Fallback,
        }
    }

    /// Id of the latest observed connection, 0 before the first.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// The fallback persistence.
    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// Starts the live channel supervisor. Does nothing if it is running.
    pub fn connect(&mut self) {
        if let Some(task) = &self.supervisor {
            if !task.is_finished() && !*self.shutdown.borrow() {
                return;
            }
            task.abort();
        }
        self.shutdown.send_replace(false);
        let supervisor = Supervisor {
            connector: Arc::clone(&self.connector),
            url: self.url.clone(),
            reconnect: self.reconnect.clone(),
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            shutdown: self.shutdown.subscribe(),
            connection: self.connection,
        };
        self.supervisor = Some(tokio::spawn(supervisor.run()));
    }

    /// Records an event in the channel's view of the session.
    ///
    /// Returns false for events about a connection that has been superseded.
    pub fn observe(&mut self, event: &TransportEvent) -> bool {
        match event {
            TransportEvent::Connected { connection, sender } => {
                if *connection < self.connection {
                    return false;
                }
                self.connection = *connection;
                self.live = Some(sender.clone());
                true
            }
            TransportEvent::Disconnected { connection } => {
                if *connection != self.connection {
                    debug!(connection, current = self.connection, "ignoring stale disconnect");
                    return false;
                }
                self.live = None;
                true
            }
            TransportEvent::AuthRejected { connection } => {
                if *connection != self.connection {
                    return false;
                }
                // The session stays up for pushes but no longer carries writes.
                self.live = None;
                true
            }
            _ => true,
        }
    }

    /// Sends one update over the active path.
    pub async fn send(&mut self, update: &FieldUpdate) -> SyncResult<Delivery> {
        self.send_batch(&UpdateBatch::single(update.clone())).await
    }

    /// Sends a batch over the active path.
    ///
    /// A live send that fails drops the live path and retries the same
    /// batch over the fallback.
    pub async fn send_batch(&mut self, batch: &UpdateBatch) -> SyncResult<Delivery> {
        if let Some(live) = &self.live {
            match live.send(ClientFrame::Message(batch.clone())) {
                Ok(()) => return Ok(Delivery::Live),
                Err(err) => {
                    warn!(error = %err, "live send failed, using fallback");
                    self.live = None;
                }
            }
        }

        tokio::time::timeout(self.request_timeout, self.fallback.write(batch))
            .await
            .map_err(|_| SyncError::Timeout)??;
        Ok(Delivery::Persisted)
    }

    /// Sends credentials on the live link.
    pub fn send_auth(&self, credentials: Credentials) -> SyncResult<()> {
        match &self.live {
            Some(live) => live.send(ClientFrame::Auth(credentials)),
            None => Err(SyncError::NotConnected),
        }
    }

    /// Reads the full configuration over the fallback path.
    pub async fn read_snapshot(&self) -> SyncResult<ConfigSnapshot> {
        tokio::time::timeout(self.request_timeout, self.fallback.read_snapshot())
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    /// Tears down the live channel. It stays down until `connect` is called again.
    pub fn close(&mut self) {
        self.shutdown.send_replace(true);
        self.live = None;
        *self.session.write() = SessionState::Disconnected;
        info!(url = %self.url, "live channel closed");
    }
}

impl<C: LiveConnector, F: FallbackPersistence> Drop for TransportChannel<C, F> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct Supervisor<C: LiveConnector> {
    connector: Arc<C>,
    url: String,
    reconnect: ReconnectConfig,
    session: Arc<RwLock<SessionState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
    connection: u64,
}

impl<C: LiveConnector> Supervisor<C> {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut first = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.set_state(if first {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            });
            first = false;

            let attempt = tokio::select! {
                _ = stopped(&mut self.shutdown) => break,
                result = self.connector.connect(&self.url) => result,
            };

            match attempt {
                Ok(link) => {
                    failures = 0;
                    self.connection += 1;
                    let connection = self.connection;
                    self.set_state(SessionState::Connected);
                    info!(connection, url = %self.url, "live channel connected");

                    let LiveLink { outbound, mut inbound } = link;
                    let sender = LiveSender::new(connection, outbound);
                    if self
                        .events
                        .send(TransportEvent::Connected { connection, sender })
                        .is_err()
                    {
                        break;
                    }

                    if self.pump(connection, &mut inbound).await {
                        break;
                    }

                    warn!(connection, "live channel lost");
                    self.set_state(SessionState::Reconnecting);
                    if self
                        .events
                        .send(TransportEvent::Disconnected { connection })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(failures, error = %err, "live channel connect failed");
                    let _ = self.events.send(TransportEvent::TransportError(err.to_string()));

                    if !self.reconnect.allows_attempt(failures) {
                        info!(failures, "giving up on live channel");
                        break;
                    }
                }
            }

            let delay = self.reconnect.delay_for_attempt(failures);
            if !delay.is_zero() {
                debug!(?delay, "waiting before reconnect");
                tokio::select! {
                    _ = stopped(&mut self.shutdown) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.set_state(SessionState::Disconnected);
    }

    /// Forwards inbound frames until the link closes. Returns true on shutdown.
    async fn pump(
        &mut self,
        connection: u64,
        inbound: &mut mpsc::UnboundedReceiver<ServerFrame>,
    ) -> bool {
        loop {
            let frame = tokio::select! {
                _ = stopped(&mut self.shutdown) => return true,
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                return false;
            };

            debug!(connection, event = frame.event_name(), "inbound frame");
            let event = match frame {
                ServerFrame::Reject => TransportEvent::AuthRejected { connection },
                ServerFrame::Config(snapshot) => TransportEvent::ServerPush(snapshot),
                ServerFrame::Message(batch) => TransportEvent::RemoteUpdate(batch),
                ServerFrame::Log(entry) => TransportEvent::Log(entry),
                ServerFrame::Err(message) => TransportEvent::ServerError(message),
            };
            if self.events.send(event).is_err() {
                return true;
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.session.write() = state;
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
