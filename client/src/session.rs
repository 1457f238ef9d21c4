//! Transport session: owns the socket, its reader and writer tasks, and the
//! observable connection status.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aura_protocol::codec::{FrameReader, FrameWriter};
use aura_protocol::{ConnectionError, HealthReport, RequestError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{ProtocolClient, WriterCommand};
use crate::transport::{BoxReader, BoxWriter, Connector, Endpoint, SocketConnector};

const WRITER_CHANNEL_CAPACITY: usize = 64;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Connected, Connecting, Disconnected, Error};
        matches!(
            (self, next),
            (Disconnected | Error, Connecting)
                | (Connecting, Connected | Error)
                | (Connected, Disconnected | Error)
                | (Error, Disconnected)
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Delivered to every status observer, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

/// What the editor's status line shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ConnectionStatus,
    pub endpoint: Endpoint,
    /// Most recent failure, kept until the next successful connect.
    pub detail: Option<String>,
    pub hint: Option<&'static str>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aura {} ({})", self.status, self.endpoint)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        if let Some(hint) = self.hint {
            write!(f, "\n  next: {hint}")?;
        }
        Ok(())
    }
}

struct Failure {
    detail: String,
    hint: &'static str,
}

struct StatusState {
    status: ConnectionStatus,
    /// Link the status currently describes; `0` when none.
    link: u64,
    failure: Option<Failure>,
    observers: Vec<mpsc::UnboundedSender<StatusChange>>,
}

struct StatusBoard {
    state: Mutex<StatusState>,
}

impl StatusBoard {
    fn new() -> Self {
        Self {
            state: Mutex::new(StatusState {
                status: ConnectionStatus::Disconnected,
                link: 0,
                failure: None,
                observers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> ConnectionStatus {
        self.lock().status
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().observers.push(tx);
        rx
    }

    fn apply(state: &mut StatusState, to: ConnectionStatus) -> bool {
        let from = state.status;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(%from, %to, "Rejected connection status transition");
            return false;
        }
        state.status = to;
        if to == ConnectionStatus::Connected {
            state.failure = None;
        }
        tracing::info!(%from, %to, "Connection status changed");
        let change = StatusChange { from, to };
        state.observers.retain(|tx| tx.send(change).is_ok());
        true
    }

    fn begin_link(&self, link: u64) -> bool {
        let mut state = self.lock();
        state.link = link;
        Self::apply(&mut state, ConnectionStatus::Connecting)
    }

    /// Settle a handshake, unless the link died or was replaced meanwhile.
    fn finish_link(&self, link: u64, to: ConnectionStatus) -> bool {
        let mut state = self.lock();
        if state.link != link || state.status != ConnectionStatus::Connecting {
            return false;
        }
        Self::apply(&mut state, to)
    }

    fn link_lost(&self, link: u64, error: &RequestError) -> bool {
        let mut state = self.lock();
        if state.link != link {
            return false;
        }
        let changed = Self::apply(&mut state, ConnectionStatus::Error);
        if changed {
            state.failure = Some(Failure::from(error));
        }
        changed
    }

    fn record_failure(&self, error: &RequestError) {
        self.lock().failure = Some(Failure::from(error));
    }

    fn report(&self, endpoint: Endpoint) -> StatusReport {
        let state = self.lock();
        let failure = state
            .failure
            .as_ref()
            .filter(|_| state.status != ConnectionStatus::Connected);
        StatusReport {
            status: state.status,
            endpoint,
            detail: failure.map(|f| f.detail.clone()),
            hint: failure.map(|f| f.hint),
        }
    }

    fn close(&self) -> bool {
        let mut state = self.lock();
        state.link = 0;
        Self::apply(&mut state, ConnectionStatus::Disconnected)
    }
}

impl From<&RequestError> for Failure {
    fn from(error: &RequestError) -> Self {
        Self {
            detail: error.to_string(),
            hint: error.hint(),
        }
    }
}

struct Link {
    id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct LinkSlot {
    endpoint: Endpoint,
    last_link: u64,
    link: Option<Link>,
}

/// One logical connection to the backend.
///
/// `connect`, `disconnect`, and `update_endpoint` are serialized; requests go
/// through [`Session::client`] and never wait on them.
pub struct Session {
    client: ProtocolClient,
    connector: Arc<dyn Connector>,
    status: Arc<StatusBoard>,
    slot: tokio::sync::Mutex<LinkSlot>,
}

impl Session {
    #[must_use]
    pub fn new(endpoint: Endpoint, client: ProtocolClient, connector: Arc<dyn Connector>) -> Self {
        Self {
            client,
            connector,
            status: Arc::new(StatusBoard::new()),
            slot: tokio::sync::Mutex::new(LinkSlot {
                endpoint,
                last_link: 0,
                link: None,
            }),
        }
    }

    /// Session over TCP or a Unix socket.
    #[must_use]
    pub fn with_socket(endpoint: Endpoint, client: ProtocolClient) -> Self {
        Self::new(endpoint, client, Arc::new(SocketConnector))
    }

    #[must_use]
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.current()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Observe every status transition from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChange> {
        self.status.subscribe()
    }

    pub async fn endpoint(&self) -> Endpoint {
        self.slot.lock().await.endpoint.clone()
    }

    /// Status, last failure, and a next step for the user.
    pub async fn report(&self) -> StatusReport {
        let endpoint = self.endpoint().await;
        self.status.report(endpoint)
    }

    /// Open the socket and verify liveness with a health check.
    ///
    /// A no-op when already connected. On failure the status is `Error` and
    /// the socket is closed.
    pub async fn connect(&self) -> Result<(), RequestError> {
        let mut slot = self.slot.lock().await;
        self.connect_locked(&mut slot).await.map(|_| ())
    }

    /// Close the socket and reject in-flight requests. Idempotent.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        self.disconnect_locked(&mut slot).await;
    }

    /// Switch endpoints, reconnecting when currently connected.
    pub async fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), RequestError> {
        let mut slot = self.slot.lock().await;
        if slot.endpoint == endpoint {
            return Ok(());
        }
        let was_connected = self.is_connected();
        if was_connected {
            self.disconnect_locked(&mut slot).await;
        }
        tracing::info!(from = %slot.endpoint, to = %endpoint, "Backend endpoint updated");
        slot.endpoint = endpoint;
        if was_connected {
            self.connect_locked(&mut slot).await.map(|_| ())
        } else {
            Ok(())
        }
    }

    async fn connect_locked(
        &self,
        slot: &mut LinkSlot,
    ) -> Result<Option<HealthReport>, RequestError> {
        if slot.link.is_some() && self.is_connected() {
            return Ok(None);
        }
        // Left behind by a link that died on its own.
        if let Some(stale) = slot.link.take() {
            self.teardown(stale).await;
        }

        slot.last_link += 1;
        let link_id = slot.last_link;
        self.status.begin_link(link_id);
        tracing::info!(endpoint = %slot.endpoint, "Connecting to backend");

        let (reader, writer) = match self.connector.connect(&slot.endpoint).await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!("{e}");
                let e = RequestError::from(e);
                self.status.record_failure(&e);
                self.status.finish_link(link_id, ConnectionStatus::Error);
                return Err(e);
            }
        };
        let link = self.spawn_link(link_id, reader, writer);

        match self.client.probe().await {
            Ok(report) => {
                if self.status.finish_link(link_id, ConnectionStatus::Connected) {
                    tracing::info!(
                        endpoint = %slot.endpoint,
                        modules_loaded = report.modules_loaded,
                        "Connected to backend"
                    );
                    slot.link = Some(link);
                    Ok(Some(report))
                } else {
                    self.teardown(link).await;
                    let e = RequestError::from(ConnectionError::Lost {
                        reason: "connection dropped during handshake".to_string(),
                    });
                    self.status.record_failure(&e);
                    Err(e)
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %slot.endpoint, "Backend failed health check: {e}");
                self.teardown(link).await;
                self.status.record_failure(&e);
                self.status.finish_link(link_id, ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    async fn disconnect_locked(&self, slot: &mut LinkSlot) {
        self.status.close();
        if let Some(link) = slot.link.take() {
            self.teardown(link).await;
            tracing::info!(endpoint = %slot.endpoint, "Disconnected from backend");
        }
    }

    fn spawn_link(&self, link_id: u64, reader: BoxReader, writer: BoxWriter) -> Link {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_client = self.client.clone();
        let writer_status = Arc::clone(&self.status);
        let writer = tokio::spawn(async move {
            let mut frames = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = frames.write_frame(&frame).await {
                            tracing::warn!("Backend write error: {e}");
                            link_lost(&writer_client, &writer_status, link_id, &e.to_string());
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        self.client.attach(link_id, writer_tx);

        let reader_client = self.client.clone();
        let reader_status = Arc::clone(&self.status);
        let reader = tokio::spawn(async move {
            let mut frames = FrameReader::new(reader);
            let reason = loop {
                match frames.read_frame().await {
                    Ok(Some(frame)) => reader_client.dispatch(&frame),
                    Ok(None) => break "backend closed the connection".to_string(),
                    Err(e) if e.is_recoverable() => {
                        tracing::debug!("Skipping unreadable frame: {e}");
                    }
                    Err(e) => {
                        tracing::warn!("Backend read error: {e}");
                        break e.to_string();
                    }
                }
            };
            link_lost(&reader_client, &reader_status, link_id, &reason);
        });

        Link {
            id: link_id,
            reader,
            writer,
        }
    }

    async fn teardown(&self, link: Link) {
        if let Some(tx) = self.client.detach(link.id) {
            let _ = tx.try_send(WriterCommand::Shutdown);
        }
        let rejected = self.client.fail_pending(link.id, || ConnectionError::Closed);
        if rejected > 0 {
            tracing::debug!(rejected, "Rejected in-flight requests on close");
        }
        link.reader.abort();
        let mut writer = link.writer;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock()
            && let Some(link) = slot.link.take()
        {
            self.client.detach(link.id);
            self.client.fail_pending(link.id, || ConnectionError::Closed);
            link.reader.abort();
            link.writer.abort();
        }
    }
}

fn link_lost(client: &ProtocolClient, status: &StatusBoard, link_id: u64, reason: &str) {
    client.detach(link_id);
    let lost = || ConnectionError::Lost {
        reason: reason.to_string(),
    };
    let rejected = client.fail_pending(link_id, lost);
    if status.link_lost(link_id, &RequestError::from(lost())) {
        tracing::warn!(rejected, "Backend connection lost: {reason}");
    }
}
