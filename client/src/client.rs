//! Correlated request/response client.
//!
//! Every outbound command gets a unique id and a pending entry holding a
//! oneshot completion. The session's reader task feeds inbound frames to
//! [`ProtocolClient::dispatch`], which resolves the matching entry, forwards
//! unsolicited events, and answers backend-initiated health probes.
//!
//! Each socket the session opens is a numbered *link*. Pending entries
//! remember the link their frame was written to, so tearing down one link
//! rejects exactly the requests that can no longer be answered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aura_protocol::envelope::{GET_STATUS_COMMAND, HEALTH_CHECK_COMMAND, SYSTEM_TARGET};
use aura_protocol::{
    ConnectionError, Envelope, HealthReport, Incoming, ProtocolError, RequestError, ServiceStatus,
    parse_incoming,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::options::ClientOptions;

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

type Completion = oneshot::Sender<Result<Value, RequestError>>;

struct PendingRequest {
    target: String,
    command: String,
    link: u64,
    created_at: Instant,
    deadline: Instant,
    completion: Completion,
}

struct OutboundLink {
    id: u64,
    tx: mpsc::Sender<WriterCommand>,
}

struct ClientShared {
    options: ClientOptions,
    pending: Mutex<HashMap<String, PendingRequest>>,
    outbound: Mutex<Option<OutboundLink>>,
    event_subscribers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, PendingRequest>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.id);
    }
}

/// Cheap to clone; all clones share one pending table.
#[derive(Clone)]
pub struct ProtocolClient {
    shared: Arc<ClientShared>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("source", &self.shared.options.client_name)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                options,
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                event_subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// Requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        lock(&self.shared.outbound).is_some()
    }

    /// Send a command with the default request timeout.
    pub async fn send(
        &self,
        target: &str,
        command: &str,
        payload: Value,
    ) -> Result<Value, RequestError> {
        self.send_with_timeout(target, command, payload, self.shared.options.request_timeout())
            .await
    }

    /// Send a command and wait for its correlated response.
    ///
    /// Resolves exactly once: with the response payload, a backend failure,
    /// a timeout, or a connection error. The deadline also covers waiting
    /// for room in the writer queue. A response arriving after the timeout
    /// is discarded.
    pub async fn send_with_timeout(
        &self,
        target: &str,
        command: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let (link, writer_tx) = self
            .current_link()
            .ok_or(ConnectionError::NotConnected)?;

        let envelope = Envelope::command(&self.shared.options.client_name, target, command, payload);
        let id = envelope.id.clone();
        let frame = serde_json::to_value(&envelope).map_err(ProtocolError::from)?;

        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        lock(&self.shared.pending).insert(
            id.clone(),
            PendingRequest {
                target: target.to_string(),
                command: command.to_string(),
                link,
                created_at,
                deadline,
                completion: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id: &id,
        };

        tracing::debug!(%id, target, command, "Sending request");
        let exchange = async move {
            if writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
                return Err(RequestError::from(ConnectionError::Closed));
            }
            rx.await
                .unwrap_or_else(|_| Err(RequestError::from(ConnectionError::Closed)))
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    %id,
                    target,
                    command,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Request timed out"
                );
                Err(RequestError::Timeout {
                    target: target.to_string(),
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send `system/health_check` and require a healthy reply.
    pub async fn probe(&self) -> Result<HealthReport, RequestError> {
        let payload = self
            .send_with_timeout(
                SYSTEM_TARGET,
                HEALTH_CHECK_COMMAND,
                Value::Null,
                self.shared.options.health_check_timeout(),
            )
            .await?;
        let report = HealthReport::from_payload(&payload);
        if report.is_healthy() {
            Ok(report)
        } else {
            Err(RequestError::Backend {
                message: format!("backend reported status {:?}", report.status),
                kind: Some("unhealthy".to_string()),
            })
        }
    }

    /// `true` only for a successful, healthy reply within the probe timeout.
    pub async fn health_check(&self) -> bool {
        match self.probe().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Health check failed: {e}");
                false
            }
        }
    }

    pub async fn get_status(&self) -> Result<ServiceStatus, RequestError> {
        let payload = self
            .send(SYSTEM_TARGET, GET_STATUS_COMMAND, Value::Null)
            .await?;
        Ok(ServiceStatus::from_payload(
            SYSTEM_TARGET,
            GET_STATUS_COMMAND,
            &payload,
        )?)
    }

    /// Receive unsolicited `event` envelopes. Dropping the receiver unsubscribes.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.event_subscribers).push(tx);
        rx
    }

    /// Route one inbound frame. Never fails; unreadable frames are logged and dropped.
    pub(crate) fn dispatch(&self, frame: &Value) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring unrecognized frame from backend");
            return;
        };

        match incoming {
            Incoming::Response {
                correlation_id,
                body,
            } => {
                let entry = lock(&self.shared.pending).remove(&correlation_id);
                let Some(entry) = entry else {
                    tracing::debug!(id = %correlation_id, "Discarding response with no pending request");
                    return;
                };

                let now = Instant::now();
                let elapsed_ms =
                    u64::try_from((now - entry.created_at).as_millis()).unwrap_or(u64::MAX);
                let outcome = if now > entry.deadline {
                    tracing::debug!(id = %correlation_id, elapsed_ms, "Response arrived past deadline");
                    Err(RequestError::Timeout {
                        timeout: entry.deadline - entry.created_at,
                        target: entry.target,
                        command: entry.command,
                    })
                } else if body.success {
                    tracing::debug!(
                        id = %correlation_id,
                        target = %entry.target,
                        command = %entry.command,
                        elapsed_ms,
                        "Response received"
                    );
                    Ok(body.payload)
                } else {
                    let message = body.error.unwrap_or_else(|| {
                        format!("{}/{} failed without a message", entry.target, entry.command)
                    });
                    tracing::debug!(
                        id = %correlation_id,
                        target = %entry.target,
                        command = %entry.command,
                        "Backend reported failure: {message}"
                    );
                    Err(RequestError::Backend {
                        message,
                        kind: body.error_kind,
                    })
                };
                let _ = entry.completion.send(outcome);
            }
            Incoming::Event(envelope) => {
                tracing::debug!(source = %envelope.source, "Backend event");
                lock(&self.shared.event_subscribers)
                    .retain(|tx| tx.send(envelope.clone()).is_ok());
            }
            Incoming::HealthProbe { id, source } => {
                let reply = Envelope::response(
                    &self.shared.options.client_name,
                    &source,
                    &id,
                    json!({ "success": true, "status": "healthy" }),
                );
                let outbound = lock(&self.shared.outbound);
                if let Some(link) = outbound.as_ref()
                    && let Ok(frame) = serde_json::to_value(&reply)
                    && link.tx.try_send(WriterCommand::Send(frame)).is_err()
                {
                    tracing::debug!(%id, "Could not queue health probe reply");
                }
            }
        }
    }

    pub(crate) fn attach(&self, link: u64, tx: mpsc::Sender<WriterCommand>) {
        *lock(&self.shared.outbound) = Some(OutboundLink { id: link, tx });
    }

    /// Stop routing new requests to `link`. Returns its writer channel if it was current.
    pub(crate) fn detach(&self, link: u64) -> Option<mpsc::Sender<WriterCommand>> {
        let mut outbound = lock(&self.shared.outbound);
        if outbound.as_ref().is_some_and(|current| current.id == link) {
            outbound.take().map(|current| current.tx)
        } else {
            None
        }
    }

    /// Reject every request written to `link`. Returns how many were rejected.
    pub(crate) fn fail_pending(&self, link: u64, error: impl Fn() -> ConnectionError) -> usize {
        let failed: Vec<PendingRequest> = {
            let mut pending = lock(&self.shared.pending);
            let (failed, kept): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|(_, request)| request.link == link);
            *pending = kept;
            failed.into_values().collect()
        };
        let count = failed.len();
        for request in failed {
            let _ = request.completion.send(Err(error().into()));
        }
        count
    }

    fn current_link(&self) -> Option<(u64, mpsc::Sender<WriterCommand>)> {
        lock(&self.shared.outbound)
            .as_ref()
            .map(|link| (link.id, link.tx.clone()))
    }
}
