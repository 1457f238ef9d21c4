//! Error taxonomy shared by every layer that talks to the backend.
//!
//! Connection-level failures, request outcomes, and wire-format problems are
//! kept apart so callers can tell "the socket is gone" from "the backend said
//! no" from "the backend said something we cannot read".

use std::time::Duration;

/// Socket-level failure.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The endpoint refused (or could not be reached for) a new connection.
    #[error("cannot connect to {endpoint}: {source}")]
    Refused {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// The connection was closed on purpose while the request was pending.
    #[error("connection closed")]
    Closed,
    /// The connection failed while the request was pending.
    #[error("connection lost: {reason}")]
    Lost { reason: String },
    /// No connection has been established.
    #[error("not connected to the backend")]
    NotConnected,
}

/// Wire-format failure: bad framing, bad JSON, or a reply shape we do not
/// understand.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error on backend stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame header exceeds {max} bytes")]
    HeaderTooLong { max: usize },
    #[error("unexpected EOF while reading headers")]
    UnexpectedEof,
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unexpected reply from {target}/{command}: {reason}")]
    UnexpectedReply {
        target: String,
        command: String,
        reason: String,
    },
}

impl ProtocolError {
    /// Whether the stream is still aligned on a frame boundary after this
    /// error. A bad JSON body was fully consumed; bad headers were not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Json(_) | Self::MalformedEnvelope(_))
    }
}

/// The single failure type of a backend request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("{target}/{command} timed out after {} ms", .timeout.as_millis())]
    Timeout {
        target: String,
        command: String,
        timeout: Duration,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Well-formed reply carrying `success == false`.
    #[error("{message}")]
    Backend {
        message: String,
        /// Backend error category (e.g. `module_error`), when reported.
        kind: Option<String>,
    },
}

impl RequestError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Actionable next step for a human reading the status line.
    #[must_use]
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Connection(ConnectionError::Refused { .. } | ConnectionError::NotConnected) => {
                "start the Aura backend service, check the configured endpoint, then reconnect"
            }
            Self::Connection(_) => "reconnect; inspect the backend log if the connection keeps dropping",
            Self::Timeout { .. } => {
                "the backend accepted the connection but did not answer; check that it is not busy or hung, then retry"
            }
            Self::Protocol(_) => {
                "client and backend disagree on the wire format; check that their versions match"
            }
            Self::Backend { .. } => "the request reached the backend but failed; inspect the backend log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_target_and_command() {
        let err = RequestError::Timeout {
            target: "system".into(),
            command: "health_check".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "system/health_check timed out after 5000 ms");
        assert!(err.is_timeout());
        assert!(!err.is_connection());
    }

    #[test]
    fn backend_error_displays_backend_message_verbatim() {
        let err = RequestError::Backend {
            message: "E".into(),
            kind: Some("command_error".into()),
        };
        assert_eq!(err.to_string(), "E");
    }

    #[test]
    fn refused_and_unresponsive_have_distinct_hints() {
        let refused = RequestError::from(ConnectionError::Refused {
            endpoint: "127.0.0.1:5559".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        let silent = RequestError::Timeout {
            target: "system".into(),
            command: "health_check".into(),
            timeout: Duration::from_secs(5),
        };
        assert_ne!(refused.hint(), silent.hint());
        assert!(refused.to_string().contains("127.0.0.1:5559"));
    }

    #[test]
    fn only_body_errors_are_recoverable() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(ProtocolError::Json(json_err).is_recoverable());
        assert!(!ProtocolError::MissingContentLength.is_recoverable());
        assert!(!ProtocolError::UnexpectedEof.is_recoverable());
    }
}
