//! The envelope exchanged with the backend, and inbound frame classification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target reserved for service-level commands.
pub const SYSTEM_TARGET: &str = "system";

/// Command answered by the `system` target with a liveness report.
pub const HEALTH_CHECK_COMMAND: &str = "health_check";

/// Command answered by the `system` target with module health and stats.
pub const GET_STATUS_COMMAND: &str = "get_status";

/// Process-wide counter; ids stay unique across clients and reconnects.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Command,
    Response,
    Event,
    HealthCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Build a command envelope with a fresh id.
    ///
    /// `command` is merged into the payload under the `command` key; a
    /// non-object payload is nested under `data`.
    #[must_use]
    pub fn command(source: &str, target: &str, command: &str, payload: Value) -> Self {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert("command".to_string(), Value::String(command.to_string()));

        Self {
            id: next_envelope_id(source),
            kind: EnvelopeKind::Command,
            source: source.to_string(),
            target: target.to_string(),
            timestamp: now_millis(),
            payload: Value::Object(body),
            correlation_id: None,
        }
    }

    /// Build a successful response to `request_id`.
    #[must_use]
    pub fn response(source: &str, target: &str, request_id: &str, payload: Value) -> Self {
        Self {
            id: next_envelope_id(source),
            kind: EnvelopeKind::Response,
            source: source.to_string(),
            target: target.to_string(),
            timestamp: now_millis(),
            payload,
            correlation_id: Some(request_id.to_string()),
        }
    }

    /// The `command` field of the payload, if any.
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.payload.get("command").and_then(Value::as_str)
    }
}

/// Generate `<source>_<counter>_<unix-millis>`.
#[must_use]
pub fn next_envelope_id(source: &str) -> String {
    let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{source}_{n}_{}", now_millis())
}

#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Normalized body of a response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub success: bool,
    /// Result payload with the `success`/`error` bookkeeping keys removed.
    pub payload: Value,
    pub error: Option<String>,
    /// Backend error category (`module_error`, `command_error`, ...).
    pub error_kind: Option<String>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        correlation_id: String,
        body: ResponseBody,
    },
    Event(Envelope),
    /// Liveness probe initiated by the backend.
    HealthProbe { id: String, source: String },
}

/// Classify an inbound frame.
///
/// The backend answers in one of two shapes: a full envelope whose payload
/// carries `success`, or the flat `{success, type, error, payload}` form in
/// which `type` is either `"response"` or an error category. Returns `None`
/// for frames that fit neither.
///
/// Responses are matched by `correlation_id`, falling back to `id`, so the
/// backend must echo one of them. A flat reply carrying neither is dropped.
#[must_use]
pub fn parse_incoming(frame: &Value) -> Option<Incoming> {
    let obj = frame.as_object()?;
    let kind = obj.get("type").and_then(Value::as_str);
    let correlation_id = obj
        .get("correlation_id")
        .and_then(Value::as_str)
        .or_else(|| obj.get("id").and_then(Value::as_str))
        .map(String::from);

    match kind {
        Some("event") => serde_json::from_value(frame.clone()).ok().map(Incoming::Event),
        Some("health_check") => Some(Incoming::HealthProbe {
            id: correlation_id?,
            source: obj
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        Some("command") => None,
        _ => {
            let correlation_id = correlation_id?;
            if let Some(success) = obj.get("success").and_then(Value::as_bool) {
                // Flat shape: `type` doubles as the error category.
                let error_kind = kind.filter(|k| *k != "response").map(String::from);
                let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
                return Some(Incoming::Response {
                    correlation_id,
                    body: ResponseBody {
                        success,
                        payload: strip_bookkeeping(payload),
                        error: obj.get("error").and_then(Value::as_str).map(String::from),
                        error_kind,
                    },
                });
            }
            if kind != Some("response") {
                return None;
            }
            let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
            let success = payload
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let error = payload
                .get("error")
                .and_then(Value::as_str)
                .map(String::from);
            let error_kind = payload
                .get("error_type")
                .and_then(Value::as_str)
                .map(String::from);
            Some(Incoming::Response {
                correlation_id,
                body: ResponseBody {
                    success,
                    payload: strip_bookkeeping(payload),
                    error,
                    error_kind,
                },
            })
        }
    }
}

fn strip_bookkeeping(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.remove("success");
            map.remove("error");
            map.remove("error_type");
            Value::Object(map)
        }
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_serializes_kind_as_type() {
        let env = Envelope::command("editor", "system", "health_check", Value::Null);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["target"], "system");
        assert_eq!(json["payload"]["command"], "health_check");
        assert!(
            json.get("correlation_id").is_none(),
            "correlation_id must be omitted, not null"
        );
    }

    #[test]
    fn command_merges_object_payload() {
        let env = Envelope::command(
            "editor",
            "python_intelligence",
            "analyze_file",
            json!({"file_path": "/w/a.py"}),
        );
        assert_eq!(env.payload["file_path"], "/w/a.py");
        assert_eq!(env.command_name(), Some("analyze_file"));
    }

    #[test]
    fn command_nests_scalar_payload() {
        let env = Envelope::command("editor", "t", "c", json!(42));
        assert_eq!(env.payload["data"], 42);
    }

    #[test]
    fn ids_are_unique_and_carry_source() {
        let a = next_envelope_id("editor");
        let b = next_envelope_id("editor");
        assert_ne!(a, b);
        assert!(a.starts_with("editor_"));
        assert_eq!(a.split('_').count(), 3);
    }

    #[test]
    fn health_check_kind_round_trips() {
        let json = json!({"id": "x", "type": "health_check"});
        let env: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(env.kind, EnvelopeKind::HealthCheck);
    }

    #[test]
    fn envelope_response_strips_success_flag() {
        let frame = json!({
            "id": "backend_9",
            "type": "response",
            "correlation_id": "editor_1_1",
            "payload": {"success": true, "x": 1}
        });
        let Some(Incoming::Response {
            correlation_id,
            body,
        }) = parse_incoming(&frame)
        else {
            panic!("expected response");
        };
        assert_eq!(correlation_id, "editor_1_1");
        assert!(body.success);
        assert_eq!(body.payload, json!({"x": 1}));
    }

    #[test]
    fn envelope_response_without_success_is_failure() {
        let frame = json!({
            "id": "editor_1_1",
            "type": "response",
            "payload": {"x": 1}
        });
        let Some(Incoming::Response { body, .. }) = parse_incoming(&frame) else {
            panic!("expected response");
        };
        assert!(!body.success);
        assert_eq!(body.error, None);
    }

    #[test]
    fn flat_error_reply_uses_type_as_error_kind() {
        let frame = json!({
            "id": "editor_2_1",
            "success": false,
            "type": "module_error",
            "error": "LLM provider module not available",
            "payload": {}
        });
        let Some(Incoming::Response { body, .. }) = parse_incoming(&frame) else {
            panic!("expected response");
        };
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("LLM provider module not available"));
        assert_eq!(body.error_kind.as_deref(), Some("module_error"));
    }

    #[test]
    fn flat_success_reply_returns_inner_payload() {
        let frame = json!({
            "id": "editor_3_1",
            "success": true,
            "type": "response",
            "payload": {"status": "healthy"}
        });
        let Some(Incoming::Response { body, .. }) = parse_incoming(&frame) else {
            panic!("expected response");
        };
        assert!(body.success);
        assert_eq!(body.error_kind, None);
        assert_eq!(body.payload, json!({"status": "healthy"}));
    }

    #[test]
    fn correlation_id_preferred_over_id() {
        let frame = json!({
            "id": "backend_77",
            "correlation_id": "editor_5_1",
            "type": "response",
            "payload": {"success": true}
        });
        let Some(Incoming::Response { correlation_id, .. }) = parse_incoming(&frame) else {
            panic!("expected response");
        };
        assert_eq!(correlation_id, "editor_5_1");
    }

    #[test]
    fn flat_reply_without_id_cannot_be_matched() {
        let frame = json!({
            "success": true,
            "type": "response",
            "payload": {"status": "healthy"}
        });
        assert_eq!(parse_incoming(&frame), None);
    }

    #[test]
    fn event_frames_are_classified() {
        let frame = json!({
            "id": "backend_1",
            "type": "event",
            "source": "aura",
            "target": "editor",
            "timestamp": 1,
            "payload": {"progress": 0.5}
        });
        assert!(matches!(parse_incoming(&frame), Some(Incoming::Event(_))));
    }

    #[test]
    fn backend_health_probe_is_classified() {
        let frame = json!({"id": "backend_4", "type": "health_check", "source": "aura"});
        assert_eq!(
            parse_incoming(&frame),
            Some(Incoming::HealthProbe {
                id: "backend_4".into(),
                source: "aura".into()
            })
        );
    }

    #[test]
    fn unusable_frames_are_rejected() {
        assert_eq!(parse_incoming(&json!("text")), None);
        assert_eq!(parse_incoming(&json!({"type": "response"})), None);
        assert_eq!(parse_incoming(&json!({"id": "a", "type": "command"})), None);
        assert_eq!(parse_incoming(&json!({"id": "a", "type": "mystery"})), None);
    }
}
