//! Typed views of backend reply payloads.
//!
//! Each known target/command pair decodes into its own [`Reply`] variant.
//! Unknown pairs pass through as [`Reply::Opaque`] so new backend commands
//! keep working before the client learns about them.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::envelope::{GET_STATUS_COMMAND, HEALTH_CHECK_COMMAND, SYSTEM_TARGET};
use crate::error::ProtocolError;

pub const ANALYSIS_TARGET: &str = "python_intelligence";
pub const ANALYZE_FILE_COMMAND: &str = "analyze_file";
pub const LLM_TARGET: &str = "llm_provider";
pub const GENERATE_COMMAND: &str = "generate";
pub const GIT_TARGET: &str = "git_semantic";
pub const GENERATE_COMMIT_COMMAND: &str = "generate_commit";
pub const TEST_TARGET: &str = "test_generator";
pub const GENERATE_TESTS_COMMAND: &str = "generate_tests";
pub const REFACTORING_TARGET: &str = "refactoring_engine";
pub const REFACTORING_COMMAND: &str = "analyze_refactoring_opportunities";

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Health(HealthReport),
    Status(ServiceStatus),
    Analysis(FileAnalysis),
    Completion(Completion),
    Commit(CommitSuggestion),
    TestSuite(Value),
    Refactoring(Vec<Value>),
    Opaque {
        target: String,
        command: String,
        payload: Value,
    },
}

impl Reply {
    /// Decode the payload of a successful reply to `target`/`command`.
    pub fn decode(target: &str, command: &str, payload: Value) -> Result<Self, ProtocolError> {
        let reply = match (target, command) {
            (SYSTEM_TARGET, HEALTH_CHECK_COMMAND) => {
                Self::Health(HealthReport::from_payload(&payload))
            }
            (SYSTEM_TARGET, GET_STATUS_COMMAND) => {
                Self::Status(ServiceStatus::from_payload(target, command, &payload)?)
            }
            (ANALYSIS_TARGET, ANALYZE_FILE_COMMAND) => {
                Self::Analysis(FileAnalysis::from_payload(target, command, &payload)?)
            }
            (LLM_TARGET, GENERATE_COMMAND) => {
                Self::Completion(Completion::from_payload(target, command, &payload)?)
            }
            (GIT_TARGET, GENERATE_COMMIT_COMMAND) => {
                Self::Commit(CommitSuggestion::from_payload(target, command, &payload)?)
            }
            (TEST_TARGET, GENERATE_TESTS_COMMAND) => Self::TestSuite(
                payload
                    .get("test_suite")
                    .cloned()
                    .ok_or_else(|| unexpected(target, command, "missing `test_suite`"))?,
            ),
            (REFACTORING_TARGET, REFACTORING_COMMAND) => Self::Refactoring(
                payload
                    .get("refactoring_actions")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| unexpected(target, command, "missing `refactoring_actions`"))?,
            ),
            _ => Self::Opaque {
                target: target.to_string(),
                command: command.to_string(),
                payload,
            },
        };
        Ok(reply)
    }
}

fn unexpected(target: &str, command: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::UnexpectedReply {
        target: target.to_string(),
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// `system/health_check` reply. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthReport {
    pub status: String,
    pub modules_loaded: u64,
    pub uptime: f64,
    pub requests_processed: u64,
}

impl HealthReport {
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }

    /// A reply without a status string counts as healthy; the backend
    /// answered with `success: true`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.is_empty() || self.status == "healthy"
    }
}

/// `system/get_status` reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceStatus {
    pub service_running: bool,
    pub modules_health: BTreeMap<String, bool>,
    pub stats: Value,
}

impl ServiceStatus {
    pub fn from_payload(target: &str, command: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let status = payload
            .get("status")
            .ok_or_else(|| unexpected(target, command, "missing `status`"))?;
        serde_json::from_value(status.clone()).map_err(|e| unexpected(target, command, e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisMetrics {
    pub lines_of_code: u64,
    pub functions_count: u64,
    pub classes_count: u64,
}

/// `python_intelligence/analyze_file` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAnalysis {
    pub file_path: String,
    pub elements: Vec<Value>,
    pub metrics: AnalysisMetrics,
    pub issues: Vec<Issue>,
    /// Issue records that were not objects and could not be read at all.
    pub dropped_issues: usize,
}

impl FileAnalysis {
    pub fn from_payload(target: &str, command: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let analysis = payload
            .get("analysis")
            .and_then(Value::as_object)
            .ok_or_else(|| unexpected(target, command, "missing `analysis` object"))?;

        let mut issues = Vec::new();
        let mut dropped_issues = 0;
        for raw in analysis
            .get("issues")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            match Issue::from_value(raw) {
                Some(issue) => issues.push(issue),
                None => dropped_issues += 1,
            }
        }
        if dropped_issues > 0 {
            tracing::debug!(dropped = dropped_issues, "Skipped unreadable issue records");
        }

        Ok(Self {
            file_path: analysis
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            elements: analysis
                .get("elements")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            metrics: analysis
                .get("metrics")
                .cloned()
                .and_then(|m| serde_json::from_value(m).ok())
                .unwrap_or_default(),
            issues,
            dropped_issues,
        })
    }
}

/// A backend-reported problem in a resource.
///
/// Read leniently: any missing or mistyped field falls back to a default so
/// one bad field never hides the rest of the analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// 1-based line as reported by the backend (may be zero or negative).
    pub line: i64,
    pub column: Option<i64>,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Issue {
    /// Returns `None` only when the record is not a JSON object.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(String::from);
        let number = |key: &str| {
            obj.get(key).and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_f64().map(|f| f as i64))
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
        };

        Some(Self {
            line: number("line").unwrap_or(0),
            column: number("column"),
            kind: text("kind")
                .or_else(|| text("type"))
                .unwrap_or_else(|| "issue".to_string()),
            severity: text("severity").unwrap_or_default(),
            message: text("message").unwrap_or_else(|| "(no message)".to_string()),
            suggestion: text("suggestion"),
        })
    }
}

/// `llm_provider/generate` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
}

impl Completion {
    pub fn from_payload(target: &str, command: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let response = payload
            .get("response")
            .ok_or_else(|| unexpected(target, command, "missing `response`"))?;
        let content = response
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| response.as_str())
            .ok_or_else(|| unexpected(target, command, "missing `response.content`"))?;
        Ok(Self {
            content: content.to_string(),
        })
    }
}

/// `git_semantic/generate_commit` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSuggestion {
    pub message: String,
    /// Conventional-commit type (`feat`, `fix`, ...), when reported.
    pub kind: Option<String>,
    pub scope: Option<String>,
    pub raw: Value,
}

impl CommitSuggestion {
    pub fn from_payload(target: &str, command: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let raw = payload
            .get("commit")
            .cloned()
            .ok_or_else(|| unexpected(target, command, "missing `commit`"))?;

        if let Some(message) = raw.as_str() {
            return Ok(Self {
                message: message.to_string(),
                kind: None,
                scope: None,
                raw,
            });
        }

        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let message = text("message")
            .or_else(|| {
                text("subject").map(|subject| match text("body") {
                    Some(body) => format!("{subject}\n\n{body}"),
                    None => subject,
                })
            })
            .or_else(|| text("description"))
            .ok_or_else(|| unexpected(target, command, "commit has no message"))?;

        Ok(Self {
            message,
            kind: text("type"),
            scope: text("scope"),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_reply_decodes_with_defaults() {
        let reply = Reply::decode("system", "health_check", json!({"status": "healthy"})).unwrap();
        let Reply::Health(report) = reply else {
            panic!("expected health reply");
        };
        assert!(report.is_healthy());
        assert_eq!(report.modules_loaded, 0);
    }

    #[test]
    fn unhealthy_status_is_reported() {
        let report = HealthReport::from_payload(&json!({"status": "degraded"}));
        assert!(!report.is_healthy());
    }

    #[test]
    fn status_reply_reads_module_health() {
        let payload = json!({
            "status": {
                "service_running": true,
                "modules_health": {"llm_provider": false, "python_intelligence": true},
                "stats": {"requests_processed": 3}
            }
        });
        let Reply::Status(status) = Reply::decode("system", "get_status", payload).unwrap() else {
            panic!("expected status reply");
        };
        assert!(status.service_running);
        assert_eq!(status.modules_health.get("llm_provider"), Some(&false));
    }

    #[test]
    fn analysis_reply_keeps_good_issues_and_counts_bad_ones() {
        let payload = json!({
            "analysis": {
                "file_path": "/w/a.py",
                "elements": [],
                "metrics": {"lines_of_code": 12, "functions_count": 2, "classes_count": 0},
                "issues": [
                    {"line": 3, "type": "missing_docstring", "severity": "warning", "message": "no docstring"},
                    "garbage",
                    {"line": "7", "column": 4.0, "severity": "ERROR", "message": "bad"}
                ]
            }
        });
        let analysis = FileAnalysis::from_payload("python_intelligence", "analyze_file", &payload).unwrap();
        assert_eq!(analysis.issues.len(), 2);
        assert_eq!(analysis.dropped_issues, 1);
        assert_eq!(analysis.metrics.lines_of_code, 12);
        assert_eq!(analysis.issues[0].kind, "missing_docstring");
        assert_eq!(analysis.issues[1].line, 7);
        assert_eq!(analysis.issues[1].column, Some(4));
    }

    #[test]
    fn analysis_without_issues_is_empty_not_error() {
        let payload = json!({"analysis": {"file_path": "/w/a.py", "elements": [], "metrics": {}}});
        let analysis = FileAnalysis::from_payload("python_intelligence", "analyze_file", &payload).unwrap();
        assert!(analysis.issues.is_empty());
    }

    #[test]
    fn analysis_without_analysis_object_is_protocol_error() {
        let err = FileAnalysis::from_payload("python_intelligence", "analyze_file", &json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedReply { .. }));
    }

    #[test]
    fn issue_defaults_missing_fields() {
        let issue = Issue::from_value(&json!({})).unwrap();
        assert_eq!(issue.line, 0);
        assert_eq!(issue.column, None);
        assert_eq!(issue.kind, "issue");
        assert_eq!(issue.message, "(no message)");
    }

    #[test]
    fn completion_reads_nested_content() {
        let payload = json!({"response": {"content": "def add(a, b): return a + b"}});
        let Reply::Completion(c) = Reply::decode("llm_provider", "generate", payload).unwrap() else {
            panic!("expected completion");
        };
        assert!(c.content.starts_with("def add"));
    }

    #[test]
    fn commit_from_subject_and_body() {
        let payload = json!({"commit": {"type": "feat", "scope": "client", "subject": "feat(client): add retry", "body": "Adds a retry action."}});
        let commit = CommitSuggestion::from_payload("git_semantic", "generate_commit", &payload).unwrap();
        assert_eq!(commit.message, "feat(client): add retry\n\nAdds a retry action.");
        assert_eq!(commit.kind.as_deref(), Some("feat"));
        assert_eq!(commit.scope.as_deref(), Some("client"));
    }

    #[test]
    fn commit_from_plain_string() {
        let payload = json!({"commit": "fix: handle empty diff"});
        let commit = CommitSuggestion::from_payload("git_semantic", "generate_commit", &payload).unwrap();
        assert_eq!(commit.message, "fix: handle empty diff");
    }

    #[test]
    fn commit_without_message_is_rejected() {
        let payload = json!({"commit": {"type": "chore"}});
        assert!(CommitSuggestion::from_payload("git_semantic", "generate_commit", &payload).is_err());
    }

    #[test]
    fn unknown_pair_is_opaque_passthrough() {
        let payload = json!({"anything": [1, 2, 3]});
        let reply = Reply::decode("doc_writer", "summarize", payload.clone()).unwrap();
        assert_eq!(
            reply,
            Reply::Opaque {
                target: "doc_writer".into(),
                command: "summarize".into(),
                payload
            }
        );
    }

    #[test]
    fn refactoring_reply_lists_actions() {
        let payload = json!({"refactoring_actions": [{"kind": "extract_function"}]});
        let Reply::Refactoring(actions) =
            Reply::decode("refactoring_engine", "analyze_refactoring_opportunities", payload).unwrap()
        else {
            panic!("expected refactoring reply");
        };
        assert_eq!(actions.len(), 1);
    }
}
