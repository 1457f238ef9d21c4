//! Typed wrappers over the backend's command set.

use std::path::Path;

use aura_protocol::envelope::{GET_STATUS_COMMAND, SYSTEM_TARGET};
use aura_protocol::reply::{
    ANALYSIS_TARGET, ANALYZE_FILE_COMMAND, GENERATE_COMMAND, GENERATE_COMMIT_COMMAND,
    GENERATE_TESTS_COMMAND, GIT_TARGET, LLM_TARGET, REFACTORING_COMMAND, REFACTORING_TARGET,
    TEST_TARGET,
};
use aura_protocol::{
    CommitSuggestion, Completion, FileAnalysis, ProtocolError, Reply, RequestError, ServiceStatus,
};
use serde_json::{Value, json};

use crate::client::ProtocolClient;

/// Parameters for `llm_provider/generate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    /// `fast`, `medium`, or `quality`.
    pub model_preference: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model_preference: "medium".to_string(),
            max_tokens: 1000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendApi {
    client: ProtocolClient,
}

impl BackendApi {
    #[must_use]
    pub fn new(client: ProtocolClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    /// Send any command and decode its reply by target and command.
    pub async fn request(
        &self,
        target: &str,
        command: &str,
        payload: Value,
    ) -> Result<Reply, RequestError> {
        let payload = self.client.send(target, command, payload).await?;
        Ok(Reply::decode(target, command, payload)?)
    }

    /// Run one file through the analysis module. Uses the analysis timeout.
    pub async fn analyze_file(
        &self,
        path: &Path,
        content: &str,
        language: &str,
    ) -> Result<FileAnalysis, RequestError> {
        let payload = json!({
            "file_path": path.to_string_lossy(),
            "content": content,
            "language": language,
            "real_time": true,
        });
        let reply = self
            .client
            .send_with_timeout(
                ANALYSIS_TARGET,
                ANALYZE_FILE_COMMAND,
                payload,
                self.client.options().analysis_timeout(),
            )
            .await?;
        Ok(FileAnalysis::from_payload(
            ANALYSIS_TARGET,
            ANALYZE_FILE_COMMAND,
            &reply,
        )?)
    }

    pub async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<Completion, RequestError> {
        let payload = json!({
            "request": {
                "prompt": prompt,
                "model_preference": options.model_preference,
                "max_tokens": options.max_tokens,
                "temperature": options.temperature,
            }
        });
        let reply = self.client.send(LLM_TARGET, GENERATE_COMMAND, payload).await?;
        Ok(Completion::from_payload(LLM_TARGET, GENERATE_COMMAND, &reply)?)
    }

    /// Ask for a commit message. `diff` is forwarded when the caller already has one.
    pub async fn generate_commit(
        &self,
        include_unstaged: bool,
        diff: Option<&str>,
    ) -> Result<CommitSuggestion, RequestError> {
        let mut payload = json!({ "include_unstaged": include_unstaged });
        if let Some(diff) = diff {
            payload["diff"] = Value::String(diff.to_string());
        }
        let reply = self
            .client
            .send(GIT_TARGET, GENERATE_COMMIT_COMMAND, payload)
            .await?;
        Ok(CommitSuggestion::from_payload(
            GIT_TARGET,
            GENERATE_COMMIT_COMMAND,
            &reply,
        )?)
    }

    pub async fn generate_tests(&self, path: &Path, test_type: &str) -> Result<Value, RequestError> {
        let payload = json!({
            "file_path": path.to_string_lossy(),
            "test_type": test_type,
        });
        match self.request(TEST_TARGET, GENERATE_TESTS_COMMAND, payload).await? {
            Reply::TestSuite(suite) => Ok(suite),
            other => Err(unexpected(TEST_TARGET, GENERATE_TESTS_COMMAND, &other)),
        }
    }

    pub async fn refactoring_opportunities(
        &self,
        path: &Path,
        code: &str,
    ) -> Result<Vec<Value>, RequestError> {
        let payload = json!({
            "file_path": path.to_string_lossy(),
            "code": code,
        });
        match self.request(REFACTORING_TARGET, REFACTORING_COMMAND, payload).await? {
            Reply::Refactoring(actions) => Ok(actions),
            other => Err(unexpected(REFACTORING_TARGET, REFACTORING_COMMAND, &other)),
        }
    }

    pub async fn status(&self) -> Result<ServiceStatus, RequestError> {
        match self.request(SYSTEM_TARGET, GET_STATUS_COMMAND, Value::Null).await? {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected(SYSTEM_TARGET, GET_STATUS_COMMAND, &other)),
        }
    }
}

fn unexpected(target: &str, command: &str, reply: &Reply) -> RequestError {
    ProtocolError::UnexpectedReply {
        target: target.to_string(),
        command: command.to_string(),
        reason: format!("decoded as {reply:?}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::{attached_client, next_frame, reply_to};

    #[tokio::test]
    async fn analyze_file_sends_expected_payload() {
        let (client, mut writer_rx) = attached_client();
        let api = BackendApi::new(client.clone());
        let task = tokio::spawn(async move {
            api.analyze_file(Path::new("/w/a.py"), "x = 1\n", "python")
                .await
        });

        let frame = next_frame(&mut writer_rx).await;
        assert_eq!(frame["target"], ANALYSIS_TARGET);
        assert_eq!(frame["payload"]["command"], ANALYZE_FILE_COMMAND);
        assert_eq!(frame["payload"]["file_path"], "/w/a.py");
        assert_eq!(frame["payload"]["language"], "python");
        assert_eq!(frame["payload"]["real_time"], true);

        client.dispatch(&reply_to(
            &frame,
            json!({
                "success": true,
                "analysis": {
                    "file_path": "/w/a.py",
                    "issues": [{"line": 3, "type": "style", "severity": "warning", "message": "m"}],
                },
            }),
        ));
        let analysis = task.await.unwrap().unwrap();
        assert_eq!(analysis.issues.len(), 1);
        assert_eq!(analysis.issues[0].line, 3);
    }

    #[tokio::test]
    async fn chat_nests_request_and_reads_content() {
        let (client, mut writer_rx) = attached_client();
        let api = BackendApi::new(client.clone());
        let task =
            tokio::spawn(async move { api.chat("hello", &ChatOptions::default()).await });

        let frame = next_frame(&mut writer_rx).await;
        assert_eq!(frame["target"], LLM_TARGET);
        assert_eq!(frame["payload"]["request"]["prompt"], "hello");
        assert_eq!(frame["payload"]["request"]["model_preference"], "medium");

        client.dispatch(&reply_to(
            &frame,
            json!({"success": true, "response": {"content": "hi there"}}),
        ));
        assert_eq!(task.await.unwrap().unwrap().content, "hi there");
    }

    #[tokio::test]
    async fn generate_commit_forwards_diff() {
        let (client, mut writer_rx) = attached_client();
        let api = BackendApi::new(client.clone());
        let task = tokio::spawn(async move {
            api.generate_commit(false, Some("diff --git a/x b/x")).await
        });

        let frame = next_frame(&mut writer_rx).await;
        assert_eq!(frame["payload"]["include_unstaged"], false);
        assert_eq!(frame["payload"]["diff"], "diff --git a/x b/x");

        client.dispatch(&reply_to(
            &frame,
            json!({"success": true, "commit": {"message": "fix: handle empty input"}}),
        ));
        assert_eq!(
            task.await.unwrap().unwrap().message,
            "fix: handle empty input"
        );
    }

    #[tokio::test]
    async fn module_error_surfaces_backend_message() {
        let (client, mut writer_rx) = attached_client();
        let api = BackendApi::new(client.clone());
        let task = tokio::spawn(async move { api.status().await });

        let frame = next_frame(&mut writer_rx).await;
        client.dispatch(&json!({
            "id": frame["id"],
            "success": false,
            "type": "module_error",
            "error": "Module system not available",
        }));
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Module system not available");
    }
}
