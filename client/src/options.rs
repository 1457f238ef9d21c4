//! Connection settings, deserialized from the `[connection]` config table.

use std::time::Duration;

use serde::Deserialize;

use crate::transport::{DEFAULT_ENDPOINT, Endpoint, InvalidEndpoint};

/// Chat, commit, and status requests.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Scheduler-driven file analysis.
pub const DEFAULT_ANALYSIS_TIMEOUT_MS: u64 = 15_000;
/// Connect-time liveness probe.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// `host:port`, `tcp://host:port`, or `unix:/path`.
    pub endpoint: String,
    /// `source` field stamped on every outbound envelope and id prefix.
    pub client_name: String,
    pub request_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client_name: "aura-editor".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            analysis_timeout_ms: DEFAULT_ANALYSIS_TIMEOUT_MS,
            health_check_timeout_ms: DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
        }
    }
}

impl ClientOptions {
    pub fn endpoint(&self) -> Result<Endpoint, InvalidEndpoint> {
        self.endpoint.parse()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms.max(1))
    }

    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_timeout_policy() {
        let opts = ClientOptions::default();
        assert_eq!(opts.request_timeout(), Duration::from_secs(30));
        assert_eq!(opts.analysis_timeout(), Duration::from_secs(15));
        assert_eq!(opts.health_check_timeout(), Duration::from_secs(5));
        assert_eq!(opts.endpoint().unwrap(), Endpoint::default());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let opts: ClientOptions =
            serde_json::from_value(serde_json::json!({"request_timeout_ms": 1000})).unwrap();
        assert_eq!(opts.request_timeout(), Duration::from_secs(1));
        assert_eq!(opts.client_name, "aura-editor");
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let opts = ClientOptions {
            request_timeout_ms: 0,
            ..ClientOptions::default()
        };
        assert_eq!(opts.request_timeout(), Duration::from_millis(1));
    }
}
