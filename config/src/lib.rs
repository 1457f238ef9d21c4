//! `~/.aura/config.toml` loading.

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use aura_analysis::SchedulerSettings;
use aura_client::ClientOptions;
use aura_tools::GitSettings;
use serde::Deserialize;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "AURA_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

/// Every table and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuraConfig {
    pub connection: ClientOptions,
    pub analysis: SchedulerSettings,
    pub vcs: GitSettings,
}

impl AuraConfig {
    /// `Ok(None)` when no config file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.connection.endpoint = expand_env_vars(&config.connection.endpoint);
        config.validate().map_err(|message| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        self.connection
            .endpoint()
            .map_err(|e| format!("connection.endpoint: {e}"))?;
        if self.connection.client_name.trim().is_empty() {
            return Err("connection.client_name must not be empty".to_string());
        }
        self.analysis.validate()
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// `$AURA_CONFIG` when set, otherwise `~/.aura/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    aura_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.aura`, home of the config file and logs.
pub fn aura_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".aura"))
}

/// Replace `${VAR}` with the variable's value (empty when unset).
/// An unclosed `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("127.0.0.1:5559"), "127.0.0.1:5559");
    }

    #[test]
    fn expand_env_vars_substitutes_and_blanks_missing() {
        unsafe {
            env::set_var("AURA_TEST_HOST", "10.0.0.7");
            env::remove_var("AURA_TEST_MISSING");
        }
        assert_eq!(
            expand_env_vars("${AURA_TEST_HOST}:${AURA_TEST_MISSING}5559"),
            "10.0.0.7:5559"
        );
        unsafe {
            env::remove_var("AURA_TEST_HOST");
        }
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("unix:/tmp/${SOCK"), "unix:/tmp/${SOCK");
        assert_eq!(expand_env_vars("a${}b"), "ab");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AuraConfig::parse(Path::new("config.toml"), "").unwrap();
        assert_eq!(config.connection, ClientOptions::default());
        assert_eq!(config.analysis.batch_size, 5);
        assert_eq!(config.vcs, GitSettings::default());
    }

    #[test]
    fn full_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[connection]
endpoint = "unix:/tmp/aura.sock"
request_timeout_ms = 10000
client_name = "aura-test"

[analysis]
batch_size = 3
supported_languages = ["python"]
large_delay_ms = 4000
[[analysis.debounce_tiers]]
max_bytes = 2000
delay_ms = 250

[vcs]
git_timeout_ms = 5000
"#,
        )
        .unwrap();

        let config = AuraConfig::load_from(&path).unwrap();
        assert_eq!(config.connection.endpoint, "unix:/tmp/aura.sock");
        assert_eq!(config.connection.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.connection.analysis_timeout(), Duration::from_secs(15));
        assert_eq!(config.analysis.batch_size, 3);
        assert!(config.analysis.supports("python"));
        assert!(!config.analysis.supports("rust"));
        assert_eq!(config.analysis.debounce_for(100), Duration::from_millis(250));
        assert_eq!(config.analysis.debounce_for(5000), Duration::from_millis(4000));
        assert_eq!(config.vcs.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn syntax_error_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[connection\nendpoint = 1").unwrap();
        let err = AuraConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn bad_values_are_invalid() {
        let err = AuraConfig::parse(Path::new("c.toml"), "[analysis]\nbatch_size = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = AuraConfig::parse(Path::new("c.toml"), "[connection]\nendpoint = \"\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("connection.endpoint"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AuraConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
