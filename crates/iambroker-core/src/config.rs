//! broker.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub cloud: CloudSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub requests: RequestsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    pub model_uuid: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    /// Optional file the status sink mirrors the current status into.
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    /// Platform trust hook; skipped when unset or not installed.
    #[serde(default = "default_trust_command")]
    pub trust_command: Option<String>,
    /// Base64-encoded service-account key supplied by the operator.
    #[serde(default)]
    pub base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudSection {
    #[serde(default = "default_cli")]
    pub cli: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Total attempts, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before retry `i` is `i * step_secs`.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestsSection {
    #[serde(default = "default_requests_path")]
    pub path: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/iambroker")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("/etc/iambroker/service-account.json")
}

fn default_trust_command() -> Option<String> {
    Some("credential-get".to_string())
}

fn default_cli() -> String {
    "gcloud".to_string()
}

fn default_attempts() -> u32 {
    4
}

fn default_step_secs() -> u64 {
    10
}

fn default_requests_path() -> PathBuf {
    PathBuf::from("/var/lib/iambroker/requests.json")
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            trust_command: default_trust_command(),
            base64: None,
        }
    }
}

impl Default for CloudSection {
    fn default() -> Self {
        Self { cli: default_cli() }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            step_secs: default_step_secs(),
        }
    }
}

impl Default for RequestsSection {
    fn default() -> Self {
        Self {
            path: default_requests_path(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl RetrySection {
    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }
}

impl RequestsSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.broker.state_dir.join("iambroker.redb")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.model_uuid.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "broker.model_uuid",
                reason: "must not be empty".to_string(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cloud.cli.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cloud.cli",
                reason: "must name an executable".to_string(),
            });
        }
        Ok(())
    }

    /// Scaffold a config with defaults for the given model.
    pub fn scaffold(model_uuid: &str) -> Self {
        BrokerConfig {
            broker: BrokerSection {
                model_uuid: model_uuid.to_string(),
                state_dir: default_state_dir(),
                credentials_file: default_credentials_file(),
                status_file: None,
            },
            credentials: CredentialsSection::default(),
            cloud: CloudSection::default(),
            retry: RetrySection::default(),
            requests: RequestsSection::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = BrokerConfig::parse(
            r#"
[broker]
model_uuid = "abc-123"
"#,
        )
        .unwrap();
        assert_eq!(config.broker.model_uuid, "abc-123");
        assert_eq!(config.retry.attempts, 4);
        assert_eq!(config.retry.step(), Duration::from_secs(10));
        assert_eq!(config.cloud.cli, "gcloud");
        assert_eq!(
            config.credentials.trust_command.as_deref(),
            Some("credential-get")
        );
        assert_eq!(
            config.state_db_path(),
            PathBuf::from("/var/lib/iambroker/iambroker.redb")
        );
    }

    #[test]
    fn test_scaffold_round_trips() {
        let config = BrokerConfig::scaffold("model-1");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("model-1"));
        assert_eq!(BrokerConfig::parse(&toml_str).unwrap(), config);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = BrokerConfig::parse(
            r#"
[broker]
model_uuid = "abc"
colour = "blue"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = BrokerConfig::parse(
            r#"
[broker]
model_uuid = "abc"

[retry]
attempts = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry.attempts"));
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = BrokerConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
