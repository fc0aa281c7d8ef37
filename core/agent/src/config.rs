//! Agent configuration (`~/.otpfill/agent.toml`).
//!
//! Every field has a default, so a missing file or a partial file is valid.
//!
//! ```toml
//! server_url = "ws://localhost:8000"
//! channel_prefix = "/ws"
//! keepalive_secs = 25
//!
//! [reconnect]
//! policy = "exponential"
//! base_secs = 2
//! max_secs = 60
//! jitter = 0.2
//!
//! [fill]
//! focus_stagger_ms = 100
//! refill_on_late_field = false
//!
//! [logging]
//! file = true
//! ```

use fill_core::FillOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{AgentError, Result};
use crate::reconnect::ReconnectPolicy;

const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";
const DEFAULT_KEEPALIVE_SECS: u64 = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server_url: String,
    pub channel_prefix: String,
    pub keepalive_secs: u64,
    pub reconnect: ReconnectPolicy,
    pub fill: FillOptions,
    pub logging: LoggingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            channel_prefix: otpfill_protocol::DEFAULT_CHANNEL_PREFIX.to_string(),
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            reconnect: ReconnectPolicy::default(),
            fill: FillOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn keepalive_period(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn channel_url(&self, user_identity: &str) -> Result<Url> {
        otpfill_protocol::channel_url(&self.server_url, &self.channel_prefix, user_identity)
            .map_err(AgentError::InvalidChannel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write a daily-rolling log file.
    pub file: bool,
    /// Log directory; defaults to `~/.otpfill/logs`.
    pub directory: Option<PathBuf>,
}

/// Loads the config at `path`, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| AgentError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<AgentConfig>(&content).map_err(|err| AgentError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.keepalive_period(), Duration::from_secs(25));
        assert_eq!(config.reconnect.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn load_config_parses_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("agent.toml");
        fs_err::write(
            &path,
            r#"
server_url = "wss://relay.example.test"
keepalive_secs = 10

[reconnect]
policy = "exponential"
base_secs = 2
max_secs = 60
jitter = 0.2

[fill]
focus_stagger_ms = 50
refill_on_late_field = true

[logging]
file = true
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.server_url, "wss://relay.example.test");
        assert_eq!(config.channel_prefix, "/ws");
        assert_eq!(config.keepalive_secs, 10);
        assert!(matches!(
            config.reconnect,
            ReconnectPolicy::Exponential { base_secs: 2, .. }
        ));
        assert_eq!(config.fill.focus_stagger_ms, 50);
        assert_eq!(config.fill.highlight_ms, 2000);
        assert!(config.fill.refill_on_late_field);
        assert!(config.logging.file);
        assert_eq!(
            config.channel_url("bob").unwrap().as_str(),
            "wss://relay.example.test/ws/bob"
        );
    }

    #[test]
    fn load_config_reports_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("agent.toml");
        fs_err::write(&path, "keepalive_secs = \"soon\"").expect("write config");
        assert!(matches!(
            load_config(&path),
            Err(AgentError::ConfigMalformed { .. })
        ));
    }
}
