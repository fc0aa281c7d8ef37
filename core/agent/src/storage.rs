//! Centralized paths for everything the agent keeps on disk.

use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

const ROOT_DIR: &str = ".otpfill";

/// Production code uses [`StorageConfig::from_home`], which points to `~/.otpfill/`.
/// Tests use [`StorageConfig::with_root`] with a temp directory.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(AgentError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR),
        })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Agent configuration (TOML).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("agent.toml")
    }

    /// Durable settings: user identity, auto-connect flag.
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Ephemeral cache: current mailbox and the last received code.
    pub fn cache_file(&self) -> PathBuf {
        self.root.join("cache.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/otpfill-test"));
        assert_eq!(
            storage.settings_file(),
            PathBuf::from("/tmp/otpfill-test/settings.json")
        );
        assert_eq!(
            storage.config_file(),
            PathBuf::from("/tmp/otpfill-test/agent.toml")
        );
        assert!(storage.log_dir().starts_with(storage.root()));
    }
}
