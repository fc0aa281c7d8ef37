//! Error types for the agent.
//!
//! Transport failures never escape the channel actor: they become connection
//! state changes and a scheduled reconnect. The variants here surface to the
//! CLI and to callers of [`crate::ChannelHandle`].

use std::path::PathBuf;

use otpfill_protocol::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid channel address: {0}")]
    InvalidChannel(FrameError),

    // ─────────────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fill(#[from] fill_core::FillError),

    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("Channel manager is not running")]
    ManagerStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file malformed: {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
