//! # otpfill-agent
//!
//! Background agent that keeps a live channel to the OTP notification server
//! and fills received codes into the active page.
//!
//! ## Design Principles
//!
//! - **One owner per piece of state**: the [`ChannelManager`] actor owns the
//!   session and the latest code; each page worker owns its [`fill_core::FillEngine`].
//! - **Message passing only**: the manager and pages talk over tokio channels.
//! - **Never fatal**: transport failures become state changes and a
//!   scheduled reconnect; malformed frames are logged and dropped.
//! - **Graceful degradation**: missing config or store files mean defaults.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use otpfill_agent::{AgentConfig, ChannelManager, LocalPages, Stores, WsConnector};
//! use std::sync::Arc;
//!
//! let config = AgentConfig::default();
//! let pages = Arc::new(LocalPages::new(config.fill.clone()));
//! let channel = ChannelManager::new(config, WsConnector, Stores::in_memory(), pages).spawn();
//! channel.connect("alice").await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod pages;
pub mod reconnect;
pub mod session;
pub mod storage;
pub mod store;
pub mod transport;

pub use channel::{ChannelHandle, ChannelManager, ObserverEvent};
pub use config::{load_config, AgentConfig, LoggingConfig};
pub use error::{AgentError, Result, StoreError, TransportError};
pub use notify::{
    Clipboard, LogNotifier, MemoryClipboard, Notification, NotificationAction, NotificationKind,
    Notifier, Priority, RecordingNotifier, SystemClipboard,
};
pub use pages::{LocalPages, PageHandle, PageHost, PageId};
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionState, OtpRecord, Session, Snapshot};
pub use storage::StorageConfig;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, Stores};
pub use transport::{Connector, Link, LinkEvent, WsConnector};
