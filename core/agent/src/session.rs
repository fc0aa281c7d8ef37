//! Session and OTP record state owned by the channel manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One per running agent while a user identity is configured. Dropped on
/// explicit disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_identity: String,
    pub connection_state: ConnectionState,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_identity: String) -> Self {
        Self {
            user_identity,
            connection_state: ConnectionState::Disconnected,
            last_seen_at: None,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen_at = Some(at);
    }
}

/// The latest code received. Each new one replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code: String,
    pub received_at: DateTime<Utc>,
    pub mailbox: String,
    pub sender: String,
}

/// What observers see when they ask for the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: Option<Session>,
    pub connection_state: ConnectionState,
    pub current_mailbox: Option<String>,
    pub last_otp: Option<OtpRecord>,
}
