//! User-facing notifications and the system clipboard.

use copypasta::{ClipboardContext, ClipboardProvider};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    AutoFill,
    Copy,
}

impl NotificationAction {
    pub fn label(self) -> &'static str {
        match self {
            NotificationAction::AutoFill => "Auto-Fill",
            NotificationAction::Copy => "Copy",
        }
    }
}

/// What a notification is about; decides what its Copy button copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Otp,
    Mailbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub actions: Vec<NotificationAction>,
    pub priority: Priority,
}

impl Notification {
    pub fn otp_received(code: &str, sender: &str) -> Self {
        Self {
            id: format!("otp-{}", chrono::Utc::now().timestamp_millis()),
            kind: NotificationKind::Otp,
            title: "OTP Received".to_string(),
            message: format!("Code: {}\nFrom: {}", code, sender),
            actions: vec![NotificationAction::AutoFill, NotificationAction::Copy],
            priority: Priority::High,
        }
    }

    pub fn new_mailbox(address: &str) -> Self {
        Self {
            id: format!("mailbox-{}", chrono::Utc::now().timestamp_millis()),
            kind: NotificationKind::Mailbox,
            title: "New Email Generated".to_string(),
            message: address.to_string(),
            actions: vec![NotificationAction::Copy],
            priority: Priority::Normal,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log. The default for headless runs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        let actions: Vec<&str> = notification
            .actions
            .iter()
            .map(|action| action.label())
            .collect();
        info!(
            id = %notification.id,
            title = %notification.title,
            priority = ?notification.priority,
            actions = ?actions,
            "Notification"
        );
    }
}

/// Keeps every notification; for tests and the observer UI.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
    }
}

pub trait Clipboard: Send {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// The desktop clipboard. Opens a fresh context per write.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        let mut ctx = ClipboardContext::new().map_err(|err| AgentError::Clipboard(err.to_string()))?;
        ctx.set_contents(text.to_string())
            .map_err(|err| AgentError::Clipboard(err.to_string()))
    }
}

/// Clipboard that only remembers the last value.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    pub contents: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.contents = Some(text.to_string());
        Ok(())
    }
}
