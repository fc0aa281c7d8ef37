//! Wire protocol for the OTP notification channel.
//!
//! This crate is shared by the agent and by anything that speaks to it (test
//! servers, tooling) so the frame schema cannot drift. The notification server
//! remains the authority on what it emits; the agent drops anything it does
//! not understand.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const MAX_FRAME_BYTES: usize = 64 * 1024;
pub const MAX_CODE_CHARS: usize = 32;
pub const DEFAULT_CHANNEL_PREFIX: &str = "/ws";

/// Frames emitted by the notification server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Otp {
        #[serde(alias = "otp")]
        code: String,
        #[serde(default)]
        sender: Option<String>,
        #[serde(default)]
        email: Option<String>,
    },
    NewEmail {
        email: String,
    },
    Status {
        #[serde(default)]
        email: Option<String>,
    },
    Ping,
    Pong,
}

/// Frames the agent sends to the notification server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Status,
    Ping,
    Pong,
}

impl ClientFrame {
    pub fn to_text(self) -> String {
        match self {
            ClientFrame::Status => r#"{"type":"status"}"#.to_string(),
            ClientFrame::Ping => r#"{"type":"ping"}"#.to_string(),
            ClientFrame::Pong => r#"{"type":"pong"}"#.to_string(),
        }
    }
}

/// A decoded, validated inbound event. Consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMailbox {
        address: String,
    },
    OtpReceived {
        code: String,
        source: String,
        mailbox: Option<String>,
    },
    StatusSnapshot {
        mailbox: Option<String>,
    },
    /// Server-initiated `ping`; must be answered with a `pong`.
    Heartbeat,
    /// Server `pong` answering our keep-alive probe.
    KeepAliveAck,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NewMailbox { .. } => "new_mailbox",
            InboundEvent::OtpReceived { .. } => "otp_received",
            InboundEvent::StatusSnapshot { .. } => "status_snapshot",
            InboundEvent::Heartbeat => "heartbeat",
            InboundEvent::KeepAliveAck => "keep_alive_ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    pub code: String,
    pub message: String,
}

impl FrameError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for FrameError {}

const KNOWN_TYPES: &[&str] = &["otp", "new_email", "status", "ping", "pong"];

pub fn decode_frame(text: &str) -> Result<InboundEvent, FrameError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(FrameError::new(
            "frame_too_large",
            format!("frame exceeded {} bytes", MAX_FRAME_BYTES),
        ));
    }

    let value: Value = serde_json::from_str(text).map_err(|err| {
        FrameError::new("invalid_json", format!("frame was not valid JSON: {}", err))
    })?;

    let frame_type = value
        .get("type")
        .and_then(|value| value.as_str())
        .ok_or_else(|| FrameError::new("missing_field", "type is required"))?;
    if !KNOWN_TYPES.contains(&frame_type) {
        return Err(FrameError::new(
            "unknown_type",
            format!("unsupported frame type: {}", frame_type),
        ));
    }

    let frame: ServerFrame = serde_json::from_value(value).map_err(|err| {
        FrameError::new("missing_field", format!("frame payload is invalid: {}", err))
    })?;
    frame.into_event()
}

impl ServerFrame {
    pub fn into_event(self) -> Result<InboundEvent, FrameError> {
        match self {
            ServerFrame::Otp {
                code,
                sender,
                email,
            } => {
                let code = strip_whitespace(&code);
                if code.is_empty() {
                    return Err(FrameError::new("invalid_code", "code is required"));
                }
                if code.chars().count() > MAX_CODE_CHARS {
                    return Err(FrameError::new(
                        "invalid_code",
                        format!("code must be {} characters or fewer", MAX_CODE_CHARS),
                    ));
                }
                let mailbox = optional_email(email)?;
                let source = sender
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                Ok(InboundEvent::OtpReceived {
                    code,
                    source,
                    mailbox,
                })
            }
            ServerFrame::NewEmail { email } => {
                let address = require_email(&email)?;
                Ok(InboundEvent::NewMailbox { address })
            }
            ServerFrame::Status { email } => Ok(InboundEvent::StatusSnapshot {
                mailbox: optional_email(email)?,
            }),
            ServerFrame::Ping => Ok(InboundEvent::Heartbeat),
            ServerFrame::Pong => Ok(InboundEvent::KeepAliveAck),
        }
    }
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn require_email(value: &str) -> Result<String, FrameError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FrameError::new("missing_field", "email is required"));
    }
    if !trimmed.contains('@') {
        return Err(FrameError::new(
            "invalid_email",
            format!("not a mailbox address: {}", trimmed),
        ));
    }
    Ok(trimmed.to_lowercase())
}

fn optional_email(value: Option<String>) -> Result<Option<String>, FrameError> {
    match value {
        Some(value) if !value.trim().is_empty() => require_email(&value).map(Some),
        _ => Ok(None),
    }
}

/// Builds the channel address for a user, e.g. `ws://localhost:8000/ws/alice`.
pub fn channel_url(server: &str, prefix: &str, user_identity: &str) -> Result<Url, FrameError> {
    let identity = user_identity.trim();
    if identity.is_empty() {
        return Err(FrameError::new(
            "invalid_identity",
            "user identity is required",
        ));
    }

    let server = server.trim().trim_end_matches('/');
    let base = if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else if server.starts_with("localhost") || server.starts_with("127.0.0.1") {
        format!("ws://{}", server)
    } else {
        format!("wss://{}", server)
    };

    let mut url = Url::parse(&base).map_err(|err| {
        FrameError::new("invalid_url", format!("bad server address {}: {}", base, err))
    })?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| FrameError::new("invalid_url", "server address cannot carry a path"))?;
        segments.pop_if_empty();
        for segment in prefix.split('/').filter(|segment| !segment.is_empty()) {
            segments.push(segment);
        }
        segments.push(identity);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_otp_under_either_field_name() {
        let from_code = decode_frame(r#"{"type":"otp","code":"123456","sender":"Acme"}"#);
        let from_otp = decode_frame(r#"{"type":"otp","otp":"123456","sender":"Acme"}"#);
        assert_eq!(from_code, from_otp);
        assert_eq!(
            from_code.unwrap(),
            InboundEvent::OtpReceived {
                code: "123456".to_string(),
                source: "Acme".to_string(),
                mailbox: None,
            }
        );
    }

    #[test]
    fn otp_code_is_whitespace_stripped_and_sender_defaults() {
        let event =
            decode_frame(r#"{"type":"otp","otp":"12 34 56","email":"Box@Mail.test"}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::OtpReceived {
                code: "123456".to_string(),
                source: "Unknown".to_string(),
                mailbox: Some("box@mail.test".to_string()),
            }
        );
    }

    #[test]
    fn status_tolerates_server_counters() {
        let event = decode_frame(
            r#"{"type":"status","connected_users":3,"pending_otps":0,"timestamp":"2026-01-30T12:00:00"}"#,
        )
        .unwrap();
        assert_eq!(event, InboundEvent::StatusSnapshot { mailbox: None });
    }

    #[test]
    fn ping_and_pong_map_to_liveness_events() {
        assert_eq!(decode_frame(r#"{"type":"ping"}"#).unwrap(), InboundEvent::Heartbeat);
        assert_eq!(
            decode_frame(r#"{"type":"pong"}"#).unwrap(),
            InboundEvent::KeepAliveAck
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(decode_frame("not json").unwrap_err().code, "invalid_json");
        assert_eq!(decode_frame(r#"{"otp":"1"}"#).unwrap_err().code, "missing_field");
        assert_eq!(
            decode_frame(r#"{"type":"otp_delivered"}"#).unwrap_err().code,
            "unknown_type"
        );
        assert_eq!(
            decode_frame(r#"{"type":"otp","code":"   "}"#).unwrap_err().code,
            "invalid_code"
        );
        assert_eq!(
            decode_frame(r#"{"type":"new_email","email":"nobody"}"#)
                .unwrap_err()
                .code,
            "invalid_email"
        );
    }

    #[test]
    fn rejects_oversized_frames() {
        let padded = format!(r#"{{"type":"ping","pad":"{}"}}"#, "x".repeat(MAX_FRAME_BYTES));
        assert_eq!(decode_frame(&padded).unwrap_err().code, "frame_too_large");
    }

    #[test]
    fn client_frames_serialize_as_tagged_objects() {
        for frame in [ClientFrame::Status, ClientFrame::Ping, ClientFrame::Pong] {
            let expected = serde_json::to_string(&frame).unwrap();
            assert_eq!(frame.to_text(), expected);
        }
    }

    #[test]
    fn channel_url_joins_prefix_and_identity() {
        let url = channel_url("ws://localhost:8000", "/ws", "alice").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/alice");

        let url = channel_url("localhost:8000/", "/channel", "bob smith").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/channel/bob%20smith");

        let url = channel_url("relay.example.com", "ws", "carol").unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.com/ws/carol");
    }

    #[test]
    fn channel_url_rejects_blank_identity() {
        let err = channel_url("ws://localhost:8000", "/ws", "  ").unwrap_err();
        assert_eq!(err.code, "invalid_identity");
    }
}
