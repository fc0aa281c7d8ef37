//! Websocket transport for the notification channel.
//!
//! A [`Connector`] opens a [`Link`]: a pair of unbounded queues bridging the
//! socket to the channel actor. The actor never touches the socket directly,
//! so tests can substitute an in-memory connector.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame, not yet decoded.
    Frame(String),
    /// The transport closed. Always the last event on a link.
    Closed { reason: String },
}

/// One open connection. Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Link, TransportError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Link, TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            url: url.to_string(),
            reason,
        };

        let (stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| connect_failed(format!("timed out after {:?}", CONNECT_TIMEOUT)))?
            .map_err(|err| connect_failed(err.to_string()))?;

        let (mut writer, mut reader) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = writer.send(Message::Text(text)).await {
                    debug!(error = %err, "Websocket write failed");
                    break;
                }
            }
            let _ = writer.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(LinkEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    // Protocol-level ping/pong is answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "Websocket read failed");
                        break err.to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            };
            let _ = inbound_tx.send(LinkEvent::Closed { reason });
        });

        Ok(Link { outbound, inbound })
    }
}
