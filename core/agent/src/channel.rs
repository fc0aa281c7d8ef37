//! Channel manager: one long-lived actor per agent.
//!
//! The actor owns the [`Session`], the latest [`OtpRecord`] and the current
//! link. Everything else talks to it through a [`ChannelHandle`]. Inbound
//! frames, commands, connection results and timers are all handled from a
//! single `select!` loop, so events are processed one at a time in arrival
//! order and no state is shared with other tasks.
//!
//! Connection attempts carry an id. A result for any id other than the
//! pending one is dropped along with its link, which keeps at most one live
//! channel per session even when `connect` is called repeatedly.

use chrono::Utc;
use fill_core::{mask_code, FillOutcome};
use otpfill_protocol::{decode_frame, ClientFrame, InboundEvent};
use serde::Serialize;
use std::future::pending;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result, TransportError};
use crate::notify::{
    Clipboard, LogNotifier, Notification, NotificationAction, NotificationKind, Notifier,
    SystemClipboard,
};
use crate::pages::PageHost;
use crate::session::{ConnectionState, OtpRecord, Session, Snapshot};
use crate::store::Stores;
use crate::transport::{Connector, Link, LinkEvent};

const OBSERVER_CAPACITY: usize = 64;

/// Pushed to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObserverEvent {
    ConnectionChanged {
        state: ConnectionState,
        user_identity: Option<String>,
    },
    NewMailbox {
        address: String,
    },
    OtpReceived {
        record: OtpRecord,
    },
    FillCompleted {
        outcome: FillOutcome,
    },
}

enum Command {
    Connect {
        user_identity: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    ManualFill {
        reply: oneshot::Sender<Option<oneshot::Receiver<FillOutcome>>>,
    },
    CopyLast {
        reply: oneshot::Sender<Result<bool>>,
    },
    CopyMailbox {
        reply: oneshot::Sender<Result<bool>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    Established {
        attempt: u64,
        result: std::result::Result<Link, TransportError>,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    observers: broadcast::Sender<ObserverEvent>,
}

impl ChannelHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| AgentError::ManagerStopped)?;
        response.await.map_err(|_| AgentError::ManagerStopped)
    }

    /// Opens (or replaces) the channel for `user_identity`. A no-op when
    /// already connected or connecting as the same identity.
    pub async fn connect(&self, user_identity: impl Into<String>) -> Result<()> {
        let user_identity = user_identity.into();
        self.request(|reply| Command::Connect {
            user_identity,
            reply,
        })
        .await?
    }

    /// Closes the channel and cancels any pending reconnect. Safe to call
    /// when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Fills the latest code into the active page. `None` when there is no
    /// code yet or no active page.
    pub async fn manual_fill(&self) -> Result<Option<FillOutcome>> {
        match self.request(|reply| Command::ManualFill { reply }).await? {
            Some(outcome) => Ok(outcome.await.ok()),
            None => Ok(None),
        }
    }

    /// Copies the latest code to the clipboard. `false` when there is none.
    pub async fn copy_last(&self) -> Result<bool> {
        self.request(|reply| Command::CopyLast { reply }).await?
    }

    /// Copies the current mailbox address. `false` when none is known yet.
    pub async fn copy_mailbox(&self) -> Result<bool> {
        self.request(|reply| Command::CopyMailbox { reply }).await?
    }

    /// Runs a button of `notification`. Copy copies what the notification
    /// is about: the latest code, or the mailbox address.
    pub async fn handle_action(
        &self,
        notification: &Notification,
        action: NotificationAction,
    ) -> Result<Option<FillOutcome>> {
        match (action, notification.kind) {
            (NotificationAction::AutoFill, _) => self.manual_fill().await,
            (NotificationAction::Copy, NotificationKind::Otp) => {
                self.copy_last().await?;
                Ok(None)
            }
            (NotificationAction::Copy, NotificationKind::Mailbox) => {
                self.copy_mailbox().await?;
                Ok(None)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.observers.subscribe()
    }

    /// Closes the channel and stops the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ChannelManager<C: Connector> {
    config: AgentConfig,
    connector: Arc<C>,
    stores: Stores,
    pages: Arc<dyn PageHost>,
    notifier: Arc<dyn Notifier>,
    clipboard: Box<dyn Clipboard>,
    observers: broadcast::Sender<ObserverEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    session: Option<Session>,
    mailbox: Option<String>,
    last_otp: Option<OtpRecord>,
    link: Option<Link>,
    next_attempt: u64,
    pending_attempt: Option<u64>,
    reconnect_at: Option<Pin<Box<Sleep>>>,
    reconnect_attempts: u32,
    keepalive: Option<Interval>,
}

impl<C: Connector> ChannelManager<C> {
    /// Builds a manager, hydrating the mailbox and last code from the cache.
    pub fn new(config: AgentConfig, connector: C, stores: Stores, pages: Arc<dyn PageHost>) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let mailbox = stores.current_email();
        let last_otp = stores.last_otp();
        Self {
            config,
            connector: Arc::new(connector),
            stores,
            pages,
            notifier: Arc::new(LogNotifier),
            clipboard: Box::new(SystemClipboard),
            observers,
            internal_tx,
            internal_rx,
            session: None,
            mailbox,
            last_otp,
            link: None,
            next_attempt: 0,
            pending_attempt: None,
            reconnect_at: None,
            reconnect_attempts: 0,
            keepalive: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Box<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }

    /// Starts the actor. Connects right away when a stored identity exists
    /// and auto-connect is enabled.
    pub fn spawn(self) -> ChannelHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            commands,
            observers: self.observers.clone(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if self.stores.auto_connect() {
            if let Some(user_identity) = self.stores.user_identity() {
                if let Err(e) = self.connect(user_identity) {
                    warn!(error = %e, "Auto-connect skipped");
                }
            }
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                event = next_link_event(&mut self.link) => self.handle_link_event(event),
                _ = reconnect_due(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.reconnect();
                }
                _ = keepalive_tick(&mut self.keepalive) => {
                    debug!("Sending keep-alive");
                    self.send(ClientFrame::Ping);
                }
            }
        }

        self.close_link();
        debug!("Channel manager stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect {
                user_identity,
                reply,
            } => {
                let _ = reply.send(self.connect(user_identity));
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ManualFill { reply } => {
                let outcome = match &self.last_otp {
                    Some(record) => self.start_fill(record.code.clone()),
                    None => {
                        info!("Manual fill requested with no code received");
                        None
                    }
                };
                let _ = reply.send(outcome);
            }
            Command::CopyLast { reply } => {
                let _ = reply.send(self.copy_last());
            }
            Command::CopyMailbox { reply } => {
                let _ = reply.send(self.copy_mailbox());
            }
            Command::Shutdown { reply } => {
                self.disconnect();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────

    fn connect(&mut self, user_identity: String) -> Result<()> {
        let user_identity = user_identity.trim().to_string();
        let url = self.config.channel_url(&user_identity)?;

        if let Some(session) = &self.session {
            if session.user_identity == user_identity
                && session.connection_state != ConnectionState::Disconnected
            {
                debug!(user = %user_identity, state = ?session.connection_state, "Already connected");
                return Ok(());
            }
        }

        self.stores.set_user_identity(&user_identity)?;
        self.session = Some(Session::new(user_identity));
        self.reconnect_attempts = 0;
        self.start_attempt(url);
        Ok(())
    }

    fn start_attempt(&mut self, url: Url) {
        self.close_link();
        self.reconnect_at = None;
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.pending_attempt = Some(attempt);
        self.set_state(ConnectionState::Connecting);
        info!(url = %url, attempt, "Connecting");

        let connector = Arc::clone(&self.connector);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = internal.send(Internal::Established { attempt, result });
        });
    }

    fn handle_internal(&mut self, internal: Internal) {
        let Internal::Established { attempt, result } = internal;
        if self.pending_attempt != Some(attempt) {
            debug!(attempt, "Dropping superseded connection attempt");
            return;
        }
        self.pending_attempt = None;

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.reconnect_at = None;
                self.reconnect_attempts = 0;

                let period = self.config.keepalive_period();
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(ticker);

                self.set_state(ConnectionState::Connected);
                info!(attempt, "Channel connected");
                self.send(ClientFrame::Status);
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.connection_lost();
            }
        }
    }

    fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(text)) => self.handle_frame(&text),
            Some(LinkEvent::Closed { reason }) => {
                warn!(reason = %reason, "Channel closed");
                self.connection_lost();
            }
            None => {
                warn!("Channel transport stopped");
                self.connection_lost();
            }
        }
    }

    /// Unsolicited close or failed attempt: go back to disconnected and
    /// schedule one reconnect.
    fn connection_lost(&mut self) {
        self.close_link();
        if self.session.is_none() {
            return;
        }
        self.set_state(ConnectionState::Disconnected);

        let delay = self.config.reconnect.delay(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_attempts,
            "Reconnect scheduled"
        );
        self.reconnect_at = Some(Box::pin(sleep(delay)));
    }

    fn reconnect(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        match self.config.channel_url(&session.user_identity) {
            Ok(url) => self.start_attempt(url),
            Err(e) => warn!(error = %e, "Reconnect abandoned"),
        }
    }

    fn disconnect(&mut self) {
        self.pending_attempt = None;
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.close_link();
        if let Some(session) = self.session.take() {
            info!(user = %session.user_identity, "Disconnected");
            self.broadcast(ObserverEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
                user_identity: None,
            });
        }
    }

    /// Dropping the link's sender closes the socket.
    fn close_link(&mut self) {
        self.keepalive = None;
        self.link = None;
    }

    fn set_state(&mut self, state: ConnectionState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.connection_state == state {
            return;
        }
        session.connection_state = state;
        let user_identity = Some(session.user_identity.clone());
        self.broadcast(ObserverEvent::ConnectionChanged {
            state,
            user_identity,
        });
    }

    fn send(&self, frame: ClientFrame) {
        let Some(link) = &self.link else {
            return;
        };
        if link.outbound.send(frame.to_text()).is_err() {
            debug!(?frame, "Outbound frame dropped; link closing");
        }
    }

    fn broadcast(&self, event: ObserverEvent) {
        // No subscribers is fine.
        let _ = self.observers.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────

    fn handle_frame(&mut self, text: &str) {
        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(code = %e.code, message = %e.message, "Dropping malformed frame");
                return;
            }
        };
        if let Some(session) = self.session.as_mut() {
            session.touch(Utc::now());
        }
        debug!(kind = event.kind(), "Inbound event");
        self.dispatch(event);
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::NewMailbox { address } => {
                info!(mailbox = %address, "New mailbox");
                self.remember_mailbox(&address);
                self.notifier.notify(&Notification::new_mailbox(&address));
                self.broadcast(ObserverEvent::NewMailbox { address });
            }
            InboundEvent::OtpReceived {
                code,
                source,
                mailbox,
            } => {
                let record = OtpRecord {
                    code,
                    received_at: Utc::now(),
                    mailbox: mailbox.or_else(|| self.mailbox.clone()).unwrap_or_default(),
                    sender: source,
                };
                info!(code = %mask_code(&record.code), sender = %record.sender, "OTP received");
                if let Err(e) = self.stores.set_last_otp(&record) {
                    warn!(error = %e, "Failed to cache OTP");
                }
                self.last_otp = Some(record.clone());
                self.broadcast(ObserverEvent::OtpReceived {
                    record: record.clone(),
                });
                self.notifier
                    .notify(&Notification::otp_received(&record.code, &record.sender));
                self.start_fill(record.code);
            }
            InboundEvent::StatusSnapshot { mailbox } => {
                if let Some(address) = mailbox {
                    self.remember_mailbox(&address);
                }
            }
            InboundEvent::Heartbeat => self.send(ClientFrame::Pong),
            InboundEvent::KeepAliveAck => debug!("Keep-alive acknowledged"),
        }
    }

    fn remember_mailbox(&mut self, address: &str) {
        if let Err(e) = self.stores.set_current_email(address) {
            warn!(error = %e, "Failed to cache mailbox");
        }
        self.mailbox = Some(address.to_string());
    }

    /// Hands the code to the active page. Completion is broadcast as
    /// `FillCompleted` and forwarded to the returned receiver.
    fn start_fill(&self, code: String) -> Option<oneshot::Receiver<FillOutcome>> {
        let pending_outcome = self.pages.submit_fill(code)?;
        let observers = self.observers.clone();
        let (reply, outcome) = oneshot::channel();
        tokio::spawn(async move {
            let Ok(result) = pending_outcome.await else {
                return;
            };
            let _ = observers.send(ObserverEvent::FillCompleted {
                outcome: result.clone(),
            });
            let _ = reply.send(result);
        });
        Some(outcome)
    }

    fn copy_last(&mut self) -> Result<bool> {
        let Some(record) = &self.last_otp else {
            return Ok(false);
        };
        self.clipboard.set_text(&record.code)?;
        info!(code = %mask_code(&record.code), "OTP copied to clipboard");
        Ok(true)
    }

    fn copy_mailbox(&mut self) -> Result<bool> {
        let Some(address) = &self.mailbox else {
            return Ok(false);
        };
        self.clipboard.set_text(address)?;
        info!(mailbox = %address, "Mailbox address copied to clipboard");
        Ok(true)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection_state: self
                .session
                .as_ref()
                .map(|session| session.connection_state)
                .unwrap_or(ConnectionState::Disconnected),
            session: self.session.clone(),
            current_mailbox: self.mailbox.clone(),
            last_otp: self.last_otp.clone(),
        }
    }
}

async fn next_link_event(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn keepalive_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Priority, RecordingNotifier};
    use crate::pages::LocalPages;
    use fill_core::{Element, FillOptions, MemoryPage, PageSnapshot};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Peer {
        to_agent: mpsc::UnboundedSender<LinkEvent>,
        from_agent: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn send(&self, text: &str) {
            self.to_agent.send(LinkEvent::Frame(text.to_string())).unwrap();
        }

        fn close(&self) {
            self.to_agent
                .send(LinkEvent::Closed {
                    reason: "server restart".to_string(),
                })
                .unwrap();
        }

        fn drain(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.from_agent.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    #[derive(Default)]
    struct FakeState {
        attempts: Vec<Url>,
        failures_left: usize,
        peers: Vec<Peer>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.state.lock().unwrap().attempts.len()
        }

        fn fail_next(&self, count: usize) {
            self.state.lock().unwrap().failures_left = count;
        }

        fn take_peer(&self) -> Peer {
            self.state.lock().unwrap().peers.pop().expect("no open link")
        }
    }

    impl Connector for FakeConnector {
        async fn connect(&self, url: &Url) -> std::result::Result<Link, TransportError> {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(url.clone());
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(TransportError::ConnectFailed {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            let (outbound, from_agent) = mpsc::unbounded_channel();
            let (to_agent, inbound) = mpsc::unbounded_channel();
            state.peers.push(Peer {
                to_agent,
                from_agent,
            });
            Ok(Link { outbound, inbound })
        }
    }

    #[derive(Clone, Default)]
    struct SharedClipboard(Arc<Mutex<Option<String>>>);

    impl SharedClipboard {
        fn contents(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Clipboard for SharedClipboard {
        fn set_text(&mut self, text: &str) -> Result<()> {
            *self.0.lock().unwrap() = Some(text.to_string());
            Ok(())
        }
    }

    struct Harness {
        handle: ChannelHandle,
        connector: FakeConnector,
        notifier: Arc<RecordingNotifier>,
        clipboard: SharedClipboard,
        pages: Arc<LocalPages>,
    }

    fn start() -> Harness {
        let connector = FakeConnector::default();
        let notifier = Arc::new(RecordingNotifier::default());
        let clipboard = SharedClipboard::default();
        let pages = Arc::new(LocalPages::new(FillOptions::default()));
        let handle = ChannelManager::new(
            AgentConfig::default(),
            connector.clone(),
            Stores::in_memory(),
            pages.clone(),
        )
        .with_notifier(notifier.clone())
        .with_clipboard(Box::new(clipboard.clone()))
        .spawn();
        Harness {
            handle,
            connector,
            notifier,
            clipboard,
            pages,
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    async fn connected(harness: &Harness) -> Peer {
        harness.handle.connect("alice").await.unwrap();
        settle().await;
        harness.connector.take_peer()
    }

    #[tokio::test(start_paused = true)]
    async fn sends_status_after_connecting() {
        let harness = start();
        let mut peer = connected(&harness).await;

        assert_eq!(peer.drain(), vec![r#"{"type":"status"}"#.to_string()]);
        let snapshot = harness.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.connection_state, ConnectionState::Connected);
        assert_eq!(
            snapshot.session.map(|session| session.user_identity),
            Some("alice".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_for_same_identity() {
        let harness = start();
        let _peer = connected(&harness).await;

        harness.handle.connect("alice").await.unwrap();
        settle().await;
        assert_eq!(harness.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_close_schedules_exactly_one_reconnect() {
        let harness = start();
        let peer = connected(&harness).await;

        peer.close();
        settle().await;
        assert_eq!(
            harness.handle.snapshot().await.unwrap().connection_state,
            ConnectionState::Disconnected
        );

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(harness.connector.attempts(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.connector.attempts(), 2);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.connector.attempts(), 2);
        assert_eq!(
            harness.handle.snapshot().await.unwrap().connection_state,
            ConnectionState::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_cancels_pending_reconnect() {
        let harness = start();
        let peer = connected(&harness).await;

        peer.close();
        settle().await;
        harness.handle.connect("alice").await.unwrap();
        settle().await;
        assert_eq!(harness.connector.attempts(), 2);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(harness.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_retries_after_delay() {
        let harness = start();
        harness.connector.fail_next(1);
        harness.handle.connect("alice").await.unwrap();
        settle().await;
        assert_eq!(harness.connector.attempts(), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.connector.attempts(), 2);
        assert_eq!(
            harness.handle.snapshot().await.unwrap().connection_state,
            ConnectionState::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_reconnect_and_drops_session() {
        let harness = start();
        let peer = connected(&harness).await;

        peer.close();
        settle().await;
        harness.handle.disconnect().await.unwrap();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(harness.connector.attempts(), 1);
        let snapshot = harness.handle.snapshot().await.unwrap();
        assert!(snapshot.session.is_none());
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);

        // Safe when already disconnected.
        harness.handle.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_keepalive_probe_per_period() {
        let harness = start();
        let mut peer = connected(&harness).await;
        peer.drain();

        sleep(Duration::from_secs(24)).await;
        assert!(peer.drain().is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(peer.drain(), vec![r#"{"type":"ping"}"#.to_string()]);

        sleep(Duration::from_secs(25)).await;
        assert_eq!(peer.drain(), vec![r#"{"type":"ping"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_ping_gets_immediate_pong() {
        let harness = start();
        let mut peer = connected(&harness).await;
        peer.drain();

        peer.send(r#"{"type":"ping"}"#);
        settle().await;
        assert_eq!(peer.drain(), vec![r#"{"type":"pong"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let harness = start();
        let mut peer = connected(&harness).await;
        peer.drain();

        peer.send("not json");
        peer.send(r#"{"type":"teleport"}"#);
        peer.send(r#"{"type":"ping"}"#);
        settle().await;

        assert_eq!(peer.drain(), vec![r#"{"type":"pong"}"#.to_string()]);
        let snapshot = harness.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.connection_state, ConnectionState::Connected);
        assert!(snapshot.session.unwrap().last_seen_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn otp_is_recorded_notified_and_filled() {
        let harness = start();
        let mut page = PageSnapshot::default();
        let field = page.push(
            None,
            Element::new("input")
                .with_attr("name", "otp_code")
                .with_attr("maxlength", "6")
                .with_rect(0.0, 100.0, 200.0, 32.0),
        );
        let page = Arc::new(Mutex::new(MemoryPage::new(page)));
        harness.pages.open(Arc::clone(&page));

        let mut events = harness.handle.subscribe();
        let peer = connected(&harness).await;

        peer.send(r#"{"type":"new_email","email":"box@relay.test"}"#);
        peer.send(r#"{"type":"otp","otp":"481 516","sender":"Acme"}"#);
        sleep(Duration::from_millis(50)).await;

        let snapshot = harness.handle.snapshot().await.unwrap();
        let record = snapshot.last_otp.unwrap();
        assert_eq!(record.code, "481516");
        assert_eq!(record.mailbox, "box@relay.test");
        assert_eq!(snapshot.current_mailbox.as_deref(), Some("box@relay.test"));

        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].priority, Priority::High);

        assert_eq!(page.lock().unwrap().value(field), Some("481516"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen
            .iter()
            .any(|event| matches!(event, ObserverEvent::OtpReceived { .. })));
        assert!(seen.iter().any(
            |event| matches!(event, ObserverEvent::FillCompleted { outcome } if outcome.filled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn otp_without_active_page_is_kept_for_later() {
        let harness = start();
        let peer = connected(&harness).await;

        peer.send(r#"{"type":"otp","code":"777111","sender":"Acme"}"#);
        settle().await;

        assert_eq!(harness.handle.manual_fill().await.unwrap(), None);
        let notification = Notification::otp_received("777111", "Acme");
        assert!(harness
            .handle
            .handle_action(&notification, NotificationAction::Copy)
            .await
            .unwrap()
            .is_none());
        assert_eq!(harness.clipboard.contents().as_deref(), Some("777111"));
        assert_eq!(
            harness.handle.snapshot().await.unwrap().last_otp.map(|otp| otp.code),
            Some("777111".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mailbox_copy_button_copies_the_address() {
        let harness = start();
        assert!(!harness.handle.copy_mailbox().await.unwrap());

        let peer = connected(&harness).await;
        peer.send(r#"{"type":"new_email","email":"box@relay.test"}"#);
        settle().await;

        let notification = harness
            .notifier
            .sent()
            .into_iter()
            .find(|sent| sent.kind == NotificationKind::Mailbox)
            .expect("mailbox notification");
        assert_eq!(notification.actions, vec![NotificationAction::Copy]);

        harness
            .handle
            .handle_action(&notification, NotificationAction::Copy)
            .await
            .unwrap();
        assert_eq!(harness.clipboard.contents().as_deref(), Some("box@relay.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_link_and_stops_manager() {
        let harness = start();
        let mut peer = connected(&harness).await;

        harness.handle.shutdown().await.unwrap();
        while peer.from_agent.recv().await.is_some() {}

        assert!(matches!(
            harness.handle.snapshot().await,
            Err(AgentError::ManagerStopped)
        ));
        sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_blank_identity() {
        let harness = start();
        assert!(matches!(
            harness.handle.connect("  ").await,
            Err(AgentError::InvalidChannel(_))
        ));
        assert_eq!(harness.connector.attempts(), 0);
    }
}
