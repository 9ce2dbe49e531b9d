//! Async session driver.
//!
//! [`SessionClient`] is the handle the UI holds. It spawns a driver task that
//! owns the [`SessionCore`], dials the relay with `tokio-tungstenite`, runs the
//! reconnect timer, and executes the actions the core returns. Every input is
//! handled on that single task, so session state needs no locks.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sajiki_shared::{settings::SettingsStore, time::Clock};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::{AbortHandle, JoinHandle},
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::{
    domain::{ABNORMAL_CLOSURE, ChannelTarget, NO_STATUS_RECEIVED},
    error::ClientError,
    protocol::ControlFrame,
    session::{SessionAction, SessionConfig, SessionCore},
    state::{SessionEvent, SessionSnapshot},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Request from the handle to the driver
#[derive(Debug)]
enum Command {
    Connect(ChannelTarget),
    Disconnect,
    SetNickname(String),
    SendMessage(String),
    SyncTime(f64),
    SetLocked(bool),
}

/// Event reported by a connection task
#[derive(Debug)]
enum TransportEvent {
    Opened,
    Text(String),
    Error(String),
    Closed(u16),
}

/// Transport event tagged with the connection that produced it
#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: TransportEvent,
}

/// Handle to a running session
///
/// Dropping the handle tears the session down: the socket is closed and any
/// pending reconnect is cancelled.
pub struct SessionClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    driver: JoinHandle<()>,
}

impl SessionClient {
    /// Spawn a disconnected session on the current Tokio runtime
    pub fn spawn(
        config: SessionConfig,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = SessionCore::new(config, settings, clock);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        let driver = SessionDriver {
            core,
            snapshot: snapshot_tx,
            events: events_tx.clone(),
            transport_tx,
            reconnect_tx,
            connection: None,
            generation: 0,
            reconnect_timer: None,
        };
        let driver = tokio::spawn(driver.run(commands_rx, transport_rx, reconnect_rx));

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
            driver,
        }
    }

    /// Connect to `target`, replacing any current session
    pub fn connect(&self, target: ChannelTarget) -> Result<(), ClientError> {
        self.send(Command::Connect(target))
    }

    /// Close the socket and reset all session state
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    /// Change and persist the display name
    pub fn set_nickname(&self, name: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::SetNickname(name.into()))
    }

    /// Broadcast a chat message
    pub fn send_message(&self, message: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::SendMessage(message.into()))
    }

    /// Broadcast the local playback position in seconds
    pub fn sync_time(&self, seconds: f64) -> Result<(), ClientError> {
        self.send(Command::SyncTime(seconds))
    }

    /// Lock or unlock time broadcasting (host only)
    pub fn set_locked(&self, locked: bool) -> Result<(), ClientError> {
        self.send(Command::SetLocked(locked))
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current session state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified after every state change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session state satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, ClientError> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Tear the session down and wait for the driver to finish
    pub async fn shutdown(self) {
        let Self {
            commands, driver, ..
        } = self;
        drop(commands);
        if let Err(e) = driver.await {
            tracing::warn!("Session driver ended abnormally: {}", e);
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Outgoing side of the current socket
struct Connection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
}

struct SessionDriver {
    core: SessionCore,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    transport_tx: mpsc::UnboundedSender<Tagged>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    connection: Option<Connection>,
    generation: u64,
    reconnect_timer: Option<AbortHandle>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport: mpsc::UnboundedReceiver<Tagged>,
        mut reconnect: mpsc::UnboundedReceiver<()>,
    ) {
        loop {
            let actions = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(tagged) = transport.recv() => self.handle_transport(tagged),
                Some(()) = reconnect.recv() => {
                    self.reconnect_timer = None;
                    self.core.reconnect_due()
                }
            };
            self.execute(actions);
        }

        tracing::debug!("Session handle dropped; tearing down");
        let actions = self.core.disconnect();
        self.execute(actions);
    }

    fn handle_command(&mut self, command: Command) -> Vec<SessionAction> {
        match command {
            Command::Connect(target) => self.core.connect(target),
            Command::Disconnect => self.core.disconnect(),
            Command::SetNickname(name) => self.core.set_nickname(&name),
            Command::SendMessage(message) => self.core.send_message(&message),
            Command::SyncTime(seconds) => self.core.sync_time(seconds),
            Command::SetLocked(locked) => self.core.set_locked(locked),
        }
    }

    fn handle_transport(&mut self, tagged: Tagged) -> Vec<SessionAction> {
        let current = self.connection.as_ref().map(|c| c.generation);
        if current != Some(tagged.generation) {
            tracing::trace!(
                "Ignoring event from stale connection #{}: {:?}",
                tagged.generation,
                tagged.event
            );
            return Vec::new();
        }

        match tagged.event {
            TransportEvent::Opened => self.core.handle_open(),
            TransportEvent::Text(text) => self.core.handle_text(&text),
            TransportEvent::Error(error) => self.core.handle_error(&error),
            TransportEvent::Closed(code) => {
                self.connection = None;
                self.core.handle_close(code)
            }
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Open { url } => self.open(url),
                SessionAction::Send(frame) => self.send_frame(&frame),
                SessionAction::Close => {
                    // dropping the sender makes the connection task close the socket
                    self.connection = None;
                }
                SessionAction::ScheduleReconnect { delay } => {
                    self.cancel_reconnect();
                    let reconnect_tx = self.reconnect_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = reconnect_tx.send(());
                    });
                    self.reconnect_timer = Some(timer.abort_handle());
                }
                SessionAction::CancelReconnect => self.cancel_reconnect(),
                SessionAction::Emit(event) => {
                    // no subscribers is fine
                    let _ = self.events.send(event);
                }
            }
        }
        self.snapshot.send_replace(self.core.snapshot());
    }

    fn open(&mut self, url: String) {
        self.generation += 1;
        let generation = self.generation;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.connection = Some(Connection {
            generation,
            outgoing: outgoing_tx,
        });

        tracing::debug!("Opening connection #{} to {}", generation, url);
        tokio::spawn(run_connection(
            url,
            generation,
            self.transport_tx.clone(),
            outgoing_rx,
        ));
    }

    fn send_frame(&self, frame: &ControlFrame) {
        let Some(connection) = self.connection.as_ref() else {
            tracing::debug!("No open connection; dropping {:?}", frame);
            return;
        };
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize frame: {}", e);
                return;
            }
        };
        if connection.outgoing.send(Message::Text(json.into())).is_err() {
            tracing::warn!("Connection #{} is gone; frame dropped", connection.generation);
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            tracing::debug!("Reconnect timer cancelled");
        }
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        self.cancel_reconnect();
    }
}

/// Run one socket until it closes, reporting everything as [`TransportEvent`]s.
///
/// A failed dial, a read error, or a stream ending without a close frame all
/// end in `Closed(1006)`. Dropping the outgoing sender closes the socket
/// cleanly.
async fn run_connection(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<Tagged>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send(Tagged { generation, event });
    };

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            report(TransportEvent::Error(e.to_string()));
            report(TransportEvent::Closed(ABNORMAL_CLOSURE));
            return;
        }
    };
    tracing::info!("Connected to relay {}", url);
    report(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut close_code = None;

    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        tracing::warn!("Failed to send frame: {}", e);
                        report(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    // closed locally; nobody listens for the outcome
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!("Close frame not sent: {}", e);
                    }
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => report(TransportEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|frame| u16::from(frame.code))
                        .unwrap_or(NO_STATUS_RECEIVED);
                    tracing::info!("Relay closed the connection (code {})", code);
                    close_code = Some(code);
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!("Ignoring binary frame ({} bytes)", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if close_code.is_none() {
                        tracing::warn!("WebSocket read error: {}", e);
                        report(TransportEvent::Error(e.to_string()));
                    }
                    break;
                }
                None => break,
            },
        }
    }

    report(TransportEvent::Closed(close_code.unwrap_or(ABNORMAL_CLOSURE)));
}

#[cfg(test)]
mod tests {
    use sajiki_shared::{settings::MemorySettingsStore, time::FixedClock};
    use serde_json::json;

    use super::*;

    /// Driver whose current connection is `generation`, without a real socket
    fn driver_with_connection(generation: u64) -> SessionDriver {
        let core = SessionCore::new(
            SessionConfig::default(),
            Arc::new(MemorySettingsStore::new()),
            Arc::new(FixedClock::new(1_000)),
        );
        let (snapshot, _) = watch::channel(core.snapshot());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transport_tx, _) = mpsc::unbounded_channel();
        let (reconnect_tx, _) = mpsc::unbounded_channel();
        let (outgoing, _) = mpsc::unbounded_channel();

        let mut driver = SessionDriver {
            core,
            snapshot,
            events,
            transport_tx,
            reconnect_tx,
            connection: Some(Connection {
                generation,
                outgoing,
            }),
            generation,
            reconnect_timer: None,
        };
        driver.core.connect(ChannelTarget::chat("lobby"));
        driver
    }

    fn tagged(generation: u64, event: TransportEvent) -> Tagged {
        Tagged { generation, event }
    }

    fn chat_frame(text: &str) -> String {
        json!({"type": "bulletMessage", "uuid": 3, "msg": text}).to_string()
    }

    #[test]
    fn test_events_from_replaced_connection_are_ignored() {
        // テスト項目: 置き換えられた接続からのイベントは破棄される
        // given (前提条件):
        let mut driver = driver_with_connection(2);
        driver.handle_transport(tagged(2, TransportEvent::Opened));

        // when (操作):
        let text = driver.handle_transport(tagged(1, TransportEvent::Text(chat_frame("stale"))));
        let closed = driver.handle_transport(tagged(1, TransportEvent::Closed(ABNORMAL_CLOSURE)));

        // then (期待する結果):
        assert!(text.is_empty());
        assert!(closed.is_empty());
        assert!(driver.core.chat().messages.is_empty());
        assert!(driver.core.is_ready());
        assert!(!driver.core.reconnect_pending());
        assert!(driver.connection.is_some());
    }

    #[test]
    fn test_events_from_current_connection_are_applied() {
        // テスト項目: 現在の接続からのイベントはセッションに反映される
        // given (前提条件):
        let mut driver = driver_with_connection(2);
        driver.handle_transport(tagged(2, TransportEvent::Opened));

        // when (操作):
        driver.handle_transport(tagged(2, TransportEvent::Text(chat_frame("fresh"))));
        driver.handle_transport(tagged(2, TransportEvent::Closed(ABNORMAL_CLOSURE)));

        // then (期待する結果):
        assert_eq!(driver.core.chat().messages.len(), 1);
        assert_eq!(driver.core.chat().messages[0].text(), Some("fresh"));
        assert!(driver.core.reconnect_pending());
        assert!(driver.connection.is_none());
    }
}
