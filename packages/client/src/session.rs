//! Session state machine.
//!
//! [`SessionCore`] owns all session state and performs no I/O. Every input,
//! whether a UI call or a transport event, returns the [`SessionAction`]s the
//! caller must execute, in order. The async driver in `runner` is one such
//! caller; tests are another.

use std::{sync::Arc, time::Duration};

use sajiki_shared::{settings::SettingsStore, time::Clock};

use crate::{
    domain::{
        ChannelTarget, ConnectionState, DEFAULT_NICKNAME, DEFAULT_RELAY_URL, NICKNAME_KEY,
        ParticipantId, RECONNECT_DELAY, may_broadcast_time, should_reconnect,
    },
    protocol::{BulletPayload, ControlFrame, InboundEnvelope, InboundFrame},
    state::{ChatEntry, ChatState, SessionEvent, SessionSnapshot, WatchTogetherState},
};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Delay between an abnormal close and the reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a new socket to `url`, replacing any current one
    Open { url: String },
    /// Send a frame on the current socket
    Send(ControlFrame),
    /// Close the current socket
    Close,
    /// Call [`SessionCore::reconnect_due`] after `delay`
    ScheduleReconnect { delay: Duration },
    /// Drop any pending reconnect timer
    CancelReconnect,
    /// Publish an event to subscribers
    Emit(SessionEvent),
}

/// Sans-IO session client
pub struct SessionCore {
    config: SessionConfig,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    target: Option<ChannelTarget>,
    connection: ConnectionState,
    ready: bool,
    nickname: String,
    own_uuid: ParticipantId,
    chat: ChatState,
    watch: WatchTogetherState,
    reconnect_pending: bool,
}

impl SessionCore {
    /// Create a disconnected session. The nickname is read from `settings`.
    pub fn new(
        config: SessionConfig,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let nickname = settings
            .get(NICKNAME_KEY)
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string());

        Self {
            config,
            settings,
            clock,
            target: None,
            connection: ConnectionState::Disconnected,
            ready: false,
            nickname,
            own_uuid: ParticipantId::UNSET,
            chat: ChatState::default(),
            watch: WatchTogetherState::default(),
            reconnect_pending: false,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn own_uuid(&self) -> ParticipantId {
        self.own_uuid
    }

    pub fn target(&self) -> Option<&ChannelTarget> {
        self.target.as_ref()
    }

    pub fn chat(&self) -> &ChatState {
        &self.chat
    }

    pub fn watch(&self) -> &WatchTogetherState {
        &self.watch
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let watch = self
            .target
            .as_ref()
            .filter(|target| target.is_watch_together())
            .map(|_| self.watch.clone());

        SessionSnapshot {
            connection: self.connection,
            ready: self.ready,
            target: self.target.clone(),
            nickname: self.nickname.clone(),
            own_uuid: self.own_uuid,
            chat: self.chat.clone(),
            watch,
            reconnect_pending: self.reconnect_pending,
        }
    }

    // ========================================
    // Connection lifecycle
    // ========================================

    /// Open a session to `target`. Any current socket is replaced.
    pub fn connect(&mut self, target: ChannelTarget) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(SessionAction::CancelReconnect);
        }

        tracing::info!(
            "Connecting to {} (channel '{}')",
            self.config.relay_url,
            target.channel_name()
        );
        self.target = Some(target);
        self.connection = ConnectionState::Connecting;
        self.ready = false;

        actions.push(SessionAction::Open {
            url: self.config.relay_url.clone(),
        });
        actions.push(self.connection_event());
        actions
    }

    /// Close the session and reset all state.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        tracing::info!("Disconnecting session");
        self.target = None;
        self.connection = ConnectionState::Disconnected;
        self.ready = false;
        self.own_uuid = ParticipantId::UNSET;
        self.reconnect_pending = false;
        self.chat.reset();
        self.watch.reset();

        vec![
            SessionAction::CancelReconnect,
            SessionAction::Close,
            self.connection_event(),
            SessionAction::Emit(SessionEvent::Reset),
        ]
    }

    /// The transport opened: announce the name, then join the channel.
    pub fn handle_open(&mut self) -> Vec<SessionAction> {
        let Some(target) = self.target.as_ref() else {
            tracing::debug!("Ignoring open event without a session target");
            return Vec::new();
        };
        let channel_name = target.channel_name();

        let mut actions = vec![
            SessionAction::Send(ControlFrame::SetName {
                name: self.nickname.clone(),
            }),
            SessionAction::Send(ControlFrame::JoinChannel {
                channel_name: channel_name.clone(),
            }),
        ];
        // ready only once both frames are queued
        self.connection = ConnectionState::Open;
        self.ready = true;
        tracing::info!("Joined channel '{}' as '{}'", channel_name, self.nickname);

        actions.push(self.connection_event());
        actions
    }

    /// The transport closed with `code`.
    pub fn handle_close(&mut self, code: u16) -> Vec<SessionAction> {
        if self.target.is_none() {
            return Vec::new();
        }
        self.connection = ConnectionState::Closed;
        self.ready = false;

        let mut actions = vec![self.connection_event()];
        if should_reconnect(code) {
            if !self.reconnect_pending {
                self.reconnect_pending = true;
                let delay = self.config.reconnect_delay;
                tracing::warn!(
                    "Connection dropped (code {}). Reconnecting in {:?}",
                    code,
                    delay
                );
                actions.push(SessionAction::ScheduleReconnect { delay });
                actions.push(SessionAction::Emit(SessionEvent::ReconnectScheduled {
                    delay,
                }));
            }
        } else {
            tracing::info!("Connection closed (code {})", code);
        }
        actions
    }

    /// A transport-level error. Reconnection is left to the close event.
    pub fn handle_error(&mut self, error: &str) -> Vec<SessionAction> {
        tracing::error!("WebSocket error: {}", error);
        self.ready = false;
        vec![
            SessionAction::Emit(SessionEvent::TransportError(error.to_string())),
            self.connection_event(),
        ]
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<SessionAction> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;

        let Some(target) = self.target.as_ref() else {
            return Vec::new();
        };
        if self.connection != ConnectionState::Closed {
            return Vec::new();
        }

        tracing::info!(
            "Reconnecting to {} (channel '{}')",
            self.config.relay_url,
            target.channel_name()
        );
        self.connection = ConnectionState::Connecting;
        vec![
            SessionAction::Open {
                url: self.config.relay_url.clone(),
            },
            self.connection_event(),
        ]
    }

    // ========================================
    // Inbound frames
    // ========================================

    /// A text frame arrived. Malformed frames are logged and dropped.
    pub fn handle_text(&mut self, text: &str) -> Vec<SessionAction> {
        let Some(target) = self.target.as_ref() else {
            return Vec::new();
        };
        let watch_together = target.is_watch_together();

        let envelope = match InboundEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                return Vec::new();
            }
        };

        if watch_together {
            self.handle_watch_frame(envelope)
        } else {
            self.handle_chat_frame(envelope)
        }
    }

    fn handle_chat_frame(&mut self, envelope: InboundEnvelope) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if let Some((uuid, count)) = envelope.presence()
            && self.chat.record_presence(uuid, count)
        {
            actions.push(SessionAction::Emit(SessionEvent::ViewerCountChanged(count)));
        }

        let entry = ChatEntry {
            received_at: self.clock.now_millis(),
            payload: envelope.raw,
        };
        self.chat.messages.push(entry.clone());
        actions.push(SessionAction::Emit(SessionEvent::MessageReceived(entry)));
        actions
    }

    fn handle_watch_frame(&mut self, envelope: InboundEnvelope) -> Vec<SessionAction> {
        match envelope.frame {
            InboundFrame::ChannelData {
                uuid,
                now_viewer_count,
            } => self.handle_channel_data(uuid, now_viewer_count),
            InboundFrame::Bullet { sender, msg } => match BulletPayload::decode(&msg) {
                Ok(payload) => self.handle_bullet(sender, payload),
                Err(e) => {
                    tracing::warn!("Dropping malformed bullet message from {}: {}", sender, e);
                    Vec::new()
                }
            },
            InboundFrame::Presence {
                uuid,
                now_viewer_count,
            } => {
                self.chat.record_presence(uuid, now_viewer_count);
                self.set_watch_viewer_count(now_viewer_count)
            }
            InboundFrame::Other => {
                tracing::debug!("Ignoring frame: {}", envelope.raw);
                Vec::new()
            }
        }
    }

    fn handle_channel_data(&mut self, uuid: ParticipantId, viewer_count: u64) -> Vec<SessionAction> {
        let previous = std::mem::replace(&mut self.own_uuid, uuid);
        self.chat.record_presence(uuid, viewer_count);
        tracing::info!("Assigned participant id {} ({} viewer(s))", uuid, viewer_count);

        let mut actions = vec![SessionAction::Emit(SessionEvent::Joined { own_uuid: uuid })];
        actions.extend(self.set_watch_viewer_count(viewer_count));

        let was_host = self.watch.is_host;
        self.watch.rejoin(previous, uuid);
        if was_host && !self.watch.is_host {
            tracing::info!("Dropped host role held as {}", previous);
            actions.push(self.host_event());
        }

        // first to join becomes host
        if viewer_count == 1 {
            self.watch.claim_host(uuid, &self.nickname);
            tracing::info!("Claimed host as '{}'", self.nickname);
            actions.push(self.host_event());
        }

        actions.extend(self.bullet_action(&BulletPayload::GetProp));
        actions
    }

    fn handle_bullet(&mut self, sender: ParticipantId, payload: BulletPayload) -> Vec<SessionAction> {
        match payload {
            BulletPayload::SyncTime { value } => {
                if self.watch.accept_time(sender, value) {
                    vec![SessionAction::Emit(SessionEvent::TimeSynced {
                        from: sender,
                        value,
                    })]
                } else {
                    tracing::trace!("Ignoring time sync echo from host {}", sender);
                    Vec::new()
                }
            }
            BulletPayload::GetProp => {
                if self.watch.answers_config_requests() {
                    tracing::debug!("Answering config request from {}", sender);
                    self.config_broadcast()
                } else {
                    Vec::new()
                }
            }
            BulletPayload::SetProp {
                hostname,
                host_uuid,
                lock_state,
                epoch,
            } => {
                let was_locked = self.watch.locked;
                if !self
                    .watch
                    .apply_config(self.own_uuid, &hostname, host_uuid, lock_state, epoch)
                {
                    tracing::debug!(
                        "Discarding stale config from {} (epoch {:?} < {})",
                        sender,
                        epoch,
                        self.watch.config_epoch
                    );
                    return Vec::new();
                }

                let mut actions = vec![self.host_event()];
                if was_locked != lock_state {
                    actions.push(SessionAction::Emit(SessionEvent::LockChanged(lock_state)));
                }
                actions
            }
            BulletPayload::Unknown => Vec::new(),
        }
    }

    // ========================================
    // UI operations
    // ========================================

    /// Change and persist the display name; re-announce it when connected.
    pub fn set_nickname(&mut self, name: &str) -> Vec<SessionAction> {
        self.nickname = name.to_string();
        if let Err(e) = self.settings.set(NICKNAME_KEY, name) {
            tracing::warn!("Failed to persist nickname: {}", e);
        }

        let mut actions = vec![SessionAction::Emit(SessionEvent::NicknameChanged(
            name.to_string(),
        ))];
        if self.connection == ConnectionState::Open {
            actions.push(SessionAction::Send(ControlFrame::SetName {
                name: name.to_string(),
            }));
        }
        actions
    }

    /// Broadcast a chat message to the channel.
    pub fn send_message(&mut self, message: &str) -> Vec<SessionAction> {
        if self.connection != ConnectionState::Open {
            tracing::debug!("Not connected; dropping outgoing message");
            return Vec::new();
        }
        vec![SessionAction::Send(ControlFrame::SendBulletMessage {
            msg: message.to_string(),
        })]
    }

    /// Broadcast the local playback position (seconds).
    ///
    /// Suppressed while locked unless the local participant is host.
    pub fn sync_time(&mut self, value: f64) -> Vec<SessionAction> {
        if !self.is_watch_session() || self.connection != ConnectionState::Open {
            return Vec::new();
        }
        if !may_broadcast_time(self.watch.locked, self.watch.is_host) {
            tracing::debug!("Session is locked; not broadcasting time");
            return Vec::new();
        }
        self.bullet_action(&BulletPayload::SyncTime { value })
    }

    /// Lock or unlock time broadcasting. Only the host may do this.
    pub fn set_locked(&mut self, locked: bool) -> Vec<SessionAction> {
        if !self.watch.is_host {
            tracing::debug!("Only the host can change the lock state");
            return Vec::new();
        }
        self.watch.locked = locked;
        self.watch.config_epoch += 1;

        let mut actions = vec![SessionAction::Emit(SessionEvent::LockChanged(locked))];
        if self.connection == ConnectionState::Open {
            actions.extend(self.config_broadcast());
        }
        actions
    }

    // ========================================
    // Helpers
    // ========================================

    fn is_watch_session(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(ChannelTarget::is_watch_together)
    }

    fn set_watch_viewer_count(&mut self, count: u64) -> Vec<SessionAction> {
        if self.watch.viewer_count == count {
            return Vec::new();
        }
        self.watch.viewer_count = count;
        vec![SessionAction::Emit(SessionEvent::ViewerCountChanged(count))]
    }

    fn config_broadcast(&self) -> Vec<SessionAction> {
        self.bullet_action(&BulletPayload::SetProp {
            hostname: self.nickname.clone(),
            host_uuid: self.own_uuid,
            lock_state: self.watch.locked,
            epoch: Some(self.watch.config_epoch),
        })
    }

    fn bullet_action(&self, payload: &BulletPayload) -> Vec<SessionAction> {
        match ControlFrame::bullet(payload) {
            Ok(frame) => vec![SessionAction::Send(frame)],
            Err(e) => {
                tracing::error!("Failed to encode bullet payload: {}", e);
                Vec::new()
            }
        }
    }

    fn connection_event(&self) -> SessionAction {
        SessionAction::Emit(SessionEvent::ConnectionChanged {
            state: self.connection,
            ready: self.ready,
        })
    }

    fn host_event(&self) -> SessionAction {
        SessionAction::Emit(SessionEvent::HostChanged {
            host_name: self.watch.host_name.clone(),
            host_uuid: self.watch.host_uuid,
            is_host: self.watch.is_host,
        })
    }
}
