//! Observable session state.
//!
//! The driver publishes a [`SessionSnapshot`] after every step and emits
//! [`SessionEvent`]s for the changes it makes.

use std::{collections::BTreeSet, time::Duration};

use serde_json::Value;

use crate::domain::{ChannelTarget, ConnectionState, ParticipantId};

/// A received envelope, stamped with the local receive time
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    /// Unix timestamp (milliseconds) when the frame was received
    pub received_at: i64,
    /// Raw frame as sent by the relay
    pub payload: Value,
}

impl ChatEntry {
    /// Sender id, if the frame carries one
    pub fn sender(&self) -> Option<ParticipantId> {
        self.payload
            .get("uuid")
            .and_then(Value::as_u64)
            .map(ParticipantId::new)
    }

    /// Sender display name, if the frame carries one
    pub fn sender_name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    /// Chat text of a `bulletMessage` frame
    pub fn text(&self) -> Option<&str> {
        match self.payload.get("type").and_then(Value::as_str) {
            Some("bulletMessage") => self.payload.get("msg").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Chat and presence state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Every received envelope in arrival order
    pub messages: Vec<ChatEntry>,
    /// Distinct participant ids seen in presence updates
    pub seen_participants: BTreeSet<ParticipantId>,
    /// Viewer count as last reported by the relay
    pub viewer_count: u64,
}

impl ChatState {
    /// Record a presence update. Returns `true` when the viewer count changed.
    pub fn record_presence(&mut self, uuid: ParticipantId, now_viewer_count: u64) -> bool {
        self.seen_participants.insert(uuid);
        let changed = self.viewer_count != now_viewer_count;
        self.viewer_count = now_viewer_count;
        changed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Shared co-viewing state
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTogetherState {
    /// Last playback time received from a peer; `-1.0` when unset
    pub synced_time: f64,
    pub is_host: bool,
    pub host_name: String,
    pub host_uuid: ParticipantId,
    /// When set, only the host may broadcast playback time
    pub locked: bool,
    pub viewer_count: u64,
    /// Version of the last applied host configuration
    pub config_epoch: u64,
}

impl Default for WatchTogetherState {
    fn default() -> Self {
        Self {
            synced_time: -1.0,
            is_host: false,
            host_name: String::new(),
            host_uuid: ParticipantId::UNSET,
            locked: true,
            viewer_count: 0,
            config_epoch: 0,
        }
    }
}

impl WatchTogetherState {
    /// Declare the local participant host and start a new configuration epoch
    pub fn claim_host(&mut self, own_uuid: ParticipantId, nickname: &str) {
        self.is_host = true;
        self.host_uuid = own_uuid;
        self.host_name = nickname.to_string();
        self.config_epoch += 1;
    }

    /// Forget the host lineage tied to a previous participant id.
    ///
    /// Called when the relay assigns an id; a changed id means the old one is
    /// gone, so a host role held under it is dropped along with its epochs.
    pub fn rejoin(&mut self, previous_uuid: ParticipantId, own_uuid: ParticipantId) {
        if previous_uuid == own_uuid {
            return;
        }
        if !previous_uuid.is_unset() && self.host_uuid == previous_uuid {
            self.host_uuid = ParticipantId::UNSET;
            self.host_name.clear();
        }
        self.is_host = false;
        self.config_epoch = 0;
    }

    /// Apply a received host configuration.
    ///
    /// Epochs are only comparable within one host's lineage: a broadcast from
    /// the recorded host tagged with an older epoch is stale and is discarded.
    /// A broadcast declaring a different host is always applied and starts a
    /// new lineage. Untagged broadcasts are always applied. Returns whether
    /// the configuration was applied.
    pub fn apply_config(
        &mut self,
        own_uuid: ParticipantId,
        hostname: &str,
        host_uuid: ParticipantId,
        lock_state: bool,
        epoch: Option<u64>,
    ) -> bool {
        if let Some(epoch) = epoch {
            if host_uuid == self.host_uuid && epoch < self.config_epoch {
                return false;
            }
            self.config_epoch = epoch;
        } else if host_uuid != self.host_uuid {
            self.config_epoch = 0;
        }

        self.host_name = hostname.to_string();
        self.host_uuid = host_uuid;
        self.locked = lock_state;
        if host_uuid != own_uuid {
            self.is_host = false;
        }
        true
    }

    /// Apply a playback time announcement. Returns whether it was applied.
    ///
    /// Announcements from the recorded host id are echoes and are ignored.
    pub fn accept_time(&mut self, sender: ParticipantId, value: f64) -> bool {
        if sender == self.host_uuid {
            return false;
        }
        self.synced_time = value;
        true
    }

    /// Whether a `getProp` request should be answered
    pub fn answers_config_requests(&self) -> bool {
        self.is_host && !self.host_uuid.is_unset()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Clonable view of the whole session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    /// True once `setName` and `joinChannel` have been issued on the open socket
    pub ready: bool,
    pub target: Option<ChannelTarget>,
    pub nickname: String,
    pub own_uuid: ParticipantId,
    pub chat: ChatState,
    /// Present while connected in watch-together mode
    pub watch: Option<WatchTogetherState>,
    pub reconnect_pending: bool,
}

/// Notification emitted by the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionChanged {
        state: ConnectionState,
        ready: bool,
    },
    MessageReceived(ChatEntry),
    ViewerCountChanged(u64),
    /// The relay assigned the local participant id
    Joined {
        own_uuid: ParticipantId,
    },
    TimeSynced {
        from: ParticipantId,
        value: f64,
    },
    HostChanged {
        host_name: String,
        host_uuid: ParticipantId,
        is_host: bool,
    },
    LockChanged(bool),
    NicknameChanged(String),
    ReconnectScheduled {
        delay: Duration,
    },
    TransportError(String),
    /// All session state was reset by a disconnect
    Reset,
}
