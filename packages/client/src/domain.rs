//! Domain logic for client-side operations.
//!
//! This module contains plain types and pure functions without side effects,
//! making them easy to test.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Close code reported when a connection drops without a closing handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carries no status
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Fixed delay between an abnormal close and the reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Default relay address
pub const DEFAULT_RELAY_URL: &str = "wss://live.oktw.one/ws";

/// Settings key holding the persisted display name
pub const NICKNAME_KEY: &str = "config_nickname";

/// Display name used when nothing is persisted
pub const DEFAULT_NICKNAME: &str = "anonymous";

/// Relay-assigned participant identifier.
///
/// Unique per connection lifetime. `0` means "not assigned yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Unassigned identifier
    pub const UNSET: Self = Self(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport connection state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Operating mode of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Plain chat and presence
    Chat,
    /// Co-viewing with host election, joined through a code
    WatchTogether { join_code: String },
}

/// Channel (and mode) a session connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub channel: String,
    pub mode: SessionMode,
}

impl ChannelTarget {
    /// Target a chat channel
    pub fn chat(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            mode: SessionMode::Chat,
        }
    }

    /// Target a watch-together session of `channel` joined with `join_code`
    pub fn watch_together(channel: impl Into<String>, join_code: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            mode: SessionMode::WatchTogether {
                join_code: join_code.into(),
            },
        }
    }

    pub fn is_watch_together(&self) -> bool {
        matches!(self.mode, SessionMode::WatchTogether { .. })
    }

    /// Channel name announced in `joinChannel`
    ///
    /// `channel/joinCode` for watch-together, `channel` alone for chat.
    pub fn channel_name(&self) -> String {
        match &self.mode {
            SessionMode::Chat => self.channel.clone(),
            SessionMode::WatchTogether { join_code } => format!("{}/{}", self.channel, join_code),
        }
    }
}

/// Check if a close code should trigger a reconnect attempt.
///
/// Only an abnormal closure (1006) is retried; every other code is a clean,
/// terminal close.
pub fn should_reconnect(close_code: u16) -> bool {
    close_code == ABNORMAL_CLOSURE
}

/// Check if a time sync may be broadcast.
///
/// The host may always broadcast; everyone else only while unlocked.
pub fn may_broadcast_time(locked: bool, is_host: bool) -> bool {
    !locked || is_host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_reconnect_on_abnormal_closure() {
        // テスト項目: 1006 (異常切断) の場合、再接続すべきと判定される
        // given (前提条件):
        let code = ABNORMAL_CLOSURE;

        // when (操作):
        let result = should_reconnect(code);

        // then (期待する結果):
        assert!(result);
    }

    #[test]
    fn test_should_not_reconnect_on_other_codes() {
        // テスト項目: 1006 以外のクローズコードでは再接続しないと判定される
        // given (前提条件):
        let codes = [1000, 1001, 1005, 1011, 4000];

        for code in codes {
            // when (操作):
            let result = should_reconnect(code);

            // then (期待する結果):
            assert!(!result, "code {} must not reconnect", code);
        }
    }

    #[test]
    fn test_channel_name_for_chat() {
        // テスト項目: チャットモードではチャンネル名がそのまま使われる
        // given (前提条件):
        let target = ChannelTarget::chat("alice");

        // when (操作):
        let name = target.channel_name();

        // then (期待する結果):
        assert_eq!(name, "alice");
        assert!(!target.is_watch_together());
    }

    #[test]
    fn test_channel_name_for_watch_together() {
        // テスト項目: 同時視聴モードでは "channel/joinCode" 形式になる
        // given (前提条件):
        let target = ChannelTarget::watch_together("alice", "x7k2");

        // when (操作):
        let name = target.channel_name();

        // then (期待する結果):
        assert_eq!(name, "alice/x7k2");
        assert!(target.is_watch_together());
    }

    #[test]
    fn test_may_broadcast_time() {
        // テスト項目: ロック中はホストのみ時刻をブロードキャストできる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert!(may_broadcast_time(false, false));
        assert!(may_broadcast_time(false, true));
        assert!(may_broadcast_time(true, true));
        assert!(!may_broadcast_time(true, false));
    }

    #[test]
    fn test_participant_id_unset() {
        // テスト項目: 0 の ParticipantId は未割り当てとして扱われる
        // given (前提条件):
        let unset = ParticipantId::default();
        let assigned = ParticipantId::new(5);

        // when (操作) / then (期待する結果):
        assert!(unset.is_unset());
        assert_eq!(unset, ParticipantId::UNSET);
        assert!(!assigned.is_unset());
        assert_eq!(assigned, ParticipantId::new(5));
    }
}
