//! Message formatting utilities for client display.

use std::time::Duration;

use sajiki_shared::time::{format_playback_position, timestamp_to_jst_rfc3339};

use crate::{
    domain::{ConnectionState, ParticipantId},
    state::{ChatEntry, SessionEvent, SessionSnapshot},
};

const RULE: &str = "============================================================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format any session event, or `None` for events not shown to the user
    pub fn format_event(event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::ConnectionChanged { state, ready } => {
                Some(Self::format_connection(*state, *ready))
            }
            SessionEvent::MessageReceived(entry) => Some(Self::format_chat_entry(entry)),
            SessionEvent::ViewerCountChanged(count) => Some(Self::format_viewer_count(*count)),
            SessionEvent::Joined { own_uuid } => {
                Some(format!("\n* joined as participant #{}\n", own_uuid))
            }
            SessionEvent::TimeSynced { from, value } => Some(Self::format_time_synced(*from, *value)),
            SessionEvent::HostChanged {
                host_name,
                host_uuid,
                is_host,
            } => Some(Self::format_host_changed(host_name, *host_uuid, *is_host)),
            SessionEvent::LockChanged(locked) => Some(Self::format_lock(*locked)),
            SessionEvent::NicknameChanged(name) => Some(format!("\n* you are now '{}'\n", name)),
            SessionEvent::ReconnectScheduled { delay } => Some(Self::format_reconnect(*delay)),
            SessionEvent::TransportError(_) | SessionEvent::Reset => None,
        }
    }

    /// Format a connection state change
    pub fn format_connection(state: ConnectionState, ready: bool) -> String {
        let suffix = if ready { " (ready)" } else { "" };
        format!("\n* connection {}{}\n", state, suffix)
    }

    /// Format a received envelope
    ///
    /// Bullet messages are shown as chat lines, everything else as raw JSON.
    pub fn format_chat_entry(entry: &ChatEntry) -> String {
        let received_at = Self::format_timestamp(entry.received_at);
        match entry.text() {
            Some(text) => {
                let from = match (entry.sender_name(), entry.sender()) {
                    (Some(name), _) => name.to_string(),
                    (None, Some(uuid)) => format!("#{}", uuid),
                    (None, None) => "?".to_string(),
                };
                format!(
                    "\n\n------------------------------------------------------------\n\
                     @{}: {}\n\
                     received at {}\n\
                     ------------------------------------------------------------\n",
                    from, text, received_at
                )
            }
            None => format!("\n{}\n", entry.payload),
        }
    }

    /// Format a viewer count update
    pub fn format_viewer_count(count: u64) -> String {
        format!("\n* {} viewer(s) watching\n", count)
    }

    /// Format a playback time received from a peer
    pub fn format_time_synced(from: ParticipantId, seconds: f64) -> String {
        format!(
            "\n* #{} is at {}\n",
            from,
            format_playback_position(seconds)
        )
    }

    /// Format a host change
    pub fn format_host_changed(host_name: &str, host_uuid: ParticipantId, is_host: bool) -> String {
        if is_host {
            format!("\n* you are the host (#{})\n", host_uuid)
        } else {
            format!("\n* host is {} (#{})\n", host_name, host_uuid)
        }
    }

    /// Format a lock state change
    pub fn format_lock(locked: bool) -> String {
        if locked {
            "\n* playback is locked to the host\n".to_string()
        } else {
            "\n* playback is unlocked\n".to_string()
        }
    }

    /// Format a scheduled reconnect
    pub fn format_reconnect(delay: Duration) -> String {
        format!(
            "\n* connection lost, reconnecting in {} ms\n",
            delay.as_millis()
        )
    }

    /// Format the whole session state
    pub fn format_state(snapshot: &SessionSnapshot) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n\n{}\n", RULE));
        output.push_str(&format!(
            "Connection: {}{}\n",
            snapshot.connection,
            if snapshot.ready { " (ready)" } else { "" }
        ));
        if let Some(target) = &snapshot.target {
            output.push_str(&format!("Channel: {}\n", target.channel_name()));
        }
        output.push_str(&format!("Nickname: {}\n", snapshot.nickname));
        if !snapshot.own_uuid.is_unset() {
            output.push_str(&format!("Participant: #{}\n", snapshot.own_uuid));
        }
        output.push_str(&format!(
            "Viewers: {} ({} seen)\n",
            snapshot.chat.viewer_count,
            snapshot.chat.seen_participants.len()
        ));

        if let Some(watch) = &snapshot.watch {
            let host = if watch.host_uuid.is_unset() {
                "(none)".to_string()
            } else if watch.is_host {
                format!("{} (me)", watch.host_name)
            } else {
                format!("{} (#{})", watch.host_name, watch.host_uuid)
            };
            output.push_str(&format!("Host: {}\n", host));
            output.push_str(&format!(
                "Locked: {}\n",
                if watch.locked { "yes" } else { "no" }
            ));
            output.push_str(&format!(
                "Synced time: {}\n",
                format_playback_position(watch.synced_time)
            ));
        }

        if snapshot.reconnect_pending {
            output.push_str("Reconnect pending\n");
        }
        output.push_str(&format!("{}\n", RULE));
        output
    }

    fn format_timestamp(timestamp_millis: i64) -> String {
        timestamp_to_jst_rfc3339(timestamp_millis).unwrap_or_else(|| timestamp_millis.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{domain::ChannelTarget, state::WatchTogetherState};

    #[test]
    fn test_format_chat_entry_with_name() {
        // テスト項目: 名前付きの bullet メッセージが送信者名と本文で整形される
        // given (前提条件):
        let entry = ChatEntry {
            received_at: 1672498800000,
            payload: json!({"type": "bulletMessage", "uuid": 3, "name": "bob", "msg": "hi"}),
        };

        // when (操作):
        let result = MessageFormatter::format_chat_entry(&entry);

        // then (期待する結果):
        assert!(result.contains("@bob: hi"));
        assert!(result.contains("received at 2023-01-01T00:00:00"));
    }

    #[test]
    fn test_format_chat_entry_falls_back_to_uuid() {
        // テスト項目: 名前がない場合は uuid で送信者を表示する
        // given (前提条件):
        let entry = ChatEntry {
            received_at: 0,
            payload: json!({"type": "bulletMessage", "uuid": 3, "msg": "hi"}),
        };

        // when (操作):
        let result = MessageFormatter::format_chat_entry(&entry);

        // then (期待する結果):
        assert!(result.contains("@#3: hi"));
    }

    #[test]
    fn test_format_non_chat_entry_as_raw_json() {
        // テスト項目: チャット以外のフレームは JSON のまま表示される
        // given (前提条件):
        let entry = ChatEntry {
            received_at: 0,
            payload: json!({"nowViewerCount": 2, "uuid": 3}),
        };

        // when (操作):
        let result = MessageFormatter::format_chat_entry(&entry);

        // then (期待する結果):
        assert!(result.contains("\"nowViewerCount\":2"));
    }

    #[test]
    fn test_format_host_changed() {
        // テスト項目: 自分がホストかどうかで表示が切り替わる
        // given (前提条件) / when (操作):
        let me = MessageFormatter::format_host_changed("A", ParticipantId::new(5), true);
        let other = MessageFormatter::format_host_changed("A", ParticipantId::new(5), false);

        // then (期待する結果):
        assert!(me.contains("you are the host"));
        assert!(other.contains("host is A (#5)"));
    }

    #[test]
    fn test_format_state_includes_watch_details() {
        // テスト項目: 同時視聴中の状態表示にホスト・ロック・同期時刻が含まれる
        // given (前提条件):
        let snapshot = SessionSnapshot {
            connection: ConnectionState::Open,
            ready: true,
            target: Some(ChannelTarget::watch_together("lobby", "abc")),
            nickname: "B".to_string(),
            own_uuid: ParticipantId::new(9),
            watch: Some(WatchTogetherState {
                synced_time: 65.0,
                host_name: "A".to_string(),
                host_uuid: ParticipantId::new(5),
                ..WatchTogetherState::default()
            }),
            ..SessionSnapshot::default()
        };

        // when (操作):
        let result = MessageFormatter::format_state(&snapshot);

        // then (期待する結果):
        assert!(result.contains("Channel: lobby/abc"));
        assert!(result.contains("Host: A (#5)"));
        assert!(result.contains("Locked: yes"));
        assert!(result.contains("Synced time: 1:05"));
    }

    #[test]
    fn test_reset_event_is_not_displayed() {
        // テスト項目: Reset イベントは表示対象にならない
        // given (前提条件) / when (操作):
        let result = MessageFormatter::format_event(&SessionEvent::Reset);

        // then (期待する結果):
        assert!(result.is_none());
    }
}
