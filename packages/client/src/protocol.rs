//! Relay wire protocol.
//!
//! Every frame is a JSON text message. Outbound control frames are tagged by
//! `method`; the relay's generic broadcast primitive (`sendBulletMessage`)
//! carries an application payload that is itself JSON-encoded text tagged by
//! `type`. Inbound frames are classified by shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::ParticipantId, error::ProtocolError};

/// Control frame sent from the client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ControlFrame {
    /// Announce the display name
    SetName { name: String },

    /// Join a channel (`channel` or `channel/joinCode`)
    JoinChannel {
        #[serde(rename = "channelName")]
        channel_name: String,
    },

    /// Broadcast `msg` to every participant of the joined channel
    SendBulletMessage { msg: String },
}

impl ControlFrame {
    /// Wrap an application payload into a `sendBulletMessage` frame
    pub fn bullet(payload: &BulletPayload) -> Result<Self, ProtocolError> {
        Ok(Self::SendBulletMessage {
            msg: serde_json::to_string(payload)?,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Application payload carried inside a bullet message (watch-together mode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BulletPayload {
    /// Playback position announcement, in seconds
    SyncTime { value: f64 },

    /// Request for the current shared configuration
    GetProp,

    /// Shared configuration broadcast by the host
    SetProp {
        hostname: String,
        #[serde(rename = "hostUuid")]
        host_uuid: ParticipantId,
        #[serde(rename = "lockState")]
        lock_state: bool,
        /// Configuration version; absent when sent by peers that do not track it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        epoch: Option<u64>,
    },

    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl BulletPayload {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Shape-based classification of an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Assignment of the local participant id on join (watch-together)
    ChannelData {
        uuid: ParticipantId,
        now_viewer_count: u64,
    },

    /// Broadcast from another participant; `msg` is the raw payload text
    Bullet { sender: ParticipantId, msg: String },

    /// Any frame carrying a viewer count and a nonzero sender id
    Presence {
        uuid: ParticipantId,
        now_viewer_count: u64,
    },

    /// Anything else
    Other,
}

/// Decoded inbound frame together with its raw JSON
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub raw: Value,
    pub frame: InboundFrame,
}

impl InboundEnvelope {
    /// Decode a text frame received from the relay
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: Value = serde_json::from_str(text)?;
        let object = raw.as_object().ok_or(ProtocolError::NotAnObject)?;

        let uuid = object
            .get("uuid")
            .and_then(Value::as_u64)
            .map(ParticipantId::new)
            .unwrap_or_default();
        let now_viewer_count = object.get("nowViewerCount").and_then(Value::as_u64);

        let frame = match object.get("type").and_then(Value::as_str) {
            Some("channelData") => InboundFrame::ChannelData {
                uuid,
                now_viewer_count: now_viewer_count.unwrap_or_default(),
            },
            Some("bulletMessage") => {
                let msg = object
                    .get("msg")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingPayload)?;
                InboundFrame::Bullet {
                    sender: uuid,
                    msg: msg.to_string(),
                }
            }
            _ => match now_viewer_count {
                Some(now_viewer_count) if !uuid.is_unset() => InboundFrame::Presence {
                    uuid,
                    now_viewer_count,
                },
                _ => InboundFrame::Other,
            },
        };

        Ok(Self { raw, frame })
    }

    /// Presence information (`uuid`, `nowViewerCount`) carried by this frame, if any
    ///
    /// Chat mode applies this to every frame shape, including `channelData`.
    pub fn presence(&self) -> Option<(ParticipantId, u64)> {
        let uuid = self.raw.get("uuid").and_then(Value::as_u64)?;
        let count = self.raw.get("nowViewerCount").and_then(Value::as_u64)?;
        (uuid != 0).then(|| (ParticipantId::new(uuid), count))
    }
}
