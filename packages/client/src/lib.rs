//! Chat and watch-together session client.
//!
//! The client keeps one WebSocket open to a message relay and runs in one of
//! two modes over the same envelope protocol:
//!
//! - chat: presence updates and broadcast chat messages
//! - watch-together: host election, lock state and playback time replicated
//!   between co-viewers
//!
//! [`SessionCore`] is the I/O-free state machine; [`SessionClient`] drives it
//! over `tokio-tungstenite`.

pub mod domain;
pub mod error;
pub mod formatter;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod state;
pub mod ui;

pub use domain::{ChannelTarget, ConnectionState, ParticipantId, SessionMode};
pub use error::{ClientError, ProtocolError};
pub use runner::SessionClient;
pub use session::{SessionAction, SessionConfig, SessionCore};
pub use state::{ChatEntry, ChatState, SessionEvent, SessionSnapshot, WatchTogetherState};
