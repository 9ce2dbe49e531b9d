//! Error types for the session client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session driver task has stopped and no longer accepts commands
    #[error("Session driver is not running")]
    SessionClosed,
}

/// Errors raised while decoding relay frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// A `bulletMessage` frame without a string `msg` payload
    #[error("bullet message without a string payload")]
    MissingPayload,
}
