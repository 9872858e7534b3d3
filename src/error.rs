use thiserror::Error;

/// Errors that can occur while operating the bridge.
///
/// Every failure attributable to a caller-initiated operation is returned to
/// that operation. Replies that match no pending registration have no caller
/// and are only logged, so they never appear here.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The transport client could not establish a connection.
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// The connection (or the dynamic reply receiver) failed to open.
    #[error("open failed: {0}")]
    OpenFailure(String),

    /// The operation is not valid in the current session or message state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The close handshake failed. Local resources were released regardless.
    #[error("shutdown failed: {0}")]
    ShutdownFailure(String),

    /// A generic message could not be translated to or from the wire model.
    #[error("codec error: {0}")]
    Codec(String),

    /// A link-level operation (attach, send, settle, detach) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived before the registration's deadline.
    #[error("no reply for message id {0} before deadline")]
    ReplyTimeout(String),

    /// The session ended before the operation could complete.
    #[error("session closed")]
    SessionClosed,

    /// A consumer's buffer was full and a delivery was dropped.
    #[error("consumer buffer overflow on {address} (max {max})")]
    BufferOverflow { address: String, max: usize },

    /// A consumer handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// Builder or configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
