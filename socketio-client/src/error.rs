/// Errors produced by the socket.io client layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("engine transport error: {0}")]
    Engine(#[from] engineio_client::Error),

    #[error("packet encode/decode error: {0}")]
    MalformedPacket(#[from] serde_json::Error),

    #[error("unknown socket.io packet type digit: {0}")]
    UnknownPacketType(u8),

    #[error("ack {0} timed out")]
    AckTimeout(i64),

    #[error("ack {0} was cancelled")]
    AckCancelled(i64),

    #[error("client is not connected")]
    NotConnected,

    #[error("namespace {0} is not connected")]
    NamespaceNotConnected(String),

    #[error("server rejected connection to namespace {0}: {1}")]
    ConnectError(String, String),

    #[error("binary attachment count mismatch: expected {expected}, got {got}")]
    BinaryCountMismatch { expected: usize, got: usize },

    #[error("reconnection attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
