use crate::packet::Packet;

/// Errors produced by the engine.io transport layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http handshake failed with status {0}")]
    HandshakeStatus(http::StatusCode),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket transport error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed open packet: {0}")]
    MalformedOpenPacket(serde_json::Error),

    #[error("unknown engine.io packet type digit: {0}")]
    UnknownPacketType(u8),

    #[error("empty packet")]
    EmptyPacket,

    #[error("unexpected packet received: {0:?}")]
    BadPacket(Packet),

    #[error("binary frame received with no pending reassembly")]
    UnexpectedBinary,

    #[error("heartbeat timeout: {0} consecutive pongs missed")]
    HeartbeatTimeout(u8),

    #[error("probe failed: {0}")]
    ProbeFailed(&'static str),

    #[error("connect handshake timed out")]
    ConnectTimeout,

    #[error("engine is closed")]
    Closed,

    #[error("session {0} is unknown")]
    UnknownSession(crate::sid::Sid),

    #[error("payload exceeds max_payload ({0} bytes)")]
    PayloadTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
