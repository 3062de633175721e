//! Client-side Engine.IO transport: HTTP long-polling with an optional
//! upgrade to websocket, framed as the Engine.IO packet protocol (§1-§2).
//!
//! [`engine::Engine`] is the entry point: construct one from an
//! [`config::EngineIoClientConfig`], call [`engine::Engine::connect`], and
//! drive the returned [`engine::EngineEvent`] stream.

pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod sid;
pub mod task;
pub mod timeout;
pub mod transport;

pub use config::{EngineIoClientConfig, EngineIoClientConfigBuilder, ProtocolVersion, TransportMode};
pub use engine::{DisconnectReason, Engine, EngineEvent, TransportState};
pub use error::{Error, Result};
pub use packet::{OpenPacket, Packet};
pub use sid::Sid;
