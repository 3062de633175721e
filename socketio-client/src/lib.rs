//! Client-side Socket.IO protocol: packet framing, ack bookkeeping, event
//! handler dispatch and reconnection, layered on top of
//! [`engineio_client`]'s transport.
//!
//! [`Client`] is the entry point: build a [`ClientConfig`] from a url,
//! construct a [`Client`], register handlers with `on`/`once`, then call
//! `connect`.

pub mod ack;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod packet;
pub mod reconnect;

pub use client::{Client, ClientStatus};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Error, Result};
pub use handler::{AckResponder, HandlerHandle};
pub use packet::EventArg;
