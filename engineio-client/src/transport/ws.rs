//! WebSocket transport (§4.4.1, §4.4.4, §4.4.5).
//!
//! A running websocket connection is split into a reader task and a writer
//! task, the same shape as the teacher's `forward_to_handler`/
//! `forward_to_socket` pair in `engineioxide::transport::ws`, just pointed
//! the other way: we call `connect_async` instead of accepting an upgrade.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;

use crate::config::EngineIoClientConfig;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::sid::Sid;

/// Rustls certificate verifier that accepts anything, wired in only when
/// `allow_self_signed` is set (§6). `tokio-tungstenite`'s default connector
/// otherwise validates against the webpki root store with no override knob.
struct AcceptAnyCert;

impl rustls::client::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

fn connector_for(config: &EngineIoClientConfig) -> Option<Connector> {
    if !config.allow_self_signed {
        return None;
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Some(Connector::Rustls(Arc::new(tls_config)))
}

/// A handle to a live websocket connection's writer half.
#[derive(Clone)]
pub struct WsHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsHandle {
    pub fn send(&self, packet: Packet) -> Result<()> {
        let msg = match packet {
            Packet::Binary(data) => Message::Binary(data),
            other => Message::Text(other.try_into()?),
        };
        self.tx
            .send(msg)
            .map_err(|_| Error::Closed)
    }

    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// What the reader side of a websocket hands back to the engine.
pub enum WsEvent {
    Packet(Packet),
    Closed,
    Error(Error),
}

fn build_url(config: &EngineIoClientConfig, sid: Option<&Sid>) -> Result<url::Url> {
    let mut url = config.url.clone();
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Url(url::ParseError::EmptyHost))?;
    url.set_path(&config.path);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair(
            "EIO",
            match config.protocol_version {
                crate::config::ProtocolVersion::V2 => "2",
                crate::config::ProtocolVersion::V3 => "3",
                crate::config::ProtocolVersion::V4 => "4",
            },
        );
        pairs.append_pair("transport", "websocket");
        if let Some(sid) = sid {
            pairs.append_pair("sid", sid.as_ref());
        }
        for (k, v) in &config.connect_params {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Open a websocket connection (fresh, or upgrading an existing polling
/// session when `sid` is `Some`), spawning reader/writer tasks.
///
/// `on_event` is invoked from the reader task for every inbound frame and on
/// close/error; callers are expected to post it straight onto their own
/// task queue rather than touch shared state from here.
pub async fn connect(
    config: &EngineIoClientConfig,
    sid: Option<&Sid>,
    on_event: impl Fn(WsEvent) + Send + Sync + 'static,
) -> Result<WsHandle> {
    let url = build_url(config, sid)?;
    let mut request = url.as_str().into_client_request()?;
    for (k, v) in &config.extra_headers {
        if let (Ok(name), Ok(value)) = (
            tokio_tungstenite::tungstenite::http::HeaderName::try_from(k.as_str()),
            tokio_tungstenite::tungstenite::http::HeaderValue::from_str(v),
        ) {
            request.headers_mut().insert(name, value);
        }
    }

    let (ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector_for(config)).await?;
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match Packet::try_from(text) {
                    Ok(packet) => on_event(WsEvent::Packet(packet)),
                    Err(e) => on_event(WsEvent::Error(e)),
                },
                Some(Ok(Message::Binary(data))) => {
                    on_event(WsEvent::Packet(Packet::Binary(data)))
                }
                Some(Ok(Message::Close(_))) | None => {
                    on_event(WsEvent::Closed);
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    on_event(WsEvent::Error(Error::Ws(e)));
                    break;
                }
            }
        }
    });

    Ok(WsHandle { tx })
}
