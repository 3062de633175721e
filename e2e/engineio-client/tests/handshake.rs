//! Drives a real [`engineio_client::Engine`] against a tiny in-process
//! long-polling mock server, covering handshake, message exchange and
//! client-initiated close (spec.md §8 scenarios 1 and 5, polling-only —
//! the websocket probe/upgrade path is covered by `engine.rs`'s own state
//! machine methods and is out of scope for this loopback harness).

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tokio::sync::mpsc;

use engineio_client::{Engine, EngineEvent, EngineIoClientConfig, ProtocolVersion, TransportMode};

struct MockServer {
    addr: SocketAddr,
    outgoing: Arc<Mutex<VecDeque<String>>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

fn push_outgoing(outgoing: &Arc<Mutex<VecDeque<String>>>, packet: impl Into<String>) {
    outgoing.lock().unwrap().push_back(packet.into());
}

async fn start_mock_server() -> MockServer {
    let outgoing: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<String>();

    let outgoing_for_service = outgoing.clone();
    let make_svc = make_service_fn(move |_conn| {
        let outgoing = outgoing_for_service.clone();
        let incoming_tx = incoming_tx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let outgoing = outgoing.clone();
                let incoming_tx = incoming_tx.clone();
                async move { handle(req, outgoing, incoming_tx).await }
            }))
        }
    });

    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let server = Server::bind(&addr).serve(make_svc);
    let bound_addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.await;
    });

    MockServer {
        addr: bound_addr,
        outgoing,
        incoming: incoming_rx,
    }
}

async fn handle(
    req: Request<Body>,
    outgoing: Arc<Mutex<VecDeque<String>>>,
    incoming_tx: mpsc::UnboundedSender<String>,
) -> Result<Response<Body>, Infallible> {
    let is_handshake = !req.uri().query().unwrap_or("").contains("sid=");
    match *req.method() {
        hyper::Method::GET if is_handshake => {
            let open = serde_json::json!({
                "sid": "e2e-sid",
                "upgrades": [],
                "pingInterval": 25_000,
                "pingTimeout": 20_000,
            });
            let body = format!("0{open}");
            Ok(Response::new(Body::from(body)))
        }
        hyper::Method::GET => {
            let batch = {
                let mut queue = outgoing.lock().unwrap();
                queue.drain(..).collect::<Vec<_>>().join("\u{1e}")
            };
            Ok(Response::new(Body::from(batch)))
        }
        hyper::Method::POST => {
            let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
            let body = String::from_utf8_lossy(&bytes).to_string();
            for packet in body.split('\u{1e}') {
                if !packet.is_empty() {
                    let _ = incoming_tx.send(packet.to_string());
                }
            }
            Ok(Response::new(Body::from("ok")))
        }
        _ => Ok(Response::builder().status(404).body(Body::empty()).unwrap()),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for engine event")
        .expect("engine event channel closed")
}

#[tokio::test]
async fn handshake_then_message_round_trip_then_close() {
    let mut mock = start_mock_server().await;

    let config = EngineIoClientConfig::builder(
        url::Url::parse(&format!("http://{}", mock.addr)).unwrap(),
    )
    .transport(TransportMode::PollingOnly)
    .protocol_version(ProtocolVersion::V4)
    .build();

    let (engine, mut events) = Engine::new(config);
    engine.connect();

    match next_event(&mut events).await {
        EngineEvent::Open { sid, upgrades, .. } => {
            assert_eq!(sid.as_ref(), "e2e-sid");
            assert!(upgrades.is_empty());
        }
        other => panic!("expected Open, got {other:?}"),
    }

    engine.send_text("hello from client".to_string());
    let received = tokio::time::timeout(Duration::from_secs(5), mock.incoming.recv())
        .await
        .expect("server never received client message")
        .expect("incoming channel closed");
    assert_eq!(received, "4hello from client");

    push_outgoing(&mock.outgoing, "4hello from server");
    match next_event(&mut events).await {
        EngineEvent::Text(text) => assert_eq!(text, "hello from server"),
        other => panic!("expected Text, got {other:?}"),
    }

    engine.disconnect();
    match next_event(&mut events).await {
        EngineEvent::Closed(_) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
}
