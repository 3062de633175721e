//! The Engine.IO transport state machine (§4.4).
//!
//! [`Engine`] is a clone-able handle onto a task queue that owns
//! [`EngineState`] exclusively; every transition in §4.4.1 is a method on
//! `EngineState` invoked as a job. Grounded on the overall task/channel
//! shape of `engineioxide::transport::{polling, ws}` (teacher), inverted
//! from server-accepts-connection to client-initiates-connection, and on
//! `RTCVPSocketEngine+Private.h` / `RTCVPProbe.h` (original_source) for the
//! exact probe/upgrade ordering.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{EngineIoClientConfig, TransportMode};
use crate::error::{Error, Result};
use crate::packet::{OpenPacket, Packet};
use crate::sid::Sid;
use crate::task::{self, TaskQueueHandle};
use crate::timeout::{TaskHandle, TimeoutManager};
use crate::transport::{polling, ws};

/// Authoritative transport state (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Opening,
    OpenPolling,
    Probing,
    OpenWebSocket,
    Closing,
}

/// Why the engine closed (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    TransportClose,
    PingTimeout,
    TransportError,
    ClientDisconnect,
    HandshakeFailed,
}

/// Events delivered to whoever holds the other end of [`Engine::new`]'s
/// receiver — normally `socketio_client::client`.
#[derive(Debug)]
pub enum EngineEvent {
    Open {
        sid: Sid,
        ping_interval: Duration,
        ping_timeout: Duration,
        upgrades: Vec<String>,
    },
    Upgraded,
    Text(String),
    Binary(Vec<u8>),
    Error(Error),
    Closed(DisconnectReason),
}

struct Session {
    sid: Sid,
    ping_interval: Duration,
    ping_timeout: Duration,
}

const ID_HEARTBEAT_PONG: &str = "heartbeat-pong";
const ID_PROBE: &str = "probe";
const ID_CONNECT: &str = "connect";

/// Engine actor state, owned exclusively by its task queue (§5).
pub struct EngineState {
    config: EngineIoClientConfig,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<EngineEvent>,
    queue: Option<TaskQueueHandle<EngineState>>,
    transport: TransportState,
    session: Option<Session>,
    write_buffer: VecDeque<Packet>,
    posting: bool,
    ws: Option<ws::WsHandle>,
    probe_ws: Option<ws::WsHandle>,
    poll_generation: u64,
    timeouts: TimeoutManager,
    pong_deadline: Option<TaskHandle>,
    pongs_missed: u8,
}

fn access_timeouts(s: &mut EngineState) -> &mut TimeoutManager {
    &mut s.timeouts
}

impl EngineState {
    fn q(&self) -> TaskQueueHandle<EngineState> {
        self.queue.clone().expect("engine queue initialized before first use")
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn status(&self) -> TransportState {
        self.transport
    }

    fn start_connect(&mut self) {
        if self.transport != TransportState::Closed {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = %Sid::placeholder(), "opening engine.io connection");
        match self.config.transport {
            TransportMode::WebSocketOnly => self.start_connect_ws_only(),
            TransportMode::Auto | TransportMode::PollingOnly => self.start_polling_handshake(),
        }
    }

    fn start_polling_handshake(&mut self) {
        self.transport = TransportState::Opening;
        self.schedule_connect_timeout();
        let http = self.http.clone();
        let config = self.config.clone();
        let queue = self.q();
        tokio::spawn(async move {
            let result = polling::handshake(&http, &config).await;
            queue.post(move |state| state.on_handshake_result(result));
        });
    }

    fn start_connect_ws_only(&mut self) {
        self.transport = TransportState::Opening;
        self.schedule_connect_timeout();
        let config = self.config.clone();
        let queue = self.q();
        let queue_for_spawn = queue.clone();
        tokio::spawn(async move {
            let queue_cb = queue_for_spawn.clone();
            let result = ws::connect(&config, None, move |evt| {
                let q = queue_cb.clone();
                q.post(move |state| state.on_ws_event(evt));
            })
            .await;
            queue_for_spawn.post(move |state| state.on_ws_connected(result));
        });
    }

    fn schedule_connect_timeout(&mut self) {
        let queue = self.q();
        self.timeouts.schedule(
            &queue,
            access_timeouts,
            self.config.connect_timeout,
            ID_CONNECT,
            |state| state.on_connect_timeout(),
        );
    }

    fn on_connect_timeout(&mut self) {
        if self.transport == TransportState::Opening {
            self.fail_connect(Error::ConnectTimeout);
        }
    }

    fn on_handshake_result(&mut self, result: Result<(Sid, Packet)>) {
        match result {
            Ok((sid, Packet::Open(open))) => self.finish_open(sid, open, false),
            Ok((_, other)) => self.fail_connect(Error::BadPacket(other)),
            Err(e) => self.fail_connect(e),
        }
    }

    fn on_ws_connected(&mut self, result: Result<ws::WsHandle>) {
        match result {
            Ok(handle) => self.ws = Some(handle),
            Err(e) => self.fail_connect(e),
        }
    }

    fn fail_connect(&mut self, err: Error) {
        self.timeouts.cancel_all_with_identifier(ID_CONNECT);
        self.transport = TransportState::Closed;
        self.emit(EngineEvent::Error(err));
        self.emit(EngineEvent::Closed(DisconnectReason::HandshakeFailed));
    }

    fn finish_open(&mut self, sid: Sid, open: OpenPacket, via_ws: bool) {
        self.timeouts.cancel_all_with_identifier(ID_CONNECT);
        let ping_interval = self
            .config
            .ping_interval_override
            .unwrap_or_else(|| Duration::from_millis(open.ping_interval));
        let ping_timeout = self
            .config
            .ping_timeout_override
            .unwrap_or_else(|| Duration::from_millis(open.ping_timeout));
        let upgrades = open.upgrades.clone();

        self.session = Some(Session {
            sid: sid.clone(),
            ping_interval,
            ping_timeout,
        });
        self.transport = if via_ws {
            TransportState::OpenWebSocket
        } else {
            TransportState::OpenPolling
        };
        self.pongs_missed = 0;
        self.schedule_next_ping();
        self.flush_writes();
        self.emit(EngineEvent::Open {
            sid,
            ping_interval,
            ping_timeout,
            upgrades: upgrades.clone(),
        });

        if !via_ws {
            let can_upgrade = matches!(self.config.transport, TransportMode::Auto)
                && upgrades.iter().any(|u| u == "websocket");
            if can_upgrade {
                self.start_probe();
            }
            self.start_polling_loop();
        }
    }

    /// Handle arriving over the websocket frame carrying an `Open` packet
    /// (client connected with `transport=websocket` from the start, §4.4.1).
    fn on_ws_event(&mut self, evt: ws::WsEvent) {
        match evt {
            ws::WsEvent::Packet(Packet::Open(open)) if self.transport == TransportState::Opening => {
                let sid = open.sid.clone();
                self.finish_open(sid, open, true);
            }
            ws::WsEvent::Packet(packet) => self.handle_inbound(packet),
            ws::WsEvent::Closed => self.start_close(DisconnectReason::TransportClose),
            ws::WsEvent::Error(e) => {
                self.emit(EngineEvent::Error(e));
                self.start_close(DisconnectReason::TransportError);
            }
        }
    }

    fn handle_inbound(&mut self, packet: Packet) {
        match packet {
            Packet::Open(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("unexpected Open packet mid-session, discarding");
            }
            Packet::Close => self.start_close(DisconnectReason::TransportClose),
            Packet::Ping => self.enqueue_write(Packet::Pong),
            Packet::Pong | Packet::PongUpgrade => self.on_pong(),
            Packet::PingUpgrade => self.enqueue_write(Packet::PongUpgrade),
            Packet::Message(text) => self.emit(EngineEvent::Text(text)),
            Packet::Binary(data) => self.emit(EngineEvent::Binary(data)),
            Packet::Upgrade => {}
            Packet::Noop => {}
        }
    }

    // -- polling loop ----------------------------------------------------

    fn start_polling_loop(&mut self) {
        let Some(session) = &self.session else { return };
        if !matches!(
            self.transport,
            TransportState::OpenPolling | TransportState::Probing
        ) {
            return;
        }
        let generation = self.poll_generation;
        let sid = session.sid.clone();
        let http = self.http.clone();
        let config = self.config.clone();
        let queue = self.q();
        tokio::spawn(async move {
            let result = polling::poll(&http, &config, &sid).await;
            queue.post(move |state| state.on_poll_packets(generation, result));
        });
    }

    fn on_poll_packets(&mut self, generation: u64, result: Result<Vec<Packet>>) {
        if generation != self.poll_generation {
            return;
        }
        match result {
            Ok(packets) => {
                for packet in packets {
                    self.handle_inbound(packet);
                }
                self.start_polling_loop();
            }
            Err(e) => {
                self.emit(EngineEvent::Error(e));
                self.start_close(DisconnectReason::TransportError);
            }
        }
    }

    // -- probe / upgrade ---------------------------------------------------

    fn start_probe(&mut self) {
        let Some(session) = &self.session else { return };
        self.transport = TransportState::Probing;
        let sid = session.sid.clone();
        let config = self.config.clone();
        let queue = self.q();
        let queue_for_spawn = queue.clone();
        tokio::spawn(async move {
            let queue_cb = queue_for_spawn.clone();
            let result = ws::connect(&config, Some(&sid), move |evt| {
                let q = queue_cb.clone();
                q.post(move |state| state.on_probe_event(evt));
            })
            .await;
            queue_for_spawn.post(move |state| state.on_probe_connected(result));
        });
    }

    fn on_probe_connected(&mut self, result: Result<ws::WsHandle>) {
        if self.transport != TransportState::Probing {
            return;
        }
        match result {
            Ok(handle) => {
                let _ = handle.send(Packet::PingUpgrade);
                self.probe_ws = Some(handle);
                let queue = self.q();
                self.timeouts.schedule(
                    &queue,
                    access_timeouts,
                    self.config.probe_timeout,
                    ID_PROBE,
                    |state| state.on_probe_timeout(),
                );
            }
            Err(e) => {
                self.emit(EngineEvent::Error(e));
                self.revert_probe();
            }
        }
    }

    fn on_probe_event(&mut self, evt: ws::WsEvent) {
        if self.transport != TransportState::Probing {
            return;
        }
        match evt {
            ws::WsEvent::Packet(Packet::PongUpgrade) => self.on_probe_success(),
            ws::WsEvent::Packet(_) => {
                // The probe websocket only ever carries ping/pong/upgrade
                // (§4.4.1 invariant), but any traffic on it is still
                // liveness: extend the probe deadline instead of letting a
                // slow-but-alive probe connection time out underneath it.
                let queue = self.q();
                self.timeouts.reset(&queue, access_timeouts, ID_PROBE, || {
                    Box::new(|state: &mut EngineState| state.on_probe_timeout())
                });
            }
            ws::WsEvent::Closed | ws::WsEvent::Error(_) => self.revert_probe(),
        }
    }

    fn on_probe_timeout(&mut self) {
        if self.transport == TransportState::Probing {
            self.emit(EngineEvent::Error(Error::ProbeFailed("timeout")));
            self.revert_probe();
        }
    }

    fn on_probe_success(&mut self) {
        self.timeouts.cancel_all_with_identifier(ID_PROBE);
        if let Some(probe) = self.probe_ws.take() {
            let _ = probe.send(Packet::Upgrade);
            self.ws = Some(probe);
        }
        self.transport = TransportState::OpenWebSocket;
        // Any poll() in flight at the moment of upgrade is now stale; bump
        // the generation so its eventual completion is a no-op and no new
        // long-poll GET is issued, which is this client's way of "closing
        // the long-poll" (§4.4.1 step d) without a cancellation handle.
        self.poll_generation += 1;
        self.flush_writes();
        self.emit(EngineEvent::Upgraded);
    }

    fn revert_probe(&mut self) {
        self.timeouts.cancel_all_with_identifier(ID_PROBE);
        self.probe_ws = None;
        if self.transport == TransportState::Probing {
            self.transport = TransportState::OpenPolling;
        }
    }

    // -- heartbeat ---------------------------------------------------------

    fn schedule_next_ping(&mut self) {
        let Some(session) = &self.session else { return };
        let interval = session.ping_interval;
        let queue = self.q();
        self.timeouts.schedule(
            &queue,
            access_timeouts,
            interval,
            "heartbeat-ping",
            |state| state.send_ping(),
        );
    }

    fn send_ping(&mut self) {
        if !matches!(
            self.transport,
            TransportState::OpenPolling | TransportState::Probing | TransportState::OpenWebSocket
        ) {
            return;
        }
        self.enqueue_write(Packet::Ping);
        let Some(session) = &self.session else { return };
        let timeout = session.ping_timeout;
        let queue = self.q();
        let handle = self.timeouts.schedule(
            &queue,
            access_timeouts,
            timeout,
            ID_HEARTBEAT_PONG,
            |state| state.on_pong_timeout(),
        );
        self.pong_deadline = Some(handle);
        self.schedule_next_ping();
    }

    fn on_pong(&mut self) {
        if let Some(handle) = self.pong_deadline.take() {
            self.timeouts.cancel(handle);
        }
        self.pongs_missed = 0;
    }

    fn on_pong_timeout(&mut self) {
        self.pongs_missed += 1;
        if self.pongs_missed >= self.config.pongs_missed_max {
            self.start_close(DisconnectReason::PingTimeout);
        }
    }

    // -- write path (§4.4.4) ------------------------------------------------

    fn enqueue_write(&mut self, packet: Packet) {
        self.write_buffer.push_back(packet);
        self.flush_writes();
    }

    fn flush_writes(&mut self) {
        match self.transport {
            TransportState::OpenWebSocket => {
                if let Some(ws) = self.ws.clone() {
                    while let Some(packet) = self.write_buffer.pop_front() {
                        let _ = ws.send(packet);
                    }
                }
            }
            TransportState::OpenPolling | TransportState::Probing => self.flush_polling(),
            _ => {} // buffered until an open state is reached
        }
    }

    fn flush_polling(&mut self) {
        if self.posting || self.write_buffer.is_empty() {
            return;
        }
        let Some(session) = &self.session else { return };
        let batch: Vec<Packet> = self.write_buffer.drain(..).collect();
        self.posting = true;
        let sid = session.sid.clone();
        let http = self.http.clone();
        let config = self.config.clone();
        let queue = self.q();
        tokio::spawn(async move {
            let result = polling::post(&http, &config, &sid, batch).await;
            queue.post(move |state| state.on_post_complete(result));
        });
    }

    fn on_post_complete(&mut self, result: Result<()>) {
        self.posting = false;
        if let Err(e) = result {
            self.emit(EngineEvent::Error(e));
            self.start_close(DisconnectReason::TransportError);
            return;
        }
        self.flush_polling();
    }

    // -- teardown ------------------------------------------------------------

    fn start_close(&mut self, reason: DisconnectReason) {
        if matches!(
            self.transport,
            TransportState::Closed | TransportState::Closing
        ) {
            return;
        }
        self.transport = TransportState::Closing;
        self.timeouts.cancel_all_with_identifier("heartbeat-ping");
        self.timeouts.cancel_all_with_identifier(ID_HEARTBEAT_PONG);
        self.timeouts.cancel_all_with_identifier(ID_PROBE);
        self.timeouts.cancel_all_with_identifier(ID_CONNECT);
        if let Some(ws) = self.ws.take() {
            ws.close();
        }
        if let Some(probe) = self.probe_ws.take() {
            probe.close();
        }
        self.poll_generation += 1;
        self.session = None;
        self.write_buffer.clear();
        self.posting = false;
        self.transport = TransportState::Closed;
        self.emit(EngineEvent::Closed(reason));
    }
}

/// Clone-able handle to a running engine.
#[derive(Clone)]
pub struct Engine {
    queue: TaskQueueHandle<EngineState>,
}

impl Engine {
    /// Construct a new, unconnected engine. Returns the handle plus the
    /// receiving end of its event stream — call [`Engine::connect`] to
    /// start the handshake.
    pub fn new(config: EngineIoClientConfig) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.allow_self_signed)
            .build()
            .expect("default reqwest client configuration is always valid");
        let state = EngineState {
            config,
            http,
            events: events_tx,
            queue: None,
            transport: TransportState::Closed,
            session: None,
            write_buffer: VecDeque::new(),
            posting: false,
            ws: None,
            probe_ws: None,
            poll_generation: 0,
            timeouts: TimeoutManager::new(),
            pong_deadline: None,
            pongs_missed: 0,
        };
        let queue = task::spawn(state);
        let self_handle = queue.clone();
        queue.post(move |state| state.queue = Some(self_handle));
        (Engine { queue }, events_rx)
    }

    pub fn connect(&self) {
        self.queue.post(|state| state.start_connect());
    }

    pub fn send_text(&self, text: String) {
        self.queue
            .post(move |state| state.enqueue_write(Packet::Message(text)));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        self.queue
            .post(move |state| state.enqueue_write(Packet::Binary(data)));
    }

    pub fn disconnect(&self) {
        self.queue
            .post(|state| state.start_close(DisconnectReason::ClientDisconnect));
    }
}
