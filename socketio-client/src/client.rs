//! Client connection lifecycle (§4.6), built on an
//! [`engineio_client::Engine`] for transport.
//!
//! [`ClientState`] is the actor: one task queue (reused from
//! `engineio_client::task`) owns the engine handle, ack registry, handler
//! registry, reconnection policy and timeout manager. [`Client`] is the
//! cheap, clone-able facade callers and user handlers hold.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engineio_client::task::{self, TaskQueueHandle};
use engineio_client::timeout::TimeoutManager;
use engineio_client::{DisconnectReason, Engine, EngineEvent, ProtocolVersion};
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use crate::ack::AckRegistry;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{AckResponder, BoxedHandler, HandlerHandle, HandlerRegistry};
use crate::packet::{decode_args, encode_args, EventArg, Packet, PacketType};
use crate::reconnect::ReconnectPolicy;

/// Connection lifecycle status (§3 Client status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    NotConnected,
    Connecting,
    /// Engine transport is up; the namespace Connect handshake hasn't
    /// resolved yet.
    Opened,
    Connected,
    Disconnected,
}

fn access_timeouts(s: &mut ClientState) -> &mut TimeoutManager {
    &mut s.timeouts
}

const ID_ACK: &str = "ack";
const ID_RECONNECT: &str = "reconnect";

struct ClientState {
    config: ClientConfig,
    queue: Option<TaskQueueHandle<ClientState>>,
    engine: Option<Engine>,
    namespace: String,
    status: ClientStatus,
    status_tx: watch::Sender<ClientStatus>,
    acks: AckRegistry,
    handlers: HandlerRegistry,
    reconnect: ReconnectPolicy,
    pending_emits: VecDeque<Packet>,
    reassembly: Option<Packet>,
    timeouts: TimeoutManager,
    local_disconnect: bool,
    handler_id_counter: Arc<AtomicU64>,
}

impl ClientState {
    fn q(&self) -> TaskQueueHandle<ClientState> {
        self.queue.clone().expect("client queue initialized before first use")
    }

    fn client_handle(&self) -> Client {
        Client {
            queue: self.q(),
            status_rx: self.status_tx.subscribe(),
            next_handler_id: self.handler_id_counter.clone(),
        }
    }

    fn notify_status(&mut self) {
        let _ = self.status_tx.send(self.status);
    }

    fn connect_payload(&self) -> Option<Value> {
        match self.config.engine.protocol_version {
            ProtocolVersion::V2 => Some(serde_json::json!([self.namespace, self.config.auth])),
            ProtocolVersion::V3 | ProtocolVersion::V4 => {
                self.config.auth.clone().map(|auth| serde_json::json!({ "auth": auth }))
            }
        }
    }

    // -- connection lifecycle (§4.6.1) -------------------------------------

    fn start_connect(&mut self) {
        if !matches!(self.status, ClientStatus::NotConnected | ClientStatus::Disconnected) {
            return;
        }
        self.status = ClientStatus::Connecting;
        self.notify_status();
        self.local_disconnect = false;

        let (engine, mut events_rx) = Engine::new(self.config.engine.clone());
        engine.connect();
        let queue = self.q();
        tokio::spawn(async move {
            while let Some(evt) = events_rx.recv().await {
                let queue2 = queue.clone();
                queue2.post(move |state: &mut ClientState| state.on_engine_event(evt));
            }
        });
        self.engine = Some(engine);
    }

    fn start_disconnect(&mut self) {
        self.local_disconnect = true;
        if matches!(self.status, ClientStatus::Opened | ClientStatus::Connected) {
            let packet = Packet::disconnect(self.namespace.clone());
            self.send_packet(packet);
        }
        if let Some(engine) = self.engine.take() {
            engine.disconnect();
        }
        self.teardown_acks();
        self.pending_emits.clear();
        self.status = ClientStatus::Disconnected;
        self.notify_status();
    }

    fn start_manual_reconnect(&mut self) {
        self.start_disconnect();
        self.reconnect.reset();
        self.start_connect();
    }

    fn teardown_acks(&mut self) {
        self.acks.clear(|| Error::NotConnected);
        self.timeouts.cancel_all_with_identifier(ID_ACK);
    }

    fn maybe_reconnect(&mut self) {
        if !self.config.reconnection_enabled {
            return;
        }
        let Some(delay) = self.reconnect.next_delay() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("reconnection attempts exhausted, giving up");
            return;
        };
        let queue = self.q();
        self.timeouts
            .schedule(&queue, access_timeouts, delay, ID_RECONNECT, |state| state.start_connect());
    }

    // -- engine event handling ----------------------------------------------

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Open { .. } => self.on_engine_open(),
            EngineEvent::Text(text) => self.on_inbound_text(text),
            EngineEvent::Binary(data) => self.on_inbound_binary(data),
            EngineEvent::Upgraded => {}
            EngineEvent::Error(e) => self.on_engine_error(e),
            EngineEvent::Closed(reason) => self.on_engine_closed(reason),
        }
    }

    fn on_engine_open(&mut self) {
        self.status = ClientStatus::Opened;
        self.notify_status();
        let payload = self.connect_payload();
        let packet = Packet::connect(self.namespace.clone(), payload);
        self.send_packet(packet);
    }

    fn on_engine_error(&mut self, _e: engineio_client::Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "engine transport error");
        // The engine always follows an Error with a Closed event of its own
        // accord, which is where reconnection actually gets scheduled.
    }

    fn on_engine_closed(&mut self, _reason: DisconnectReason) {
        self.teardown_acks();
        self.engine = None;
        let was_local = self.local_disconnect;
        self.local_disconnect = false;
        self.status = ClientStatus::Disconnected;
        self.notify_status();
        if !was_local {
            self.maybe_reconnect();
        }
    }

    fn on_inbound_text(&mut self, text: String) {
        let packet = match Packet::decode_text(&text) {
            Ok(p) => p,
            Err(e) => {
                self.log_protocol_error(e);
                return;
            }
        };
        if packet.kind.is_binary() && !packet.is_complete() {
            self.reassembly = Some(packet);
            return;
        }
        self.route_packet(packet);
    }

    fn on_inbound_binary(&mut self, data: Vec<u8>) {
        let Some(mut packet) = self.reassembly.take() else {
            self.log_protocol_error(Error::BinaryCountMismatch { expected: 0, got: 1 });
            return;
        };
        packet.push_attachment(data);
        if packet.is_complete() {
            self.route_packet(packet);
        } else {
            self.reassembly = Some(packet);
        }
    }

    fn log_protocol_error(&self, _e: Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "discarding malformed packet");
    }

    fn route_packet(&mut self, packet: Packet) {
        match packet.kind {
            PacketType::Connect => self.on_namespace_connected(packet),
            PacketType::ConnectError => self.on_connect_error(packet),
            PacketType::Disconnect => self.on_server_disconnect(packet),
            PacketType::Event | PacketType::BinaryEvent => self.deliver_event(packet),
            PacketType::Ack | PacketType::BinaryAck => self.deliver_ack(packet),
        }
    }

    fn namespace_matches(&self, packet_namespace: &str) -> bool {
        if packet_namespace == self.namespace {
            true
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(namespace = packet_namespace, "discarding packet for non-matching namespace");
            false
        }
    }

    fn on_namespace_connected(&mut self, packet: Packet) {
        if !self.namespace_matches(&packet.namespace) {
            return;
        }
        self.status = ClientStatus::Connected;
        self.reconnect.reset();
        self.notify_status();
        self.flush_pending_emits();
    }

    fn on_connect_error(&mut self, packet: Packet) {
        let message = packet
            .data
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("connect error")
            .to_string();
        let namespace = packet.namespace.clone();
        if let Some(engine) = self.engine.take() {
            engine.disconnect();
        }
        self.teardown_acks();
        self.status = ClientStatus::Disconnected;
        self.notify_status();
        self.log_protocol_error(Error::ConnectError(namespace, message));
        self.maybe_reconnect();
    }

    fn on_server_disconnect(&mut self, packet: Packet) {
        if !self.namespace_matches(&packet.namespace) {
            return;
        }
        self.local_disconnect = false;
        if let Some(engine) = self.engine.take() {
            engine.disconnect();
        }
        self.teardown_acks();
        self.status = ClientStatus::Disconnected;
        self.notify_status();
        self.maybe_reconnect();
    }

    fn deliver_event(&mut self, packet: Packet) {
        if !self.namespace_matches(&packet.namespace) {
            return;
        }
        let ack_id = packet.ack_id;
        let attachments = packet.attachments;
        let (name, rest) = match split_event(packet.data) {
            Ok(v) => v,
            Err(e) => {
                self.log_protocol_error(e);
                return;
            }
        };
        let args = match decode_args(Some(rest), &attachments) {
            Ok(a) => a,
            Err(e) => {
                self.log_protocol_error(e);
                return;
            }
        };
        let responder = ack_id.map(|id| {
            let queue = self.q();
            let namespace = self.namespace.clone();
            Box::new(move |reply: Vec<EventArg>| {
                queue.post(move |state: &mut ClientState| state.send_ack(namespace, id, reply));
            }) as AckResponder
        });
        let client = self.client_handle();
        let namespace = self.namespace.clone();
        let handlers = &mut self.handlers;
        // A panicking user handler must not take the actor's task queue
        // down with it — catch and log, then keep processing.
        let result = catch_unwind(AssertUnwindSafe(|| {
            handlers.dispatch(&namespace, &name, client, args, responder);
        }));
        if result.is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(event = %name, "event handler panicked, swallowing");
        }
    }

    fn deliver_ack(&mut self, packet: Packet) {
        if !self.namespace_matches(&packet.namespace) {
            return;
        }
        let Some(id) = packet.ack_id else { return };
        let attachments = packet.attachments;
        match decode_args(packet.data, &attachments) {
            Ok(args) => {
                self.acks.resolve(id, args);
            }
            Err(e) => self.log_protocol_error(e),
        }
    }

    fn send_ack(&mut self, namespace: String, ack_id: i64, args: Vec<EventArg>) {
        let (data, attachments) = encode_args(args);
        let packet = Packet::ack(namespace, ack_id, data, attachments);
        self.send_packet(packet);
    }

    // -- emit path (§4.6.2) -------------------------------------------------

    fn emit(&mut self, name: String, args: Vec<EventArg>, ack: Option<(oneshot::Sender<Result<Vec<EventArg>>>, Duration)>) {
        let mut all_args = vec![EventArg::Json(Value::String(name))];
        all_args.extend(args);
        let (data, attachments) = encode_args(all_args);

        let ack_id = ack.map(|(sender, timeout)| {
            let id = self.acks.allocate_id();
            self.acks.register(id, sender);
            let queue = self.q();
            self.timeouts.schedule(&queue, access_timeouts, timeout, ID_ACK, move |state| {
                state.acks.cancel(id, Error::AckTimeout(id));
            });
            id
        });

        let packet = Packet::event(self.namespace.clone(), ack_id, data, attachments);
        if self.status == ClientStatus::Connected {
            self.send_packet(packet);
        } else {
            self.pending_emits.push_back(packet);
        }
    }

    fn flush_pending_emits(&mut self) {
        while let Some(packet) = self.pending_emits.pop_front() {
            self.send_packet(packet);
        }
    }

    fn send_packet(&mut self, packet: Packet) {
        let Some(engine) = &self.engine else { return };
        let attachments = packet.attachments.clone();
        engine.send_text(packet.encode_text());
        for chunk in attachments {
            engine.send_binary(chunk);
        }
    }

    // -- namespace management (§4.7) -----------------------------------------

    fn join(&mut self, namespace: String) {
        if namespace == self.namespace {
            return;
        }
        if self.namespace != "/" && self.status == ClientStatus::Connected {
            let packet = Packet::disconnect(self.namespace.clone());
            self.send_packet(packet);
        }
        self.namespace = namespace;
        if matches!(self.status, ClientStatus::Opened | ClientStatus::Connected) {
            self.status = ClientStatus::Opened;
            self.notify_status();
            let payload = self.connect_payload();
            let packet = Packet::connect(self.namespace.clone(), payload);
            self.send_packet(packet);
        }
    }

    fn leave(&mut self) {
        if self.namespace == "/" {
            return;
        }
        if self.status == ClientStatus::Connected {
            let packet = Packet::disconnect(self.namespace.clone());
            self.send_packet(packet);
        }
        self.namespace = "/".to_string();
    }
}

fn split_event(data: Option<Value>) -> Result<(String, Value)> {
    match data {
        Some(Value::Array(mut items)) if !items.is_empty() => {
            let name = items.remove(0);
            match name {
                Value::String(s) => Ok((s, Value::Array(items))),
                _ => Err(Error::Protocol("event name must be a string".to_string())),
            }
        }
        _ => Err(Error::Protocol(
            "event packet payload must be a non-empty array".to_string(),
        )),
    }
}

/// Clone-able handle to a running socket.io client.
#[derive(Clone)]
pub struct Client {
    queue: TaskQueueHandle<ClientState>,
    status_rx: watch::Receiver<ClientStatus>,
    next_handler_id: Arc<AtomicU64>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ClientStatus::NotConnected);
        let handler_id_counter = Arc::new(AtomicU64::new(0));
        let namespace = config.namespace.clone();
        let reconnect = ReconnectPolicy::new(
            config.reconnection_delay,
            config.reconnection_delay_max,
            config.randomization_factor,
            config.reconnection_attempts,
        );
        let state = ClientState {
            config,
            queue: None,
            engine: None,
            namespace,
            status: ClientStatus::NotConnected,
            status_tx,
            acks: AckRegistry::new(),
            handlers: HandlerRegistry::new(),
            reconnect,
            pending_emits: VecDeque::new(),
            reassembly: None,
            timeouts: TimeoutManager::new(),
            local_disconnect: false,
            handler_id_counter: handler_id_counter.clone(),
        };
        let queue = task::spawn(state);
        let self_handle = queue.clone();
        queue.post(move |state| state.queue = Some(self_handle));
        Client {
            queue,
            status_rx,
            next_handler_id: handler_id_counter,
        }
    }

    #[cfg(test)]
    pub(crate) fn disconnected_for_test() -> Self {
        Self::new(ClientConfig::builder(url::Url::parse("http://localhost/").unwrap()).build())
    }

    pub fn connect(&self) {
        self.queue.post(|state| state.start_connect());
    }

    pub fn disconnect(&self) {
        self.queue.post(|state| state.start_disconnect());
    }

    pub fn reconnect(&self) {
        self.queue.post(|state| state.start_manual_reconnect());
    }

    pub fn current_status(&self) -> ClientStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status transitions (§6: "status-change callback").
    pub fn status_changes(&self) -> watch::Receiver<ClientStatus> {
        self.status_rx.clone()
    }

    pub fn emit(&self, event: impl Into<String>, args: Vec<EventArg>) {
        let event = event.into();
        self.queue.post(move |state| state.emit(event, args, None));
    }

    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        args: Vec<EventArg>,
        timeout: Duration,
    ) -> Result<Vec<EventArg>> {
        let (tx, rx) = oneshot::channel();
        let event = event.into();
        self.queue
            .post(move |state| state.emit(event, args, Some((tx, timeout))));
        rx.await.map_err(|_| Error::NotConnected)?
    }

    pub fn on(
        &self,
        event: impl Into<String>,
        handler: impl FnMut(Client, Vec<EventArg>, Option<AckResponder>) + Send + 'static,
    ) -> HandlerHandle {
        let handle = self.alloc_handle();
        let event = event.into();
        let boxed: BoxedHandler = Box::new(handler);
        self.queue.post(move |state| {
            let ns = state.namespace.clone();
            state.handlers.on(&ns, &event, handle, boxed);
        });
        handle
    }

    pub fn once(
        &self,
        event: impl Into<String>,
        handler: impl FnMut(Client, Vec<EventArg>, Option<AckResponder>) + Send + 'static,
    ) -> HandlerHandle {
        let handle = self.alloc_handle();
        let event = event.into();
        let boxed: BoxedHandler = Box::new(handler);
        self.queue.post(move |state| {
            let ns = state.namespace.clone();
            state.handlers.once(&ns, &event, handle, boxed);
        });
        handle
    }

    pub fn on_any(
        &self,
        handler: impl FnMut(Client, Vec<EventArg>, Option<AckResponder>) + Send + 'static,
    ) -> HandlerHandle {
        let handle = self.alloc_handle();
        let boxed: BoxedHandler = Box::new(handler);
        self.queue.post(move |state| state.handlers.on_any(handle, boxed));
        handle
    }

    pub fn off(&self, event: impl Into<String>) {
        let event = event.into();
        self.queue.post(move |state| {
            let ns = state.namespace.clone();
            state.handlers.off(&ns, &event);
        });
    }

    pub fn off_by_handle(&self, handle: HandlerHandle) {
        self.queue.post(move |state| state.handlers.off_by_handle(handle));
    }

    pub fn join(&self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        self.queue.post(move |state| state.join(namespace));
    }

    pub fn leave(&self) {
        self.queue.post(|state| state.leave());
    }

    fn alloc_handle(&self) -> HandlerHandle {
        HandlerHandle(self.next_handler_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
