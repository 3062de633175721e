//! Event handler registry (§4.6.4).
//!
//! Handlers receive a [`crate::client::Client`] *by value* — a cheap clone of
//! a channel sender, not a strong owning reference back to the actor that
//! holds this registry — so a handler stashing its `Client` and the registry
//! holding the handler never forms an ownership cycle (Design Notes §9).

use std::collections::HashMap;

use crate::client::Client;
use crate::packet::EventArg;

pub type AckResponder = Box<dyn FnOnce(Vec<EventArg>) + Send>;
pub type BoxedHandler = Box<dyn FnMut(Client, Vec<EventArg>, Option<AckResponder>) + Send>;

/// Identifies a registered handler for later removal via
/// [`HandlerRegistry::off_by_handle`]. Allocated by [`crate::client::Client`]
/// itself (a plain atomic counter) so that `on`/`once` can hand one back
/// synchronously, without a round trip through the actor queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerHandle(pub u64);

struct Entry {
    id: u64,
    once: bool,
    handler: BoxedHandler,
}

/// Per-client registry of `on`/`once`/`on_any` event listeners, keyed by
/// `(namespace, event)`.
#[derive(Default)]
pub struct HandlerRegistry {
    by_event: HashMap<(String, String), Vec<Entry>>,
    catch_all: Vec<Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, namespace: &str, event: &str, handle: HandlerHandle, handler: BoxedHandler) {
        self.by_event
            .entry((namespace.to_string(), event.to_string()))
            .or_default()
            .push(Entry { id: handle.0, once: false, handler });
    }

    pub fn once(&mut self, namespace: &str, event: &str, handle: HandlerHandle, handler: BoxedHandler) {
        self.by_event
            .entry((namespace.to_string(), event.to_string()))
            .or_default()
            .push(Entry { id: handle.0, once: true, handler });
    }

    /// Register a catch-all listener that sees every event on every
    /// namespace, never consuming the ack responder.
    pub fn on_any(&mut self, handle: HandlerHandle, handler: BoxedHandler) {
        self.catch_all.push(Entry { id: handle.0, once: false, handler });
    }

    pub fn off(&mut self, namespace: &str, event: &str) {
        self.by_event.remove(&(namespace.to_string(), event.to_string()));
    }

    pub fn off_by_handle(&mut self, handle: HandlerHandle) {
        self.by_event.retain(|_, entries| {
            entries.retain(|e| e.id != handle.0);
            !entries.is_empty()
        });
        self.catch_all.retain(|e| e.id != handle.0);
    }

    /// Deliver `args` to every handler registered for `(namespace, event)`,
    /// plus every catch-all listener. Only the first handler invoked
    /// receives `ack` — a responder is a single-shot callback, so with more
    /// than one listener on the same event only one of them can plausibly
    /// own it.
    pub fn dispatch(
        &mut self,
        namespace: &str,
        event: &str,
        client: Client,
        args: Vec<EventArg>,
        mut ack: Option<AckResponder>,
    ) {
        let key = (namespace.to_string(), event.to_string());
        if let Some(mut entries) = self.by_event.remove(&key) {
            let mut keep = Vec::with_capacity(entries.len());
            for mut entry in entries.drain(..) {
                let this_ack = ack.take();
                (entry.handler)(client.clone(), args.clone(), this_ack);
                if !entry.once {
                    keep.push(entry);
                }
            }
            if !keep.is_empty() {
                self.by_event.insert(key, keep);
            }
        }
        for entry in self.catch_all.iter_mut() {
            (entry.handler)(client.clone(), args.clone(), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_client() -> Client {
        Client::disconnected_for_test()
    }

    #[test]
    fn on_fires_every_time() {
        let mut registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        registry.on(
            "/",
            "ping",
            HandlerHandle(1),
            Box::new(move |_client, _args, _ack| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.dispatch("/", "ping", noop_client(), Vec::new(), None);
        registry.dispatch("/", "ping", noop_client(), Vec::new(), None);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_a_single_time() {
        let mut registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        registry.once(
            "/",
            "ready",
            HandlerHandle(1),
            Box::new(move |_client, _args, _ack| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.dispatch("/", "ready", noop_client(), Vec::new(), None);
        registry.dispatch("/", "ready", noop_client(), Vec::new(), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_by_handle_removes_only_that_handler() {
        let mut registry = HandlerRegistry::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let (ca, cb) = (count_a.clone(), count_b.clone());
        let handle_a = HandlerHandle(1);
        registry.on("/", "x", handle_a, Box::new(move |_c, _a, _k| { ca.fetch_add(1, Ordering::SeqCst); }));
        registry.on("/", "x", HandlerHandle(2), Box::new(move |_c, _a, _k| { cb.fetch_add(1, Ordering::SeqCst); }));
        registry.off_by_handle(handle_a);
        registry.dispatch("/", "x", noop_client(), Vec::new(), None);
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn catch_all_sees_every_event() {
        let mut registry = HandlerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        registry.on_any(
            HandlerHandle(1),
            Box::new(move |_c, _a, _k| {
                seen2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.dispatch("/", "a", noop_client(), Vec::new(), None);
        registry.dispatch("/chat", "b", noop_client(), Vec::new(), None);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
