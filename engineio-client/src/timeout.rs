//! Timeout manager (§4.2).
//!
//! Lives as a field inside some actor state `S`; scheduling a timeout spawns
//! a bare `tokio::time::sleep` task that, on expiry, posts a job back onto
//! the owning [`crate::task::TaskQueueHandle`]. Because the manager itself
//! is just bookkeeping (no callbacks stored), cancellation only needs to
//! invalidate a generation counter — it never races the fire.
//!
//! Grounded on `RTCVPTimeoutManager` (`schedule`/`cancel`/
//! `cancelAllTasksWithIdentifier`/`resetTasksWithIdentifier`/
//! `activeTaskCount`), reshaped from a process-wide singleton into a plain
//! struct owned by one task queue.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::task::TaskQueueHandle;

/// Opaque handle to a scheduled timeout, returned by [`TimeoutManager::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

struct Entry {
    identifier: String,
    duration: Duration,
}

/// Schedules, cancels, and fires deadline callbacks on a task queue.
#[derive(Default)]
pub struct TimeoutManager {
    next_id: u64,
    entries: HashMap<TaskHandle, Entry>,
    by_identifier: HashMap<String, HashSet<TaskHandle>>,
}

impl TimeoutManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> TaskHandle {
        self.next_id += 1;
        TaskHandle(self.next_id)
    }

    fn insert(&mut self, handle: TaskHandle, identifier: String, duration: Duration) {
        self.by_identifier
            .entry(identifier.clone())
            .or_default()
            .insert(handle);
        self.entries.insert(handle, Entry {
            identifier,
            duration,
        });
    }

    fn remove(&mut self, handle: TaskHandle) -> Option<Entry> {
        let entry = self.entries.remove(&handle)?;
        if let Some(set) = self.by_identifier.get_mut(&entry.identifier) {
            set.remove(&handle);
            if set.is_empty() {
                self.by_identifier.remove(&entry.identifier);
            }
        }
        Some(entry)
    }

    /// Returns true (and removes the entry) if `handle` is still pending.
    /// Fire sites use this to make "cancelled after firing" a no-op: once
    /// removed, a second fire attempt (there never is one here, but a
    /// defensive check costs nothing) simply returns false.
    pub fn take_if_live(&mut self, handle: TaskHandle) -> bool {
        self.remove(handle).is_some()
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.remove(handle).is_some()
    }

    pub fn cancel_all_with_identifier(&mut self, identifier: &str) {
        if let Some(handles) = self.by_identifier.remove(identifier) {
            for handle in handles {
                self.entries.remove(&handle);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }

    pub fn count_with_identifier(&self, identifier: &str) -> usize {
        self.by_identifier
            .get(identifier)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Schedule `callback` to fire in `duration` unless cancelled first.
    ///
    /// `accessor` extracts `&mut TimeoutManager` back out of the actor state
    /// `S` when the timer fires on the queue — the manager doesn't own a
    /// reference to itself, so this is how a job posted from a detached
    /// `tokio::time::sleep` task finds its way back to it.
    pub fn schedule<S: Send + 'static>(
        &mut self,
        queue: &TaskQueueHandle<S>,
        accessor: fn(&mut S) -> &mut TimeoutManager,
        duration: Duration,
        identifier: impl Into<String>,
        callback: impl FnOnce(&mut S) + Send + 'static,
    ) -> TaskHandle {
        let handle = self.alloc();
        self.insert(handle, identifier.into(), duration);

        let queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            queue.post(move |state: &mut S| {
                let still_live = accessor(state).take_if_live(handle);
                if still_live {
                    callback(state);
                }
            });
        });
        handle
    }

    /// Cancel and re-schedule `identifier`'s entries with their original
    /// duration. Since a single identifier may group several in-flight
    /// timeouts (e.g. all probe timeouts for one engine), this reschedules
    /// each one independently with its own recorded duration. Used to
    /// extend a deadline that's still pending on fresh evidence of
    /// liveness, rather than tearing it down and starting over.
    pub fn reset<S: Send + 'static>(
        &mut self,
        queue: &TaskQueueHandle<S>,
        accessor: fn(&mut S) -> &mut TimeoutManager,
        identifier: &str,
        callback_factory: impl Fn() -> Box<dyn FnOnce(&mut S) + Send> ,
    ) {
        let handles: Vec<TaskHandle> = self
            .by_identifier
            .get(identifier)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for handle in handles {
            if let Some(entry) = self.remove(handle) {
                let duration = entry.duration;
                let identifier = entry.identifier;
                let callback = callback_factory();
                self.schedule(queue, accessor, duration, identifier, move |s| callback(s));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct State {
        timeouts: TimeoutManager,
    }

    fn access(s: &mut State) -> &mut TimeoutManager {
        &mut s.timeouts
    }

    #[tokio::test]
    async fn fires_after_deadline() {
        let fired = Arc::new(AtomicBool::new(false));
        let queue = task::spawn(State {
            timeouts: TimeoutManager::new(),
        });
        let fired2 = fired.clone();
        let q2 = queue.clone();
        queue.post(move |s| {
            s.timeouts.schedule(
                &q2,
                access,
                Duration::from_millis(20),
                "ping",
                move |_s| fired2.store(true, Ordering::SeqCst),
            );
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let queue = task::spawn(State {
            timeouts: TimeoutManager::new(),
        });
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let q2 = queue.clone();
        queue.post(move |s| {
            let handle = s.timeouts.schedule(
                &q2,
                access,
                Duration::from_millis(20),
                "ping",
                move |_s| fired2.store(true, Ordering::SeqCst),
            );
            assert!(s.timeouts.cancel(handle));
            assert!(!s.timeouts.cancel(handle));
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_all_with_identifier_bulk_cancels() {
        let queue = task::spawn(State {
            timeouts: TimeoutManager::new(),
        });
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let q2 = queue.clone();
        let count2 = count.clone();
        queue.post(move |s| {
            for _ in 0..3 {
                s.timeouts.schedule(
                    &q2,
                    access,
                    Duration::from_millis(20),
                    "probe",
                    |_s| {},
                );
            }
            assert_eq!(s.timeouts.count_with_identifier("probe"), 3);
            s.timeouts.cancel_all_with_identifier("probe");
            assert_eq!(s.timeouts.count_with_identifier("probe"), 0);
        });
        let _ = count2;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_extends_a_still_pending_deadline() {
        let queue = task::spawn(State {
            timeouts: TimeoutManager::new(),
        });
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let q2 = queue.clone();
        queue.post(move |s| {
            s.timeouts.schedule(
                &q2,
                access,
                Duration::from_millis(40),
                "watchdog",
                move |_s| fired2.store(true, Ordering::SeqCst),
            );
        });

        // Reset partway through the original deadline: it should not fire
        // at the original 40ms mark.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fired3 = fired.clone();
        let q3 = queue.clone();
        queue.post(move |s| {
            s.timeouts.reset(&q3, access, "watchdog", move || {
                let fired = fired3.clone();
                Box::new(move |_s: &mut State| fired.store(true, Ordering::SeqCst))
            });
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!fired.load(Ordering::SeqCst), "reset should have pushed the deadline out");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fired.load(Ordering::SeqCst), "reset deadline should eventually fire");
    }
}
