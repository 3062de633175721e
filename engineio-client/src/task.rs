//! The single-writer task queue (§4.1, §5).
//!
//! All mutable state reachable from a [`TaskQueueHandle`] is owned by one
//! dedicated Tokio task; every mutation happens inside a `Job` run against
//! `&mut S` by that task, in submission order, never concurrently. Because
//! jobs are plain synchronous closures that run to completion without
//! yielding, a job posted from inside another job is guaranteed to execute
//! only after the current one returns — the queue never reenters itself.

use tokio::sync::mpsc;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A clone-able, thread-safe handle to a running task queue.
///
/// Posting is the only operation exposed: the owning state never leaves the
/// worker task, so there is nothing here to lock.
pub struct TaskQueueHandle<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for TaskQueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> TaskQueueHandle<S> {
    /// Enqueue a job. Safe to call from any thread, including from inside a
    /// job currently running on this same queue.
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) {
        // The worker may have shut down (state dropped); posting into a
        // closed queue is a silent no-op, matching "disconnect then connect
        // is safe" (§5) for a queue that already tore down.
        let _ = self.tx.send(Box::new(job));
    }

    /// True once the worker task has exited and no further job will ever
    /// run. Used to short-circuit late callbacks after a teardown.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn a new task queue owning `initial`, returning a handle to post jobs
/// to it. The worker task runs until every handle (and therefore every
/// sender) is dropped.
pub fn spawn<S: Send + 'static>(initial: S) -> TaskQueueHandle<S> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job<S>>();
    tokio::spawn(async move {
        let mut state = initial;
        while let Some(job) = rx.recv().await {
            job(&mut state);
        }
    });
    TaskQueueHandle { tx }
}

/// Post `job` onto `queue`. Provided for call sites that don't know whether
/// they are already running on `queue`'s worker (e.g. a transport callback
/// firing from an arbitrary Tokio task) — posting is always correct since
/// the queue itself guarantees non-reentrant, in-order execution.
pub fn run_or_post<S: Send + 'static>(
    queue: &TaskQueueHandle<S>,
    job: impl FnOnce(&mut S) + Send + 'static,
) {
    queue.post(job);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = spawn(Vec::<u32>::new());
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        for i in 0..10 {
            queue.post(move |v| v.push(i));
        }
        queue.post(move |v| {
            let _ = done_tx.send(v.clone());
        });
        let result = done_rx.await.unwrap();
        assert_eq!(result, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn nested_post_runs_after_current_job() {
        let queue = spawn(Vec::<u32>::new());
        let inner = queue.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        queue.post(move |v: &mut Vec<u32>| {
            v.push(1);
            inner.post(|v| v.push(3));
            v.push(2);
        });
        queue.post(move |v| {
            let _ = done_tx.send(v.clone());
        });
        assert_eq!(done_rx.await.unwrap(), vec![1, 2, 3]);
    }
}
