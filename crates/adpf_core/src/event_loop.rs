//! Single-consumer work queue with a dedicated worker thread
//!
//! Producers append tasks under a short lock and wake the worker. The worker
//! swaps the whole pending queue out in one step, releases the lock, and
//! drains the swapped-out queue front to back, so tasks run strictly in
//! enqueue order.
//!
//! Shutdown is best effort: dropping the loop stops the worker after the task
//! it is currently running, and every task still queued is dropped unexecuted.
//! A task that panics takes its worker down with it.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

/// A deferred unit of work, owned by the queue until it runs.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// OS thread id, in the form the hint session API expects.
pub type WorkerId = i32;

/// Reported when a worker died before publishing its id.
pub const UNKNOWN_WORKER: WorkerId = -1;

/// OS id of the calling thread.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_thread_id() -> WorkerId {
    // SAFETY: gettid has no preconditions and cannot fail.
    unsafe { libc::gettid() }
}

/// Process-unique id of the calling thread (no OS tid on this platform).
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn current_thread_id() -> WorkerId {
    use std::sync::atomic::AtomicI32;

    static NEXT: AtomicI32 = AtomicI32::new(1);
    thread_local! {
        static ID: WorkerId = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

struct Queue {
    pending: Mutex<VecDeque<Task>>,
    wake: Condvar,
    stopping: AtomicBool,
}

impl Queue {
    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, task: Task) {
        let mut pending = self.lock_pending();
        if self.stopping.load(Ordering::Acquire) {
            drop(pending);
            drop(task);
            return;
        }
        pending.push_back(task);
        drop(pending);
        // Only one consumer, so broadcast costs nothing extra.
        self.wake.notify_all();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Cloneable producer side of an [`EventLoop`].
///
/// Tasks running on one loop hold handles to reach other loops without
/// owning their worker threads. Enqueueing after the loop shut down drops
/// the task.
#[derive(Clone)]
pub struct LoopHandle {
    queue: Arc<Queue>,
    name: Arc<str>,
}

impl LoopHandle {
    /// Append a task. Never blocks beyond the queue lock.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.enqueue(Box::new(task));
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle").field("name", &self.name).finish()
    }
}

/// A work queue drained by one dedicated worker thread.
pub struct EventLoop {
    handle: LoopHandle,
    worker: Option<JoinHandle<()>>,
    worker_id: OnceLock<WorkerId>,
    id_rx: Mutex<Receiver<WorkerId>>,
}

impl EventLoop {
    /// Spawn the worker thread. It starts waiting for work immediately.
    pub fn new(name: &str) -> io::Result<Self> {
        let queue = Arc::new(Queue {
            pending: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
            stopping: AtomicBool::new(false),
        });
        let (id_tx, id_rx) = mpsc::channel();

        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(&worker_queue, id_tx))?;

        tracing::debug!(loop_name = name, "event loop started");

        Ok(Self {
            handle: LoopHandle {
                queue,
                name: Arc::from(name),
            },
            worker: Some(worker),
            worker_id: OnceLock::new(),
            id_rx: Mutex::new(id_rx),
        })
    }

    /// Append a task to run on the worker thread.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.enqueue(task);
    }

    /// Producer handle that can outlive borrows of this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// OS thread id of the worker.
    ///
    /// The first caller blocks until the worker has published its id; every
    /// later caller gets the cached value.
    pub fn worker_id(&self) -> WorkerId {
        *self.worker_id.get_or_init(|| {
            let rx = self.id_rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv().unwrap_or_else(|_| {
                tracing::error!(loop_name = self.name(), "worker exited before publishing its id");
                UNKNOWN_WORKER
            })
        })
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.handle.name)
            .field("worker_id", &self.worker_id.get())
            .finish()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let queue = &self.handle.queue;
        {
            let _pending = queue.lock_pending();
            queue.stopping.store(true, Ordering::Release);
        }
        queue.wake.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                tracing::warn!(loop_name = self.name(), "event loop dropped from its own worker");
            } else if worker.join().is_err() {
                tracing::error!(loop_name = self.name(), "event loop worker panicked");
            }
        }

        // Leftover tasks may capture handles back to this queue.
        let leftover = std::mem::take(&mut *queue.lock_pending());
        if !leftover.is_empty() {
            tracing::debug!(
                loop_name = self.name(),
                dropped = leftover.len(),
                "dropping unexecuted tasks"
            );
        }
        drop(leftover);
    }
}

fn run_worker(queue: &Queue, id_tx: Sender<WorkerId>) {
    // The receiver only goes away with the loop itself.
    let _ = id_tx.send(current_thread_id());

    let mut in_flight: VecDeque<Task> = VecDeque::new();
    loop {
        {
            let pending = queue.lock_pending();
            let mut pending = queue
                .wake
                .wait_while(pending, |pending| pending.is_empty() && !queue.is_stopping())
                .unwrap_or_else(PoisonError::into_inner);
            if queue.is_stopping() {
                break;
            }
            std::mem::swap(&mut *pending, &mut in_flight);
        }

        while let Some(task) = in_flight.pop_front() {
            if queue.is_stopping() {
                break;
            }
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn flush(event_loop: &EventLoop) {
        let (tx, rx) = mpsc::channel();
        event_loop.enqueue(move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn tasks_run_in_enqueue_order() {
        let event_loop = EventLoop::new("fifo").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..500 {
            let seen = Arc::clone(&seen);
            event_loop.enqueue(move || seen.lock().unwrap().push(i));
        }
        flush(&event_loop);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn worker_id_is_stable_across_callers() {
        let event_loop = Arc::new(EventLoop::new("ids").unwrap());

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let event_loop = Arc::clone(&event_loop);
                thread::spawn(move || event_loop.worker_id())
            })
            .collect();
        let ids: Vec<WorkerId> = callers.into_iter().map(|c| c.join().unwrap()).collect();

        let (tx, rx) = mpsc::channel();
        event_loop.enqueue(move || {
            let _ = tx.send(current_thread_id());
        });
        let inside = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(ids.iter().all(|&id| id == inside));
        assert_eq!(event_loop.worker_id(), inside);
        assert_ne!(inside, current_thread_id());
    }

    #[test]
    fn drop_with_pending_tasks_terminates_promptly() {
        let ran = Arc::new(AtomicUsize::new(0));
        let event_loop = EventLoop::new("shutdown").unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        event_loop.enqueue(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(50));
        });
        for _ in 0..1000 {
            let ran = Arc::clone(&ran);
            event_loop.enqueue(move || {
                thread::sleep(Duration::from_millis(10));
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let begin = Instant::now();
        drop(event_loop);
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(ran.load(Ordering::SeqCst) < 1000);
    }

    #[test]
    fn enqueue_after_shutdown_drops_task() {
        let event_loop = EventLoop::new("late").unwrap();
        let handle = event_loop.handle();
        drop(event_loop);

        let token = Arc::new(());
        let captured = Arc::clone(&token);
        handle.enqueue(move || drop(captured));
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn handles_feed_the_same_worker() {
        let event_loop = EventLoop::new("handles").unwrap();
        let handle = event_loop.handle();
        assert_eq!(handle.name(), "handles");

        let (tx, rx) = mpsc::channel();
        handle.enqueue(move || {
            let _ = tx.send(current_thread_id());
        });
        let id = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, event_loop.worker_id());
    }
}
