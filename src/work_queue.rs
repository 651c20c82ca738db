//! Bounded work queue with a single background consumer
//!
//! Producers append opaque work items. When the backlog grows past the
//! configured capacity the producer blocks until the consumer has swapped
//! out and run a batch, which bounds memory no matter how bursty the
//! producer is.
//!
//! Two ways to shut down:
//! - [`WorkQueue::close`]: graceful. Every item accepted before the call runs
//!   before `close` returns.
//! - [`WorkQueue::abort`]: abrupt. The batch the consumer is already running
//!   completes, anything still pending is dropped.
//!
//! Either way the queue ends up disposed and further calls fail with
//! [`QueueError::Disposed`].

use crate::error::QueueError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A deferred action run on the consumer thread.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Capacity used when a queue is created with capacity 0.
pub const DEFAULT_CAPACITY: usize = 10;

/// Longest the consumer sleeps before draining whatever is pending.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Re-check interval for a producer blocked on backpressure.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    None,
    Drain,
    Abort,
}

struct State {
    pending: VecDeque<WorkItem>,
    stop: Stop,
    disposed: bool,
    executed: u64,
    discarded: u64,
}

struct Shared {
    name: String,
    capacity: usize,
    flush_interval: Duration,
    state: Mutex<State>,
    /// Signals the consumer: capacity breached or stop requested.
    work_ready: Condvar,
    /// Signals blocked producers: a batch has been run or the queue stopped.
    room_available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capacity-bounded queue drained by exactly one background thread.
pub struct WorkQueue {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Create a queue; a `capacity` of 0 is replaced by [`DEFAULT_CAPACITY`].
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_flush_interval(name, capacity, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_flush_interval(
        name: impl Into<String>,
        capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        let name = name.into();
        let capacity = if capacity == 0 {
            tracing::debug!(queue = %name, "capacity 0 replaced by default {}", DEFAULT_CAPACITY);
            DEFAULT_CAPACITY
        } else {
            capacity
        };

        Self {
            shared: Arc::new(Shared {
                name,
                capacity,
                flush_interval,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    stop: Stop::None,
                    disposed: false,
                    executed: 0,
                    discarded: 0,
                }),
                work_ready: Condvar::new(),
                room_available: Condvar::new(),
            }),
            consumer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of accepted items not yet handed to the consumer.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Number of items the consumer has run.
    pub fn executed(&self) -> u64 {
        self.shared.lock().executed
    }

    /// Number of items dropped by an abrupt stop.
    pub fn discarded(&self) -> u64 {
        self.shared.lock().discarded
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Append `item`. Blocks while the backlog exceeds the capacity, until the
    /// consumer has run a batch or the queue is aborted.
    ///
    /// Rejected as soon as shutdown has begun, since the consumer may already
    /// have exited.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.disposed || state.stop != Stop::None {
            return Err(QueueError::Disposed(shared.name.clone()));
        }

        state.pending.push_back(item);
        if state.pending.len() <= shared.capacity {
            return Ok(());
        }

        tracing::trace!(queue = %shared.name, pending = state.pending.len(), "backpressure");
        shared.work_ready.notify_one();
        while state.pending.len() > shared.capacity && !state.disposed && state.stop != Stop::Abort {
            let (guard, _) = shared
                .room_available
                .wait_timeout(state, BACKPRESSURE_WAIT)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        Ok(())
    }

    /// Convenience wrapper around [`enqueue`](Self::enqueue) for closures.
    pub fn submit<F>(&self, work: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(work))
    }

    /// Start the consumer thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed(self.shared.name.clone()));
        }

        let mut consumer = self.consumer.lock().unwrap_or_else(PoisonError::into_inner);
        if consumer.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("queue-{}", self.shared.name))
            .spawn(move || drain_loop(&shared))
            .map_err(|source| QueueError::Spawn {
                name: self.shared.name.clone(),
                source,
            })?;
        *consumer = Some(handle);
        tracing::debug!(queue = %self.shared.name, capacity = self.shared.capacity, "consumer started");
        Ok(())
    }

    /// Graceful shutdown: run everything accepted so far, stop the consumer
    /// and dispose the queue. Starts the consumer first if needed.
    pub fn close(&self) -> Result<(), QueueError> {
        self.start()?;
        {
            let mut state = self.shared.lock();
            state.stop = Stop::Drain;
        }
        self.shared.work_ready.notify_all();
        self.join_consumer();
        self.mark_disposed();
        tracing::debug!(queue = %self.shared.name, executed = self.executed(), "closed");
        Ok(())
    }

    /// Abrupt shutdown: drop pending items, let the running batch finish,
    /// stop the consumer and dispose the queue.
    pub fn abort(&self) -> Result<(), QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed(self.shared.name.clone()));
        }
        self.stop_abruptly();
        Ok(())
    }

    /// Release the queue. Behaves like [`abort`](Self::abort) on a live queue;
    /// a second call does nothing.
    pub fn dispose(&self) {
        if !self.is_disposed() {
            self.stop_abruptly();
        }
    }

    fn stop_abruptly(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            state.stop = Stop::Abort;
            let dropped = std::mem::take(&mut state.pending);
            state.discarded += dropped.len() as u64;
            dropped
        };
        self.shared.work_ready.notify_all();
        self.shared.room_available.notify_all();

        let count = dropped.len();
        drop(dropped);
        self.join_consumer();
        self.mark_disposed();
        tracing::debug!(queue = %self.shared.name, discarded = count, "aborted");
    }

    fn join_consumer(&self) {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A work item stopping its own queue cannot wait for itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(queue = %self.shared.name, "consumer thread panicked");
            }
        }
    }

    fn mark_disposed(&self) {
        let mut state = self.shared.lock();
        state.disposed = true;
        drop(state);
        self.shared.room_available.notify_all();
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn drain_loop(shared: &Shared) {
    loop {
        let batch = {
            let mut state = shared.lock();
            if state.stop == Stop::None && state.pending.len() <= shared.capacity {
                let (guard, _) = shared
                    .work_ready
                    .wait_timeout(state, shared.flush_interval)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }

            match state.stop {
                Stop::Abort => {
                    let dropped = std::mem::take(&mut state.pending);
                    state.discarded += dropped.len() as u64;
                    break;
                }
                Stop::Drain if state.pending.is_empty() => break,
                _ => {}
            }
            if state.pending.is_empty() {
                continue;
            }
            std::mem::take(&mut state.pending)
        };

        let count = batch.len() as u64;
        for item in batch {
            if panic::catch_unwind(AssertUnwindSafe(item)).is_err() {
                tracing::error!(queue = %shared.name, "work item panicked");
            }
        }

        shared.lock().executed += count;
        shared.room_available.notify_all();
    }

    shared.room_available.notify_all();
    tracing::trace!(queue = %shared.name, "consumer exiting");
}
