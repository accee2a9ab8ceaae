//! Serial execution queues.
//!
//! Each queue owns one worker thread draining a FIFO channel of jobs. A
//! context is permanently bound to one queue and everything that touches the
//! context's state runs as a job here, which is the sole mechanism preventing
//! data races on context state. The worker records which queue it executes
//! for in thread-local state; the synchronous entry points use that to run
//! inline instead of deadlocking, and to reject reentrant blocking calls.

use crate::types::{QueueId, QueueIdentity};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT: RefCell<Option<(QueueId, Weak<QueueShared>)>> = const { RefCell::new(None) };
}

struct QueueShared {
    id: QueueId,
    label: String,
    tx: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a serial queue. Clones share the same worker; the worker drains
/// already-enqueued jobs before stopping when the queue is shut down.
#[derive(Clone)]
pub struct SerialQueue {
    shared: Arc<QueueShared>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Self {
        let id = QueueId::next();
        let label = label.into();
        let (tx, rx) = channel::<Job>();
        let shared = Arc::new(QueueShared {
            id,
            label,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let thread_label = shared.label.clone();
        let handle = thread::Builder::new()
            .name(format!("strata-{}", thread_label))
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some((id, weak)));
                debug!(queue = %id, label = %thread_label, "queue worker started");
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!(queue = %id, label = %thread_label, "queue worker stopped");
            })
            .expect("failed to spawn serial queue worker thread");
        *shared.worker.lock() = Some(handle);

        Self { shared }
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Queue the current thread is executing for, if any.
    pub fn current_id() -> Option<QueueId> {
        CURRENT.with(|c| c.borrow().as_ref().map(|(id, _)| *id))
    }

    /// Handle to the queue the current thread is executing for, if any.
    pub fn current() -> Option<SerialQueue> {
        CURRENT.with(|c| {
            c.borrow()
                .as_ref()
                .and_then(|(_, weak)| weak.upgrade())
                .map(|shared| SerialQueue { shared })
        })
    }

    /// Identity of the calling execution context: the managed queue when on
    /// one, the OS thread otherwise.
    pub fn current_identity() -> QueueIdentity {
        match Self::current_id() {
            Some(id) => QueueIdentity::Queue(id),
            None => QueueIdentity::Thread(thread::current().id()),
        }
    }

    /// True when the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        Self::current_id() == Some(self.shared.id)
    }

    /// Enqueue a job. FIFO relative to other dispatches from the same caller.
    /// Jobs enqueued after shutdown are dropped with a warning; a dispatched
    /// job otherwise always runs.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let tx = self.shared.tx.lock().clone();
        match tx {
            Some(tx) => {
                if tx.send(Box::new(job)).is_err() {
                    warn!(queue = %self.shared.id, "job dropped: queue worker is gone");
                }
            }
            None => {
                warn!(queue = %self.shared.id, "job dropped: queue is shut down");
            }
        }
    }

    /// Run a job on this queue and block for its result. Runs inline when the
    /// caller is already on this queue, so same-queue calls cannot deadlock.
    pub fn run_sync<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return f();
        }
        let (tx, rx) = channel();
        self.dispatch(move || {
            let _ = tx.send(f());
        });
        rx.recv()
            .expect("serial queue shut down while a synchronous job was waiting")
    }

    /// Stop accepting jobs, drain what is already enqueued, and join the
    /// worker. Safe to call more than once.
    pub fn shutdown(&self) {
        let tx = self.shared.tx.lock().take();
        drop(tx);
        if self.is_current() {
            warn!(queue = %self.shared.id, "shutdown requested from the queue's own worker, skipping join");
            return;
        }
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(queue = %self.shared.id, "queue worker panicked before shutdown");
            }
        }
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .finish()
    }
}
