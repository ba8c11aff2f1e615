use std::sync::mpsc::{self, SendError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::Result;

/// Unit of work for the owning thread.
enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

struct Worker {
    tx: Sender<Job>,
    thread_id: ThreadId,
    join: Option<JoinHandle<()>>,
}

/// The owning thread of a connection passes through these states exactly
/// once; `Finished` is terminal and makes a second shutdown a no-op.
enum WorkerSlot {
    Idle,
    Running(Worker),
    Finished,
}

/// Marshals calls onto a connection's owning execution context.
///
/// In threaded mode, `launch` spawns a dedicated thread whose loop drains
/// jobs until shutdown. `call` is a blocking rendezvous: the operation is
/// queued, the caller parks on a one-shot result channel, and the result
/// is handed back only after the owning thread has fully completed the
/// closure. The fast path runs the closure inline whenever the caller is
/// already on the owning thread (which could not service a request it is
/// itself blocked on) or no owning thread is running.
pub(crate) struct Dispatcher {
    threaded: bool,
    slot: Mutex<WorkerSlot>,
}

impl Dispatcher {
    pub fn new(threaded: bool) -> Self {
        Self {
            threaded,
            slot: Mutex::new(WorkerSlot::Idle),
        }
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.slot(), WorkerSlot::Running(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.slot(), WorkerSlot::Finished)
    }

    pub fn on_owner_thread(&self) -> bool {
        match &*self.slot() {
            WorkerSlot::Running(worker) => worker.thread_id == thread::current().id(),
            _ => false,
        }
    }

    /// Spawns the owning thread with `first_job` already queued. Returns
    /// false without side effects when not in threaded mode or when a
    /// worker was already launched for this connection.
    pub fn launch(&self, name: &str, first_job: Box<dyn FnOnce() + Send>) -> bool {
        if !self.threaded {
            return false;
        }
        let mut slot = self.slot();
        if !matches!(*slot, WorkerSlot::Idle) {
            return false;
        }
        let (tx, rx) = mpsc::channel::<Job>();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    Job::Run(work) => work(),
                    Job::Shutdown => break,
                }
            }
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                warn!(name, error = %err, "failed to spawn owning thread");
                return false;
            }
        };
        let thread_id = handle.thread().id();
        let _ = tx.send(Job::Run(first_job));
        *slot = WorkerSlot::Running(Worker {
            tx,
            thread_id,
            join: Some(handle),
        });
        debug!(name, "owning thread launched");
        true
    }

    /// Executes `op` on the owning thread and blocks until it completes,
    /// or runs it inline when no cross-thread handoff is needed.
    pub fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tx = {
            let slot = self.slot();
            match &*slot {
                WorkerSlot::Running(worker) if worker.thread_id != thread::current().id() => {
                    worker.tx.clone()
                }
                _ => {
                    drop(slot);
                    return op();
                }
            }
        };

        let (result_tx, result_rx) = mpsc::channel();
        let job = Job::Run(Box::new(move || {
            let _ = result_tx.send(op());
        }));
        if let Err(SendError(job)) = tx.send(job) {
            // The owning thread shut down since the check above; run on
            // the caller, as a never-started connection would.
            if let Job::Run(work) = job {
                work();
            }
        }
        match result_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Dispatch),
        }
    }

    /// Asks the owning thread to exit and joins it. Jobs queued before the
    /// shutdown request still run. Returns true when this call performed
    /// the join.
    pub fn shutdown(&self) -> bool {
        let worker = {
            let mut slot = self.slot();
            match &*slot {
                WorkerSlot::Running(_) => {}
                _ => return false,
            }
            match std::mem::replace(&mut *slot, WorkerSlot::Finished) {
                WorkerSlot::Running(worker) => worker,
                _ => return false,
            }
        };
        let _ = worker.tx.send(Job::Shutdown);
        if worker.thread_id == thread::current().id() {
            // A thread cannot join itself; the loop exits on its own once
            // it reaches the shutdown job.
            return true;
        }
        if let Some(handle) = worker.join {
            if handle.join().is_err() {
                warn!("owning thread terminated with a panic");
            }
        }
        debug!("owning thread joined");
        true
    }

    fn slot(&self) -> MutexGuard<'_, WorkerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
