//! The `Dispatcher` collaborator: a shared execution context a `System`
//! hands to every server attached to it, so those servers' mailboxes run on
//! a pooled set of threads rather than each owning a dedicated one.
//!
//! Grounded on the worker-pool pattern the teacher crate uses for its
//! polyfill executor: a fixed number of OS threads, sized by
//! [`num_cpus::get`], pulling closures off a shared channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::panic_desc::describe_panic;

/// A task handed to a [`Dispatcher`]: an opaque unit of work belonging to
/// some mailbox's drain loop.
pub type DispatchTask = Box<dyn FnOnce() + Send>;

/// Something that can run [`DispatchTask`]s, shared by every
/// [`crate::mailbox::DispatchedMailbox`] attached to the same
/// [`crate::system::System`].
///
/// This crate ships exactly one implementation, [`ThreadPoolDispatcher`];
/// the trait exists so a `System` can be constructed around a different
/// execution context (a real thread pool crate, a single dedicated thread,
/// a test-only inline dispatcher) without touching anything above it.
pub trait Dispatcher: Send + Sync {
    /// Schedules `task` to run on some worker. Must not block the caller.
    fn dispatch(&self, task: DispatchTask);
}

/// A fixed-size pool of named worker threads draining a shared queue of
/// dispatch tasks.
pub struct ThreadPoolDispatcher {
    sender: Sender<DispatchTask>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolDispatcher {
    /// Spawns `worker_count` worker threads (clamped to at least one).
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<DispatchTask>();
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("gen-server-dispatch-{index}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                            tracing::error!(
                                worker = index,
                                panic = %describe_panic(&payload),
                                "dispatched task panicked"
                            );
                        }
                    }
                })
                .expect("failed to spawn dispatcher worker thread");
            workers.push(handle);
        }
        Self {
            sender,
            workers: Mutex::new(workers),
        }
    }

    /// Builds a pool sized to the number of available CPUs.
    pub fn with_default_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    /// Stops accepting new tasks and joins every worker thread, waiting for
    /// whatever each is currently running to finish.
    pub fn shutdown(self) {
        drop(self.sender);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, task: DispatchTask) {
        // A disconnected receiver means every worker thread has exited,
        // which only happens after `shutdown` consumes `self`; dropping the
        // task here is the right call, there is nowhere left to run it.
        let _ = self.sender.send(task);
    }
}

impl std::fmt::Debug for ThreadPoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolDispatcher")
            .field("workers", &self.workers.lock().unwrap().len())
            .finish()
    }
}
