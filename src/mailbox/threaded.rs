//! The default mailbox backend: one dedicated OS thread per server, looping
//! over its own queue. Grounded on `alliecatowo-lumen`'s `spawn_actor` thread
//! loop — same `recv`-until-disconnected shape, and the same "decide whether
//! to keep looping from the result of handling the message, not from which
//! message variant came in" stop semantics (there, `ActorResult::Stop`;
//! here, `core.running` going false).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};

use super::{make_channel, run_job, Job, MailboxBackend, ReplyRoute};
use crate::handler::Handler;
use crate::reply::{CallReply, CastAck};
use crate::server::ServerCore;

pub(crate) struct ThreadedMailbox<H: Handler> {
    core: Arc<ServerCore<H>>,
    sender: Mutex<Option<Sender<Job<H>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    active: Arc<AtomicBool>,
}

impl<H: Handler> ThreadedMailbox<H> {
    pub(crate) fn new(core: Arc<ServerCore<H>>) -> Self {
        let (tx, rx) = make_channel(core.max_queue_size);
        let active = Arc::new(AtomicBool::new(true));
        let worker_active = Arc::clone(&active);
        let worker_core = Arc::clone(&core);

        let worker = std::thread::Builder::new()
            .name(format!("gen-server-{}", core.name))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    tracing::trace!(server = %worker_core.name, "threaded mailbox dequeued job");
                    run_job(&worker_core, job);
                    // A handler returning `HandlerOutcome::Stop` (or a
                    // `Job::Stop`) flips `core.running` without the loop
                    // itself ever seeing a `Job::Stop` variant come through
                    // `rx.recv()` again — checking the job kind alone would
                    // leave this thread blocked on `recv()` forever, since
                    // the `Sender` lives on in `self.sender` until `stop()`
                    // explicitly drops it.
                    if !worker_core.running.load(Ordering::SeqCst) {
                        worker_active.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            })
            .expect("failed to spawn mailbox worker thread");

        Self {
            core,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            active,
        }
    }

    fn send(&self, job: Job<H>) -> Result<(), TrySendError<Job<H>>> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(TrySendError::Disconnected(job));
        }
        let guard = self.sender.lock().unwrap();
        match guard.as_ref() {
            Some(sender) => sender.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        }
    }

    fn warn_queue_full(&self) {
        tracing::warn!(
            server = %self.core.name,
            max_queue_size = ?self.core.max_queue_size,
            "mailbox full, rejecting submission"
        );
    }
}

impl<H: Handler> MailboxBackend<H> for ThreadedMailbox<H> {
    fn submit_call(&self, msg: H::Message) -> CallReply<H::Reply> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let job = Job::User {
            msg,
            reply_tx: Some(reply_tx),
            sender: None,
            reply_required: true,
        };
        match self.send(job) {
            Ok(()) => reply_rx.recv().unwrap_or(CallReply::Stopped),
            Err(TrySendError::Full(_)) => {
                self.warn_queue_full();
                CallReply::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => CallReply::Stopped,
        }
    }

    fn submit_cast(
        &self,
        msg: H::Message,
        sender: Option<Arc<dyn ReplyRoute<H::Reply>>>,
    ) -> CastAck {
        let job = Job::User {
            msg,
            reply_tx: None,
            sender,
            reply_required: false,
        };
        match self.send(job) {
            Ok(()) => CastAck::Ok,
            Err(TrySendError::Full(_)) => {
                self.warn_queue_full();
                CastAck::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => CastAck::Stopped,
        }
    }

    fn submit_stop(&self) -> CallReply<H::Reply> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let job = Job::Stop {
            reply_tx: Some(reply_tx),
        };
        match self.send(job) {
            Ok(()) => reply_rx.recv().unwrap_or(CallReply::Stopped),
            Err(TrySendError::Full(_)) => {
                self.warn_queue_full();
                CallReply::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => CallReply::Stopped,
        }
    }

    fn submit_stop_cast(&self) -> CastAck {
        let job = Job::Stop { reply_tx: None };
        match self.send(job) {
            Ok(()) => CastAck::Ok,
            Err(TrySendError::Full(_)) => {
                self.warn_queue_full();
                CastAck::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => CastAck::Stopped,
        }
    }

    fn stop(&self) -> usize {
        self.active.store(false, Ordering::SeqCst);
        let sender = self.sender.lock().unwrap().take();
        drop(sender);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        // The worker thread drains and drops whatever was still buffered
        // once the channel disconnects; we don't have a cheap way to count
        // it after the fact, so callers only learn "something may have been
        // discarded" from the disconnect itself, not an exact count.
        0
    }
}
