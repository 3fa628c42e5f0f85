//! The pooled mailbox backend: messages queue into a per-server channel,
//! but draining that channel happens on whichever thread a shared
//! [`Dispatcher`] hands the job to, and at most one drain is in flight for
//! a given mailbox at a time.
//!
//! The per-mailbox queue and "am I already scheduled" flag are a
//! composition of two grounded pieces: the teacher crate's own
//! `Mailbox<T>` (one channel per addressable unit, drained by whatever
//! executes its background task) and its `polyfill::global()` worker pool
//! (a fixed set of threads pulling closures off a shared queue). Neither
//! piece alone enforces "only one drain in flight per mailbox"; the
//! `scheduled` flag here is what adds that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::{make_channel, run_job, Job, MailboxBackend, ReplyRoute};
use crate::dispatcher::Dispatcher;
use crate::handler::Handler;
use crate::reply::{CallReply, CastAck};
use crate::server::ServerCore;

pub(crate) struct DispatchedMailbox<H: Handler> {
    sender: Sender<Job<H>>,
    receiver: Receiver<Job<H>>,
    core: Arc<ServerCore<H>>,
    dispatcher: Arc<dyn Dispatcher>,
    scheduled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl<H: Handler> DispatchedMailbox<H> {
    pub(crate) fn new(core: Arc<ServerCore<H>>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let (sender, receiver) = make_channel(core.max_queue_size);
        Self {
            sender,
            receiver,
            core,
            dispatcher,
            scheduled: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Hands a drain task to the dispatcher if one isn't already running
    /// for this mailbox. A no-op if a drain is already in flight: that
    /// drain will pick up whatever was just enqueued.
    fn try_schedule(&self) {
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let receiver = self.receiver.clone();
        let core = Arc::clone(&self.core);
        let scheduled = Arc::clone(&self.scheduled);
        let active = Arc::clone(&self.active);
        self.dispatcher.dispatch(Box::new(move || {
            drain(&receiver, &core, &scheduled, &active);
        }));
    }

    fn send(&self, job: Job<H>) -> Result<(), TrySendError<Job<H>>> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(TrySendError::Disconnected(job));
        }
        self.sender.try_send(job)
    }

    fn warn_queue_full(&self) {
        tracing::warn!(
            server = %self.core.name,
            max_queue_size = ?self.core.max_queue_size,
            "mailbox full, rejecting submission"
        );
    }
}

/// Drains every job currently available, then releases the `scheduled`
/// flag. A message enqueued in the narrow window between the last
/// `try_recv` and releasing the flag is caught by the re-check immediately
/// after: if the queue isn't empty and we win the flag back, draining
/// continues in the same dispatched task instead of leaving an orphaned
/// message with no drain scheduled.
///
/// A job that flips `core.running` to false — a `Job::Stop`, or a
/// `HandlerOutcome::Stop` from a user handler — ends the mailbox, not just
/// the one job: `active` is cleared so no further submission schedules
/// another drain, and whatever is still queued is discarded without
/// running, matching the "stop mailbox" half of a handler-initiated stop.
fn drain<H: Handler>(
    receiver: &Receiver<Job<H>>,
    core: &Arc<ServerCore<H>>,
    scheduled: &Arc<AtomicBool>,
    active: &Arc<AtomicBool>,
) {
    loop {
        match receiver.try_recv() {
            Ok(job) => {
                tracing::trace!(server = %core.name, "dispatched job dequeued");
                run_job(core, job);
                if !core.running.load(Ordering::SeqCst) {
                    active.store(false, Ordering::SeqCst);
                    let discarded = receiver.try_iter().count();
                    if discarded > 0 {
                        tracing::warn!(
                            server = %core.name,
                            discarded,
                            "mailbox stopped mid-drain, discarding queued messages"
                        );
                    }
                    scheduled.store(false, Ordering::Release);
                    return;
                }
            }
            Err(_) => {
                scheduled.store(false, Ordering::Release);
                if receiver.is_empty()
                    || scheduled
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    return;
                }
            }
        }
    }
}

impl<H: Handler> MailboxBackend<H> for DispatchedMailbox<H> {
    fn submit_call(&self, msg: H::Message) -> CallReply<H::Reply> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let job = Job::User {
            msg,
            reply_tx: Some(reply_tx),
            sender: None,
            reply_required: true,
        };
        match self.send(job) {
            Ok(()) => {
                self.try_schedule();
                reply_rx.recv().unwrap_or(CallReply::Stopped)
            }
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
            Ok(()) => {
                self.try_schedule();
                CastAck::Ok
            }
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
            Ok(()) => {
                self.try_schedule();
                reply_rx.recv().unwrap_or(CallReply::Stopped)
            }
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
            Ok(()) => {
                self.try_schedule();
                CastAck::Ok
            }
            Err(TrySendError::Full(_)) => {
                self.warn_queue_full();
                CastAck::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => CastAck::Stopped,
        }
    }

    fn stop(&self) -> usize {
        self.active.store(false, Ordering::SeqCst);
        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ThreadPoolDispatcher;
    use crate::reply::HandlerOutcome;
    use std::time::{Duration, Instant};

    struct StopImmediately;
    impl Handler for StopImmediately {
        type Message = ();
        type State = ();
        type Reply = ();

        fn handle_cast(&self, _msg: (), _state: &()) -> HandlerOutcome<(), ()> {
            HandlerOutcome::Stop
        }
    }

    // A handler-initiated stop must deactivate the mailbox itself, not just
    // `core.running`: otherwise a later submission keeps scheduling drains
    // onto the shared dispatcher for a server that will never process
    // anything again.
    #[test]
    fn handler_initiated_stop_deactivates_the_mailbox() {
        let core = Arc::new(ServerCore {
            id: crate::id::ServerId::next(),
            name: "handler-stop-test".to_string(),
            handler: StopImmediately,
            state: std::sync::Mutex::new(()),
            running: AtomicBool::new(true),
            max_queue_size: None,
        });
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(ThreadPoolDispatcher::new(2));
        let mailbox = DispatchedMailbox::new(Arc::clone(&core), dispatcher);
        mailbox.submit_cast((), None);

        let deadline = Instant::now() + Duration::from_secs(2);
        while mailbox.active.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(
            !mailbox.active.load(Ordering::SeqCst),
            "mailbox never deactivated after a handler-initiated stop"
        );
        assert!(!core.running.load(Ordering::SeqCst));
    }
}
