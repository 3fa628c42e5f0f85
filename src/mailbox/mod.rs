//! The mailbox layer: queues one message at a time into a handler
//! invocation, in one of two backends (see [`threaded`] and [`dispatched`]).
//!
//! Both backends share the same wire format ([`Job`]) and the same
//! message-processing pipeline ([`run_job`]); they differ only in how they
//! get a worker thread to run that pipeline.

mod dispatched;
mod threaded;

pub(crate) use dispatched::DispatchedMailbox;
pub(crate) use threaded::ThreadedMailbox;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::handler::Handler;
use crate::panic_desc::describe_panic;
use crate::reply::{CallReply, CastAck, HandlerOutcome};
use crate::server::ServerCore;

thread_local! {
    /// The id of the server whose handler is currently executing on this
    /// thread, if any. Consulted by `Server::call` to detect and reject a
    /// handler calling back into its own server, which would otherwise
    /// deadlock a mailbox against itself.
    pub(crate) static CURRENT_EXECUTING: std::cell::Cell<Option<crate::id::ServerId>> =
        const { std::cell::Cell::new(None) };
}

/// Routes an async-call reply back to whichever ephemeral waiter is
/// listening for it. Implemented for `Server<SimpleHandler<CallReply<R>, (),
/// ()>>` in `simple_server`, so routing a reply is just casting it to the
/// waiter.
pub(crate) trait ReplyRoute<R>: Send + Sync {
    fn route(&self, reply: CallReply<R>);
}

/// One unit of work queued into a mailbox.
pub(crate) enum Job<H: Handler> {
    User {
        msg: H::Message,
        reply_tx: Option<Sender<CallReply<H::Reply>>>,
        sender: Option<Arc<dyn ReplyRoute<H::Reply>>>,
        reply_required: bool,
    },
    Stop {
        reply_tx: Option<Sender<CallReply<H::Reply>>>,
    },
}

/// Object-safe seam a [`crate::server::Server`] submits work through,
/// independent of which backend currently owns the mailbox.
pub(crate) trait MailboxBackend<H: Handler>: Send + Sync {
    fn submit_call(&self, msg: H::Message) -> CallReply<H::Reply>;
    fn submit_cast(
        &self,
        msg: H::Message,
        sender: Option<Arc<dyn ReplyRoute<H::Reply>>>,
    ) -> CastAck;
    fn submit_stop(&self) -> CallReply<H::Reply>;
    fn submit_stop_cast(&self) -> CastAck;
    /// Stops accepting new work and discards whatever is still queued but
    /// not yet started, returning how many items were discarded.
    fn stop(&self) -> usize;
}

/// Runs one job against `core`'s handler and state, implementing the
/// processing pipeline: reject if not running, invoke the matching handler
/// method inside a panic boundary, apply any resulting state change, and
/// route the outcome to whichever of `reply_tx`/`sender` is present.
pub(crate) fn run_job<H: Handler>(core: &Arc<ServerCore<H>>, job: Job<H>) {
    match job {
        Job::Stop { reply_tx } => {
            core.running.store(false, Ordering::SeqCst);
            tracing::debug!(server = %core.name, "server stopped");
            if let Some(tx) = reply_tx {
                let _ = tx.send(CallReply::Stopped);
            }
        }
        Job::User {
            msg,
            reply_tx,
            sender,
            reply_required,
        } => {
            let reply = run_user(core, msg, reply_required);
            if let Some(tx) = reply_tx {
                let _ = tx.send(reply);
            } else if let Some(sender) = sender {
                if !matches!(reply, CallReply::Stopped) {
                    sender.route(reply);
                }
            }
        }
    }
}

fn run_user<H: Handler>(
    core: &Arc<ServerCore<H>>,
    msg: H::Message,
    reply_required: bool,
) -> CallReply<H::Reply> {
    if !core.running.load(Ordering::SeqCst) {
        return CallReply::Stopped;
    }

    CURRENT_EXECUTING.with(|cell| cell.set(Some(core.id)));
    let outcome = {
        // Held for the whole invocation: single-consumer discipline means
        // there is never contention, and holding it is what lets a panic
        // leave the prior state exactly as it was.
        let guard = core.state.lock().unwrap_or_else(|poison| poison.into_inner());
        catch_unwind(AssertUnwindSafe(|| {
            if reply_required {
                core.handler.handle_call(msg, &guard)
            } else {
                core.handler.handle_cast(msg, &guard)
            }
        }))
    };
    CURRENT_EXECUTING.with(|cell| cell.set(None));

    match outcome {
        Ok(HandlerOutcome::NoReply) => CallReply::Unhandled,
        Ok(HandlerOutcome::Reply(reply, new_state)) => {
            let mut guard = core.state.lock().unwrap_or_else(|poison| poison.into_inner());
            *guard = new_state;
            CallReply::Reply(reply)
        }
        Ok(HandlerOutcome::Stop) => {
            core.running.store(false, Ordering::SeqCst);
            tracing::debug!(server = %core.name, "server stopped by handler");
            CallReply::Stopped
        }
        Err(payload) => {
            let description = describe_panic(&payload);
            tracing::error!(server = %core.name, panic = %description, "handler panicked");
            let truncated = truncate_description(&description);
            tracing::warn!(server = %core.name, error = %truncated, "handler error");
            CallReply::HandlerError(description)
        }
    }
}

const MAX_LOGGED_DESCRIPTION_LEN: usize = 200;

fn truncate_description(description: &str) -> std::borrow::Cow<'_, str> {
    if description.chars().count() <= MAX_LOGGED_DESCRIPTION_LEN {
        std::borrow::Cow::Borrowed(description)
    } else {
        let truncated: String = description.chars().take(MAX_LOGGED_DESCRIPTION_LEN).collect();
        std::borrow::Cow::Owned(format!("{truncated}…"))
    }
}

pub(crate) fn make_channel<T>(
    capacity: Option<usize>,
) -> (crossbeam_channel::Sender<T>, crossbeam_channel::Receiver<T>) {
    match capacity {
        Some(n) if n > 0 => crossbeam_channel::bounded(n),
        _ => crossbeam_channel::unbounded(),
    }
}
