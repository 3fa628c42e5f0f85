//! The outcome values that flow back out of a server: what a handler hands
//! back internally ([`HandlerOutcome`]), and what a caller of `call`/`cast`
//! observes externally ([`CallReply`]/[`CastAck`]).
//!
//! None of these are ever propagated with `?` inside the crate itself — a
//! stopped server, an unhandled message, or a queue-full mailbox are all
//! ordinary values a caller inspects, mirroring the taxonomy a supervising
//! process would see from the outside. [`CallReply::into_result`] is
//! provided purely as a convenience bridge for callers who would rather
//! work with `Result`.

use thiserror::Error;

/// What a [`crate::handler::Handler`] hands back to the mailbox after
/// processing one message.
///
/// `NoReply` and `Stop` intentionally do not carry a new state value: state
/// is mutated in place only when the handler actually produces one via
/// `Reply`, which keeps a panicking or unhandled invocation from losing the
/// previous state.
#[derive(Debug)]
pub enum HandlerOutcome<R, S> {
    /// Continue running with the state unchanged; nothing is sent back to a
    /// caller that used `call` (they observe [`CallReply::Unhandled`]).
    NoReply,
    /// Continue running with a new state, and hand `R` back to a `call`
    /// caller.
    Reply(R, S),
    /// Stop the server. The state at the moment of stopping is whatever was
    /// already in place; a `call` caller observes [`CallReply::Stopped`].
    Stop,
}

/// What a caller observes from [`crate::server::Server::call`] and
/// [`crate::server::Server::async_call`].
#[derive(Debug)]
pub enum CallReply<R> {
    /// The handler produced a reply.
    Reply(R),
    /// No handler clause matched the message; the server is still running.
    Unhandled,
    /// The server was not running when the message was processed, or
    /// stopped as a direct consequence of processing it.
    Stopped,
    /// The handler raised (including via a caught panic) while processing
    /// the message. The server keeps running with its prior state.
    HandlerError(String),
    /// The mailbox was bounded and already full; the message was never
    /// enqueued.
    QueueFull,
}

// Manual impls: deriving `Clone`/`PartialEq` would add an implicit `R:
// Clone`/`R: PartialEq` bound on every instantiation, even ones that never
// need it.
impl<R: Clone> Clone for CallReply<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Reply(r) => Self::Reply(r.clone()),
            Self::Unhandled => Self::Unhandled,
            Self::Stopped => Self::Stopped,
            Self::HandlerError(d) => Self::HandlerError(d.clone()),
            Self::QueueFull => Self::QueueFull,
        }
    }
}

/// What a caller observes from [`crate::server::Server::cast`].
///
/// A cast never reports `HandlerError`: per the pipeline, handler errors on
/// the cast path are logged and swallowed, since there is no sender waiting
/// on a reply to hand the description to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastAck {
    /// The message was enqueued. This does not mean it has been processed.
    Ok,
    /// The server was not running; the message was discarded.
    Stopped,
    /// The mailbox was bounded and already full.
    QueueFull,
}

/// `Result`-flavored view of a [`CallReply`], for callers who'd rather use
/// `?` than match on the reply taxonomy directly.
#[derive(Debug, Clone, Error)]
pub enum CallOutcomeError {
    #[error("server is not running")]
    Stopped,
    #[error("no handler matched the message")]
    Unhandled,
    #[error("handler error: {0}")]
    Handler(String),
    #[error("mailbox queue is full")]
    QueueFull,
}

impl<R> CallReply<R> {
    /// Converts this reply into a `Result`, folding every non-`Reply`
    /// variant into [`CallOutcomeError`].
    pub fn into_result(self) -> Result<R, CallOutcomeError> {
        match self {
            Self::Reply(r) => Ok(r),
            Self::Unhandled => Err(CallOutcomeError::Unhandled),
            Self::Stopped => Err(CallOutcomeError::Stopped),
            Self::HandlerError(d) => Err(CallOutcomeError::Handler(d)),
            Self::QueueFull => Err(CallOutcomeError::QueueFull),
        }
    }

    /// `true` if the handler produced a reply.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Reply(_))
    }
}
