//! The `Handler` trait: the single seam a user implements to describe a
//! server's behavior. Everything else in the crate (mailboxes, dispatch,
//! the call/cast surface) is generic over it.

use crate::reply::HandlerOutcome;

/// Describes how a server reacts to messages.
///
/// Modeled directly on an actor's message/state pair: a handler owns no
/// mutable fields of its own (it is shared behind an `Arc` across whatever
/// thread ends up running a given message), and instead receives a
/// reference to the current state on every invocation. State changes only
/// take effect when a handler returns [`HandlerOutcome::Reply`].
///
/// Both methods default to `NoReply`, so a handler only needs to implement
/// the half of the protocol (call or cast) it actually uses.
pub trait Handler: Send + Sync + 'static {
    /// The message type this handler accepts.
    type Message: Send + 'static;
    /// The state threaded through successive invocations.
    type State: Send + 'static;
    /// The value a `call` reply carries.
    type Reply: Send + 'static;

    /// Handles a message sent via `call`, i.e. one whose sender is blocked
    /// waiting on a reply.
    fn handle_call(
        &self,
        msg: Self::Message,
        state: &Self::State,
    ) -> HandlerOutcome<Self::Reply, Self::State> {
        let _ = msg;
        let _ = state;
        HandlerOutcome::NoReply
    }

    /// Handles a message sent via `cast`, i.e. fire-and-forget.
    fn handle_cast(
        &self,
        msg: Self::Message,
        state: &Self::State,
    ) -> HandlerOutcome<Self::Reply, Self::State> {
        let _ = msg;
        let _ = state;
        HandlerOutcome::NoReply
    }
}
