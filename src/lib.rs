#![doc = include_str!("../README.md")]
#![warn(missing_docs, missing_debug_implementations)]

//! A GenServer-style runtime: named, stateful servers that process one
//! message at a time from a single mailbox, addressed through `call`
//! (blocking request/reply), `cast` (fire-and-forget), and `async_call`
//! (non-blocking request whose reply arrives through a [`Promise`]).
//!
//! A server's mailbox runs on a dedicated thread by default, or, once
//! attached to a [`System`], on a shared [`ThreadPoolDispatcher`]. Either
//! way, a given server's messages are always processed strictly one at a
//! time, in submission order.
//!
//! ```
//! use gen_server::{Handler, HandlerOutcome, Server, ServerConfig};
//!
//! struct Counter;
//!
//! enum Msg {
//!     Increment,
//!     Get,
//! }
//!
//! impl Handler for Counter {
//!     type Message = Msg;
//!     type State = i64;
//!     type Reply = i64;
//!
//!     fn handle_call(&self, msg: Msg, state: &i64) -> HandlerOutcome<i64, i64> {
//!         match msg {
//!             Msg::Increment => HandlerOutcome::Reply(*state + 1, *state + 1),
//!             Msg::Get => HandlerOutcome::Reply(*state, *state),
//!         }
//!     }
//! }
//!
//! let server = Server::new(ServerConfig::new(Counter, 0));
//! server.call(Msg::Increment);
//! assert_eq!(server.call(Msg::Get).into_result().unwrap(), 1);
//! server.stop();
//! ```

mod dispatcher;
mod future;
mod handler;
mod id;
mod mailbox;
mod panic_desc;
mod reply;
mod server;
mod simple_server;
mod system;

pub use dispatcher::{DispatchTask, Dispatcher, ThreadPoolDispatcher};
pub use future::{CompleteFn, Promise};
pub use handler::Handler;
pub use id::ServerId;
pub use reply::{CallOutcomeError, CallReply, CastAck, HandlerOutcome};
pub use server::{Server, ServerConfig};
pub use simple_server::{simple_server, SimpleHandler, SimpleServerConfig};
pub use system::System;
