//! `SimpleServer`: a [`Handler`] built entirely from closures, for the
//! common case where a dedicated type and impl block would be pure
//! ceremony. Also where `Server::async_call` gets its `AsyncCallWaiter`
//! from: an ephemeral `SimpleServer` whose only job is to receive one reply
//! and complete a [`Promise`].

use std::sync::{Arc, Mutex};

use crate::future::Promise;
use crate::handler::Handler;
use crate::mailbox::ReplyRoute;
use crate::reply::{CallReply, HandlerOutcome};
use crate::server::{Server, ServerConfig};

type ClauseFn<M, S, R> = Box<dyn Fn(M, &S) -> HandlerOutcome<R, S> + Send + Sync>;
type AfterInitFn<M, S, R> = Box<dyn FnOnce(&Server<SimpleHandler<M, S, R>>, &S) + Send>;

/// A [`Handler`] assembled from boxed closures rather than a named type.
pub struct SimpleHandler<M, S, R>
where
    M: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    call_fn: Option<ClauseFn<M, S, R>>,
    cast_fn: Option<ClauseFn<M, S, R>>,
}

impl<M, S, R> Handler for SimpleHandler<M, S, R>
where
    M: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    type Message = M;
    type State = S;
    type Reply = R;

    fn handle_call(&self, msg: M, state: &S) -> HandlerOutcome<R, S> {
        match &self.call_fn {
            Some(f) => f(msg, state),
            None => HandlerOutcome::NoReply,
        }
    }

    fn handle_cast(&self, msg: M, state: &S) -> HandlerOutcome<R, S> {
        match &self.cast_fn {
            Some(f) => f(msg, state),
            None => HandlerOutcome::NoReply,
        }
    }
}

/// Construction parameters for [`simple_server`].
pub struct SimpleServerConfig<M, S, R>
where
    M: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    name: Option<String>,
    state: S,
    max_queue_size: Option<usize>,
    call_fn: Option<ClauseFn<M, S, R>>,
    cast_fn: Option<ClauseFn<M, S, R>>,
    after_init_fn: Option<AfterInitFn<M, S, R>>,
}

impl<M, S, R> SimpleServerConfig<M, S, R>
where
    M: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    pub fn new(state: S) -> Self {
        Self {
            name: None,
            state,
            max_queue_size: None,
            call_fn: None,
            cast_fn: None,
            after_init_fn: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn max_queue_size(mut self, capacity: usize) -> Self {
        self.max_queue_size = Some(capacity);
        self
    }

    pub fn on_call(mut self, f: impl Fn(M, &S) -> HandlerOutcome<R, S> + Send + Sync + 'static) -> Self {
        self.call_fn = Some(Box::new(f));
        self
    }

    pub fn on_cast(mut self, f: impl Fn(M, &S) -> HandlerOutcome<R, S> + Send + Sync + 'static) -> Self {
        self.cast_fn = Some(Box::new(f));
        self
    }

    /// Registers a hook run exactly once, synchronously, right after the
    /// server is constructed and before [`simple_server`] returns it.
    pub fn after_init(
        mut self,
        f: impl FnOnce(&Server<SimpleHandler<M, S, R>>, &S) + Send + 'static,
    ) -> Self {
        self.after_init_fn = Some(Box::new(f));
        self
    }
}

/// Builds and starts a server from closures instead of a named [`Handler`]
/// type.
pub fn simple_server<M, S, R>(config: SimpleServerConfig<M, S, R>) -> Server<SimpleHandler<M, S, R>>
where
    M: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    let SimpleServerConfig {
        name,
        state,
        max_queue_size,
        call_fn,
        cast_fn,
        after_init_fn,
    } = config;

    let handler = SimpleHandler { call_fn, cast_fn };
    let mut server_config = ServerConfig::new(handler, state);
    if let Some(name) = name {
        server_config = server_config.name(name);
    }
    if let Some(capacity) = max_queue_size {
        server_config = server_config.max_queue_size(capacity);
    }

    let server = Server::new(server_config);

    if let Some(hook) = after_init_fn {
        server.with_state_snapshot(|state| hook(&server, state));
    }

    server
}

impl<R> ReplyRoute<R> for Server<SimpleHandler<CallReply<R>, (), ()>>
where
    R: Send + 'static,
{
    fn route(&self, reply: CallReply<R>) {
        let _ = self.cast(reply);
    }
}

impl<H: Handler> Server<H> {
    /// Sends `msg` without blocking, returning a [`Promise`] that completes
    /// with the same [`CallReply`] a synchronous [`Server::call`] would
    /// have yielded.
    ///
    /// Internally this spawns an ephemeral `SimpleServer` (the
    /// `AsyncCallWaiter`) whose only message type is `CallReply<H::Reply>`,
    /// attaches it to this server's system (if any — it is built before
    /// the target is told about it, so there is no window where a fast
    /// reply could race a not-yet-attached waiter), and casts `msg` to this
    /// server with that waiter as the reply sender.
    pub fn async_call(&self, msg: H::Message) -> Promise<CallReply<H::Reply>> {
        let target = self.clone();
        Promise::new(move |complete| {
            let complete_cell = Mutex::new(Some(complete));
            let waiter_name = format!("{}-async-waiter", target.name());
            let waiter_config = SimpleServerConfig::new(()).name(waiter_name).on_cast(
                move |reply, _state| {
                    if let Some(complete) = complete_cell.lock().unwrap().take() {
                        complete(reply);
                    }
                    HandlerOutcome::Stop
                },
            );
            let waiter = simple_server(waiter_config);
            if let Some(system) = target.system() {
                waiter.attach_system(system);
            }
            let sender: Arc<dyn ReplyRoute<H::Reply>> = Arc::new(waiter);
            target.cast_with_sender(msg, sender);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    // === 1. simple_server dispatches call/cast through the configured closures ===
    #[test]
    fn simple_server_dispatches_closures() {
        let server = simple_server(
            SimpleServerConfig::new(0_i64)
                .on_call(|msg: i64, state: &i64| HandlerOutcome::Reply(*state, *state + msg))
                .on_cast(|msg: i64, state: &i64| HandlerOutcome::Reply(0, *state + msg)),
        );
        server.cast(5);
        server.cast(5);
        assert_eq!(server.call(0).into_result().unwrap(), 10);
        server.stop();
    }

    // === 2. after_init runs exactly once, synchronously, before construction returns ===
    #[test]
    fn after_init_runs_before_constructor_returns() {
        let ran = Arc::new(AtomicI64::new(0));
        let ran_in_hook = Arc::clone(&ran);
        let server = simple_server(
            SimpleServerConfig::new(41_i64).after_init(move |_server, state| {
                ran_in_hook.store(*state, Ordering::SeqCst);
            }),
        );
        assert_eq!(ran.load(Ordering::SeqCst), 41);
        server.stop();
    }

    struct Doubler;
    impl Handler for Doubler {
        type Message = i64;
        type State = i64;
        type Reply = i64;

        fn handle_call(&self, msg: i64, _state: &i64) -> HandlerOutcome<i64, i64> {
            HandlerOutcome::Reply(msg * 2, msg * 2)
        }
    }

    // === 3. async-call equivalence: on_complete eventually sees what call would have ===
    #[test]
    fn async_call_completes_with_the_same_reply_as_call() {
        let server = Server::new(ServerConfig::new(Doubler, 0));
        let promise = server.async_call(21);
        let result = promise.wait();
        assert_eq!(result.into_result().unwrap(), 42);
        server.stop();
    }

    // === 4. async-call's waiter is ephemeral: it stops itself after one reply ===
    #[test]
    fn async_call_waiter_stops_after_replying() {
        let server = Server::new(ServerConfig::new(Doubler, 0));
        let (tx, rx) = crossbeam_channel::bounded(1);
        server.async_call(10).on_complete(move |reply| {
            let _ = tx.send(reply);
        });
        let reply = rx.recv().unwrap();
        assert_eq!(reply.into_result().unwrap(), 20);
        server.stop();
    }
}
