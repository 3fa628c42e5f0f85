//! The `Server` handle: a cheaply cloned reference to a named, running
//! handler instance, plus the configuration used to construct one.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use crate::handler::Handler;
use crate::id::ServerId;
use crate::mailbox::{self, DispatchedMailbox, MailboxBackend, ThreadedMailbox, CURRENT_EXECUTING};
use crate::reply::{CallReply, CastAck};
use crate::system::System;

/// The handler, its state, and its running flag — everything about a
/// server that survives a mailbox backend being torn down and rebuilt by
/// [`Server::attach_system`]/[`Server::detach_system`].
pub(crate) struct ServerCore<H: Handler> {
    pub(crate) id: ServerId,
    pub(crate) name: String,
    pub(crate) handler: H,
    pub(crate) state: Mutex<H::State>,
    pub(crate) running: AtomicBool,
    pub(crate) max_queue_size: Option<usize>,
}

/// Construction parameters for a [`Server`].
pub struct ServerConfig<H: Handler> {
    name: Option<String>,
    state: H::State,
    handler: H,
    max_queue_size: Option<usize>,
    system: Option<System>,
}

impl<H: Handler> ServerConfig<H> {
    /// Starts building a config with the given handler and initial state.
    /// The server gets a generated name, an unbounded mailbox, and a
    /// dedicated worker thread unless overridden below.
    pub fn new(handler: H, state: H::State) -> Self {
        Self {
            name: None,
            state,
            handler,
            max_queue_size: None,
            system: None,
        }
    }

    /// Gives the server an explicit name, used in logs and thread names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bounds the mailbox to `capacity` pending messages. Once full,
    /// `call`/`cast` return [`CallReply::QueueFull`]/[`CastAck::QueueFull`]
    /// instead of blocking or silently dropping. Capacities under 10 are
    /// accepted but logged as a warning: they tend to convert ordinary
    /// bursts of traffic into queue-full errors.
    pub fn max_queue_size(mut self, capacity: usize) -> Self {
        self.max_queue_size = Some(capacity);
        self
    }

    /// Attaches the server to a [`System`] at construction time, so it
    /// starts out on a pooled mailbox rather than a dedicated thread.
    pub fn system(mut self, system: System) -> Self {
        self.system = Some(system);
        self
    }
}

/// A handle to a running, named handler instance.
///
/// Cloning a `Server` is cheap and gives another handle to the exact same
/// underlying mailbox and state; it does not spawn a new server.
pub struct Server<H: Handler> {
    core: Arc<ServerCore<H>>,
    mailbox: Arc<RwLock<Arc<dyn MailboxBackend<H>>>>,
    system: Arc<Mutex<Option<System>>>,
}

impl<H: Handler> Server<H> {
    /// Constructs and starts a new server from `config`.
    pub fn new(config: ServerConfig<H>) -> Self {
        let id = ServerId::next();
        let name = config.name.unwrap_or_else(|| crate::id::default_name(id));

        if let Some(capacity) = config.max_queue_size {
            if capacity > 0 && capacity < 10 {
                tracing::warn!(
                    server = %name,
                    max_queue_size = capacity,
                    "bounded mailboxes under 10 are prone to spurious queue-full errors"
                );
            }
        }

        let core = Arc::new(ServerCore {
            id,
            name: name.clone(),
            handler: config.handler,
            state: Mutex::new(config.state),
            running: AtomicBool::new(true),
            max_queue_size: config.max_queue_size,
        });

        let mailbox: Arc<dyn MailboxBackend<H>> = match &config.system {
            Some(system) => Arc::new(DispatchedMailbox::new(Arc::clone(&core), system.dispatcher())),
            None => Arc::new(ThreadedMailbox::new(Arc::clone(&core))),
        };

        tracing::debug!(server = %name, "server started");

        Self {
            core,
            mailbox: Arc::new(RwLock::new(mailbox)),
            system: Arc::new(Mutex::new(config.system)),
        }
    }

    /// The server's name, explicit or generated.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// `false` once the server has processed a stop (via `stop`, `stop_cast`,
    /// or a handler returning `HandlerOutcome::Stop`).
    pub fn is_running(&self) -> bool {
        self.core.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The system this server is currently attached to, if any.
    pub fn system(&self) -> Option<System> {
        self.system.lock().unwrap().clone()
    }

    fn current_backend(&self) -> Arc<dyn MailboxBackend<H>> {
        Arc::clone(&self.mailbox.read().unwrap())
    }

    /// Runs `f` against a snapshot of the current state, taken under the
    /// same lock the mailbox pipeline uses. Used by `simple_server`'s
    /// `after_init` hook, which fires before any message has been
    /// processed so this just observes the initial state.
    pub(crate) fn with_state_snapshot<T>(&self, f: impl FnOnce(&H::State) -> T) -> T {
        let guard = self
            .core
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        f(&guard)
    }

    /// Sends `msg` and blocks until the handler replies.
    ///
    /// If called from inside this same server's own handler (directly, or
    /// through some chain of casts/calls that loops back), returns
    /// [`CallReply::HandlerError`] describing the reentrant call instead of
    /// deadlocking the mailbox against itself.
    pub fn call(&self, msg: H::Message) -> CallReply<H::Reply> {
        if CURRENT_EXECUTING.with(|cell| cell.get()) == Some(self.core.id) {
            tracing::warn!(server = %self.core.name, "rejected a reentrant call");
            return CallReply::HandlerError("reentrant call".to_string());
        }
        self.current_backend().submit_call(msg)
    }

    /// Sends `msg` without waiting for a reply.
    pub fn cast(&self, msg: H::Message) -> CastAck {
        self.current_backend().submit_cast(msg, None)
    }

    pub(crate) fn cast_with_sender(
        &self,
        msg: H::Message,
        sender: Arc<dyn mailbox::ReplyRoute<H::Reply>>,
    ) -> CastAck {
        self.current_backend().submit_cast(msg, Some(sender))
    }

    /// Stops the server and blocks until the stop has been processed.
    /// Idempotent: calling it again (or after a handler already stopped the
    /// server) still returns [`CallReply::Stopped`].
    pub fn stop(&self) -> CallReply<H::Reply> {
        self.current_backend().submit_stop()
    }

    /// Stops the server without waiting for confirmation.
    pub fn stop_cast(&self) -> CastAck {
        self.current_backend().submit_stop_cast()
    }

    /// Attaches this server to `system`, moving it onto a pooled mailbox.
    /// Any message still queued but not yet started is discarded; whatever
    /// is currently executing runs to completion first. A no-op if the
    /// server is already attached to this exact system.
    pub fn attach_system(&self, system: System) {
        let mut system_guard = self.system.lock().unwrap();
        if let Some(existing) = system_guard.as_ref() {
            if existing.is_same_as(&system) {
                return;
            }
        }
        let mut mailbox_guard = self.mailbox.write().unwrap();
        let discarded = mailbox_guard.stop();
        if discarded > 0 {
            tracing::warn!(
                server = %self.core.name,
                discarded,
                "attach_system discarded queued messages"
            );
        }
        *mailbox_guard = Arc::new(DispatchedMailbox::new(
            Arc::clone(&self.core),
            system.dispatcher(),
        ));
        *system_guard = Some(system);
        tracing::debug!(server = %self.core.name, "attached to system");
    }

    /// Detaches this server from whatever system it is on, moving it back
    /// onto a dedicated-thread mailbox. A no-op if it has no system.
    pub fn detach_system(&self) {
        let mut system_guard = self.system.lock().unwrap();
        if system_guard.is_none() {
            return;
        }
        let mut mailbox_guard = self.mailbox.write().unwrap();
        let discarded = mailbox_guard.stop();
        if discarded > 0 {
            tracing::warn!(
                server = %self.core.name,
                discarded,
                "detach_system discarded queued messages"
            );
        }
        *mailbox_guard = Arc::new(ThreadedMailbox::new(Arc::clone(&self.core)));
        *system_guard = None;
        tracing::debug!(server = %self.core.name, "detached from system");
    }
}

impl<H: Handler> Clone for Server<H> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            mailbox: Arc::clone(&self.mailbox),
            system: Arc::clone(&self.system),
        }
    }
}

impl<H: Handler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.core.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::HandlerOutcome;
    use crate::system::System;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum CounterMsg {
        Inc,
        Get,
    }

    struct Counter;

    impl Handler for Counter {
        type Message = CounterMsg;
        type State = i64;
        type Reply = i64;

        fn handle_call(&self, msg: CounterMsg, state: &i64) -> HandlerOutcome<i64, i64> {
            match msg {
                CounterMsg::Get => HandlerOutcome::Reply(*state, *state),
                CounterMsg::Inc => HandlerOutcome::Reply(*state + 1, *state + 1),
            }
        }

        fn handle_cast(&self, msg: CounterMsg, state: &i64) -> HandlerOutcome<i64, i64> {
            match msg {
                CounterMsg::Inc => HandlerOutcome::Reply(0, *state + 1),
                CounterMsg::Get => HandlerOutcome::NoReply,
            }
        }
    }

    // === 1. counter server: cast,cast,cast,call(get) => 3 ===
    #[test]
    fn counter_server_end_to_end() {
        let server = Server::new(ServerConfig::new(Counter, 0));
        server.cast(CounterMsg::Inc);
        server.cast(CounterMsg::Inc);
        server.cast(CounterMsg::Inc);
        let reply = server.call(CounterMsg::Get);
        assert_eq!(reply.into_result().unwrap(), 3);
        server.stop();
    }

    struct NoCastHandler;
    impl Handler for NoCastHandler {
        type Message = ();
        type State = ();
        type Reply = ();
    }

    // === 2. unhandled: no call_fn configured => Unhandled ===
    #[test]
    fn unhandled_call_returns_unhandled() {
        let server = Server::new(ServerConfig::new(NoCastHandler, ()));
        assert!(matches!(server.call(()), CallReply::Unhandled));
        server.stop();
    }

    struct PanicOnBoom;
    impl Handler for PanicOnBoom {
        type Message = &'static str;
        type State = i32;
        type Reply = i32;

        fn handle_call(&self, msg: &'static str, state: &i32) -> HandlerOutcome<i32, i32> {
            if msg == "boom" {
                panic!("boom");
            }
            HandlerOutcome::Reply(*state, *state)
        }
    }

    // === 3. error isolation: a panicking call leaves state untouched ===
    #[test]
    fn handler_panic_is_isolated() {
        let server = Server::new(ServerConfig::new(PanicOnBoom, 7));
        let reply = server.call("boom");
        assert!(matches!(reply, CallReply::HandlerError(_)));
        assert!(server.is_running());
        assert_eq!(server.call("get").into_result().unwrap(), 7);
        server.stop();
    }

    // === 4. stop via call: running flips false, subsequent cast is Stopped ===
    #[test]
    fn stop_via_call_then_subsequent_ops_are_stopped() {
        let server = Server::new(ServerConfig::new(Counter, 0));
        let reply = server.stop();
        assert!(matches!(reply, CallReply::Stopped));
        assert!(!server.is_running());
        assert!(matches!(server.cast(CounterMsg::Inc), CastAck::Stopped));
        // idempotent: stopping again still answers Stopped
        assert!(matches!(server.stop(), CallReply::Stopped));
    }

    // === 5. FIFO: casts are observed strictly in submission order ===
    #[test]
    fn casts_are_processed_fifo() {
        struct Appender;
        impl Handler for Appender {
            type Message = i32;
            type State = Vec<i32>;
            type Reply = Vec<i32>;

            fn handle_cast(&self, msg: i32, state: &Vec<i32>) -> HandlerOutcome<Vec<i32>, Vec<i32>> {
                let mut next = state.clone();
                next.push(msg);
                HandlerOutcome::Reply(Vec::new(), next)
            }

            fn handle_call(&self, _msg: i32, state: &Vec<i32>) -> HandlerOutcome<Vec<i32>, Vec<i32>> {
                HandlerOutcome::Reply(state.clone(), state.clone())
            }
        }

        let server = Server::new(ServerConfig::new(Appender, Vec::new()));
        for i in 0..20 {
            server.cast(i);
        }
        let observed = server.call(0).into_result().unwrap();
        assert_eq!(observed, (0..20).collect::<Vec<_>>());
        server.stop();
    }

    // === 6. dispatcher sharing: two servers on one system, no cross-talk ===
    #[test]
    fn dispatcher_sharing_keeps_servers_isolated() {
        let system = System::with_default_dispatcher();
        let a = Server::new(
            ServerConfig::new(Counter, 0)
                .name("a")
                .system(system.clone()),
        );
        let b = Server::new(
            ServerConfig::new(Counter, 0)
                .name("b")
                .system(system.clone()),
        );

        for _ in 0..50 {
            a.cast(CounterMsg::Inc);
            b.cast(CounterMsg::Inc);
        }

        assert_eq!(a.call(CounterMsg::Get).into_result().unwrap(), 50);
        assert_eq!(b.call(CounterMsg::Get).into_result().unwrap(), 50);
        a.stop();
        b.stop();
    }

    // === 7. bounded queue: once full, further casts yield QueueFull ===
    #[test]
    fn bounded_mailbox_reports_queue_full() {
        enum BlockMsg {
            Block,
            Normal,
        }

        struct Blocker(Arc<std::sync::Barrier>);
        impl Handler for Blocker {
            type Message = BlockMsg;
            type State = ();
            type Reply = ();

            fn handle_cast(&self, msg: BlockMsg, _state: &()) -> HandlerOutcome<(), ()> {
                if matches!(msg, BlockMsg::Block) {
                    // Holds the mailbox's one worker thread hostage until
                    // the test has finished probing queue-full, so none of
                    // the probe messages can be dequeued out from under it.
                    self.0.wait();
                    self.0.wait();
                }
                HandlerOutcome::NoReply
            }
        }

        let release = Arc::new(std::sync::Barrier::new(2));
        let server = Server::new(
            ServerConfig::new(Blocker(Arc::clone(&release)), ()).max_queue_size(10),
        );
        server.cast(BlockMsg::Block);
        release.wait(); // wait until the handler is actually inside its hold

        let mut saw_queue_full = false;
        for _ in 0..15 {
            if matches!(server.cast(BlockMsg::Normal), CastAck::QueueFull) {
                saw_queue_full = true;
            }
        }
        assert!(saw_queue_full);

        release.wait(); // release the handler so the server can drain and stop
        server.stop();
    }

    // === 8. reentrant call from inside a handler is rejected, not deadlocked ===
    #[test]
    fn reentrant_call_is_rejected() {
        struct Reentrant(Mutex<Option<Server<Reentrant>>>);
        impl Handler for Reentrant {
            type Message = ();
            type State = ();
            type Reply = String;

            fn handle_call(&self, _msg: (), _state: &()) -> HandlerOutcome<String, ()> {
                let server = self.0.lock().unwrap().clone().unwrap();
                let reply = server.call(());
                match reply {
                    CallReply::HandlerError(desc) => HandlerOutcome::Reply(desc, ()),
                    _ => HandlerOutcome::Reply("not rejected".to_string(), ()),
                }
            }
        }

        let handler = Reentrant(Mutex::new(None));
        let server = Server::new(ServerConfig::new(handler, ()));
        *server.core.handler.0.lock().unwrap() = Some(server.clone());

        let reply = server.call(()).into_result().unwrap();
        assert!(reply.contains("reentrant"));
        server.stop();
    }

    // === 9. server handles run sequentially under concurrent senders ===
    #[test]
    fn handler_invocations_do_not_interleave() {
        struct Tracker {
            in_flight: AtomicUsize,
            max_observed: AtomicUsize,
        }
        impl Handler for Tracker {
            type Message = ();
            type State = ();
            type Reply = ();

            fn handle_cast(&self, _msg: (), _state: &()) -> HandlerOutcome<(), ()> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_observed.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_micros(200));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                HandlerOutcome::NoReply
            }
        }

        let handler = Tracker {
            in_flight: AtomicUsize::new(0),
            max_observed: AtomicUsize::new(0),
        };
        let server = Server::new(ServerConfig::new(handler, ()));
        let mut senders = Vec::new();
        for _ in 0..8 {
            let server = server.clone();
            senders.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    server.cast(());
                }
            }));
        }
        for sender in senders {
            sender.join().unwrap();
        }
        assert_eq!(server.core.handler.max_observed.load(Ordering::SeqCst), 1);
        server.stop();
    }
}
