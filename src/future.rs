//! A one-shot result cell shared between the thread that eventually produces
//! a value and whichever thread(s) want to observe it.
//!
//! This is the `Future`/`Promise` pair from the data model: [`Promise`] is
//! both halves at once. `Server::async_call` hands one back to its caller
//! and keeps a clone of the completer alive inside the ephemeral waiter it
//! spawns; completion is idempotent, and a callback registered after the
//! value already landed fires immediately from the registering thread.

use std::sync::{Arc, Mutex};

type Callback<T> = Box<dyn FnOnce(T) + Send>;

/// The function a [`Promise`]'s constructor hands to its `computation`
/// closure. Calling it completes the promise; later calls are ignored.
pub type CompleteFn<T> = Box<dyn FnOnce(T) + Send>;

struct Inner<T> {
    value: Option<T>,
    callback: Option<Callback<T>>,
    fulfilled: bool,
}

/// A one-shot, cross-thread result cell.
///
/// Only one consumer should use a given `Promise`: register a single
/// [`Promise::on_complete`] callback, or call [`Promise::wait`] once. Mixing
/// both on the same instance means whichever registers last wins.
pub struct Promise<T: Send + 'static>(Arc<Mutex<Inner<T>>>);

impl<T: Send + 'static> Promise<T> {
    /// Constructs a new promise and immediately runs `computation`, handing
    /// it the function that will eventually complete this promise.
    /// `computation` itself does not need to complete the promise
    /// synchronously — it is free to hand the completer off to another
    /// thread and return right away.
    pub fn new(computation: impl FnOnce(CompleteFn<T>)) -> Self {
        let promise = Self(Arc::new(Mutex::new(Inner {
            value: None,
            callback: None,
            fulfilled: false,
        })));
        let completer_promise = promise.clone();
        let completer: CompleteFn<T> = Box::new(move |value| completer_promise.complete(value));
        computation(completer);
        promise
    }

    fn complete(&self, value: T) {
        let mut inner = self.0.lock().unwrap();
        if inner.fulfilled {
            return;
        }
        inner.fulfilled = true;
        if let Some(cb) = inner.callback.take() {
            drop(inner);
            cb(value);
        } else {
            inner.value = Some(value);
        }
    }

    /// Registers a callback to run once this promise completes. If it has
    /// already completed, the callback runs immediately on the calling
    /// thread.
    pub fn on_complete(&self, callback: impl FnOnce(T) + Send + 'static) {
        let mut inner = self.0.lock().unwrap();
        if let Some(value) = inner.value.take() {
            drop(inner);
            callback(value);
        } else {
            inner.callback = Some(Box::new(callback));
        }
    }

    /// Blocks the calling thread until this promise completes, then returns
    /// the value.
    pub fn wait(&self) -> T {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.on_complete(move |value| {
            let _ = tx.send(value);
        });
        rx.recv()
            .expect("promise dropped without being completed")
    }
}

impl<T: Send + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Send + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.lock().unwrap();
        f.debug_struct("Promise").field("fulfilled", &inner.fulfilled).finish()
    }
}
