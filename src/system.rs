//! The `System` collaborator: a handle to a shared [`Dispatcher`] that a
//! server can opt into, switching its mailbox from a dedicated thread to a
//! pooled one.

use std::sync::Arc;

use crate::dispatcher::{Dispatcher, ThreadPoolDispatcher};

/// A shared execution context. Attaching a server to a `System` (see
/// [`crate::server::Server::attach_system`]) rebuilds that server's mailbox
/// as a [`crate::mailbox::DispatchedMailbox`] running on this system's
/// dispatcher, instead of the default dedicated-thread mailbox.
///
/// Cloning a `System` is cheap: it is just a handle to the same underlying
/// dispatcher.
#[derive(Clone)]
pub struct System {
    dispatcher: Arc<dyn Dispatcher>,
}

impl System {
    /// Wraps an existing dispatcher in a system handle.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Builds a system backed by a [`ThreadPoolDispatcher`] sized to the
    /// available CPUs.
    pub fn with_default_dispatcher() -> Self {
        Self::new(Arc::new(ThreadPoolDispatcher::with_default_parallelism()))
    }

    pub(crate) fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// `true` if `self` and `other` share the same underlying dispatcher.
    pub fn is_same_as(&self, other: &System) -> bool {
        Arc::ptr_eq(&self.dispatcher, &other.dispatcher)
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System").finish_non_exhaustive()
    }
}
