//! Lightweight unique identifiers for servers.
//!
//! Servers are usually addressed by name, but every server also carries a
//! numeric identity that is cheap to compare and copy. It is what the
//! reentrancy guard in [`crate::server`] compares against the thread-local
//! "currently executing" marker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identifier assigned to every constructed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(u64);

impl ServerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value, mostly useful for logging.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates a default server name of the form `server-<id>` for servers
/// that were not given an explicit name at construction.
pub(crate) fn default_name(id: ServerId) -> String {
    format!("server-{id}")
}
