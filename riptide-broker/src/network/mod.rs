//! Network handling for client connections.
//!
//! The listener admits connections up to a hard cap, hands each one to
//! an independent tokio task, and contains every failure inside that
//! task: a connection that errors, times out, or panics tears down its
//! own mailbox and nothing else.

pub mod connection;
pub mod listener;

pub use connection::{client_name, Connection, ConnectionTeardown};
pub use listener::TcpListener;

use crate::mailbox::{Mailbox, MailboxId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of live connections, bounded by the configured client cap.
///
/// Keyed by mailbox identity, since connection and mailbox share one
/// lifetime.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<MailboxId, Arc<Mailbox>>,
    max_connections: usize,
    total_accepted: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a registry with the given capacity.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self { connections: DashMap::new(), max_connections, total_accepted: AtomicU64::new(0) }
    }

    /// Try to admit a connection. Returns `false` when the live count
    /// has reached the cap; the caller then applies the server-busy
    /// refusal.
    #[must_use]
    pub fn try_add(&self, mailbox: Arc<Mailbox>) -> bool {
        if self.connections.len() >= self.max_connections {
            return false;
        }
        self.connections.insert(mailbox.id(), mailbox);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a connection. Idempotent.
    pub fn remove(&self, id: MailboxId) {
        self.connections.remove(&id);
    }

    /// Current number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Total connections ever admitted.
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Whether a new connection would currently be admitted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.connections.len() < self.max_connections
    }
}
