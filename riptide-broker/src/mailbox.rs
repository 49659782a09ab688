//! Per-client mailbox.
//!
//! Each connection owns exactly one [`Mailbox`] for its lifetime. Router
//! shards append deliveries into it from inside their critical sections,
//! so every operation here is non-blocking and non-failing: edge cases
//! become no-ops. The mailbox is the last line of containment against
//! races on disconnect: an enqueue arriving after [`Mailbox::stop`] is
//! dropped silently rather than surfaced.

use bytes::Bytes;
use parking_lot::Mutex;
use riptide_core::{Delivery, Topic};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Unique identity of a mailbox, stable for the owning connection's
/// lifetime. Shards key their back-references by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(Uuid);

impl MailboxId {
    /// Create a new unique mailbox id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MailboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct MailboxInner {
    entries: VecDeque<Delivery>,
    topics: HashSet<Topic>,
    stopped: bool,
}

/// Per-client FIFO buffer of deliveries, drained by explicit fetch.
///
/// The mailbox also tracks which topics its owner is subscribed to, so
/// teardown knows which shards to notify.
#[derive(Debug)]
pub struct Mailbox {
    id: MailboxId,
    inner: Mutex<MailboxInner>,
}

impl Mailbox {
    /// Create a new empty, live mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self { id: MailboxId::new(), inner: Mutex::new(MailboxInner::default()) }
    }

    /// Get the mailbox identity.
    #[must_use]
    pub const fn id(&self) -> MailboxId {
        self.id
    }

    /// Append one delivery. Non-blocking; dropped silently after
    /// [`Mailbox::stop`] (late shard publishes lose the teardown race).
    pub fn enqueue(&self, topics: Vec<Topic>, payload: Bytes) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.entries.push_back(Delivery::new(topics, payload));
    }

    /// Return and remove all buffered deliveries, in FIFO order.
    ///
    /// The drain is atomic: the caller receives everything present at
    /// this instant, and a subsequent drain starts from empty.
    #[must_use]
    pub fn drain(&self) -> Vec<Delivery> {
        let mut inner = self.inner.lock();
        inner.entries.drain(..).collect()
    }

    /// Record topics as subscribed. Idempotent per topic.
    pub fn record_subscription(&self, topics: &[Topic]) {
        let mut inner = self.inner.lock();
        for topic in topics {
            inner.topics.insert(topic.clone());
        }
    }

    /// Forget topics previously recorded. Idempotent per topic.
    pub fn forget_subscription(&self, topics: &[Topic]) {
        let mut inner = self.inner.lock();
        for topic in topics {
            inner.topics.remove(topic);
        }
    }

    /// Snapshot of the currently subscribed topics, for teardown.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.inner.lock().topics.iter().cloned().collect()
    }

    /// Mark the mailbox dead. Idempotent; subsequent enqueues are
    /// dropped silently.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.entries.clear();
    }

    /// Whether [`Mailbox::stop`] has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Number of buffered deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the mailbox holds no deliveries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
