//! Sharded topic→subscriber routing.
//!
//! The topic space is partitioned across a fixed number of shards by a
//! pure hash of the topic bytes. Each shard owns two inverse maps and
//! serializes every mutation behind its own mutex, so publish and
//! subscribe traffic on disjoint topic sets proceeds in parallel with no
//! global lock. Shards hold weak back-references to mailboxes: a shard
//! entry never keeps a disconnected client's buffers alive, and
//! connection teardown evicts the entries explicitly via
//! [`Router::drop_queue`].

use crate::config::RouterConfig;
use crate::mailbox::{Mailbox, MailboxId};
use bytes::Bytes;
use riptide_core::Topic;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ShardInner {
    /// Topic → subscriber back-references, keyed by mailbox identity.
    subs: HashMap<Topic, HashMap<MailboxId, Weak<Mailbox>>>,
    /// Mailbox → topics it holds on this shard (teardown bookkeeping).
    owned: HashMap<MailboxId, HashSet<Topic>>,
}

impl ShardInner {
    /// Remove one (topic, mailbox) pair from both maps, garbage
    /// collecting emptied keys.
    fn remove_pair(&mut self, topic: &Topic, id: MailboxId) {
        if let Some(subscribers) = self.subs.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.subs.remove(topic);
            }
        }
        if let Some(owned) = self.owned.get_mut(&id) {
            owned.remove(topic);
            if owned.is_empty() {
                self.owned.remove(&id);
            }
        }
    }
}

/// One partition of the topic space with its own serialization domain.
#[derive(Debug, Default)]
pub struct RouterShard {
    inner: Mutex<ShardInner>,
}

impl RouterShard {
    /// Install (mailbox, topic) pairs. Already-present pairs are no-ops.
    fn subscribe(&self, mailbox: &Arc<Mailbox>, topics: &[Topic]) {
        if topics.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for topic in topics {
            inner
                .subs
                .entry(topic.clone())
                .or_default()
                .insert(mailbox.id(), Arc::downgrade(mailbox));
            inner.owned.entry(mailbox.id()).or_default().insert(topic.clone());
        }
        mailbox.record_subscription(topics);
    }

    /// Remove (mailbox, topic) pairs. Absent pairs are no-ops.
    fn unsubscribe(&self, mailbox: &Arc<Mailbox>, topics: &[Topic]) {
        if topics.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for topic in topics {
            inner.remove_pair(topic, mailbox.id());
        }
        mailbox.forget_subscription(topics);
    }

    /// Deliver a payload to every mailbox subscribed to any of the given
    /// topics, one enqueue per distinct mailbox carrying the topics it
    /// matched here. Returns the number of mailboxes enqueued into.
    fn publish(&self, topics: &[Topic], payload: &Bytes, min_fanout_to_warn: usize) -> usize {
        let mut inner = self.inner.lock();

        let mut targets: HashMap<MailboxId, (Arc<Mailbox>, Vec<Topic>)> = HashMap::new();
        let mut dead: Vec<(Topic, MailboxId)> = Vec::new();

        for topic in topics {
            let Some(subscribers) = inner.subs.get(topic) else {
                continue;
            };
            for (&id, handle) in subscribers {
                if let Some(mailbox) = handle.upgrade() {
                    targets.entry(id).or_insert_with(|| (mailbox, Vec::new())).1.push(topic.clone());
                } else {
                    dead.push((topic.clone(), id));
                }
            }
        }

        // Evict references whose mailbox is already gone; drop_queue
        // normally beats us here, this is the containment path.
        for (topic, id) in dead {
            inner.remove_pair(&topic, id);
        }

        let fanout = targets.len();
        if fanout > min_fanout_to_warn {
            warn!(fanout, threshold = min_fanout_to_warn, "publish fan-out above threshold");
        }

        for (mailbox, matched) in targets.into_values() {
            mailbox.enqueue(matched, payload.clone());
        }

        fanout
    }

    /// Remove every trace of a mailbox from this shard.
    fn drop_queue(&self, id: MailboxId) {
        let mut inner = self.inner.lock();
        if let Some(owned) = inner.owned.remove(&id) {
            for topic in owned {
                if let Some(subscribers) = inner.subs.get_mut(&topic) {
                    subscribers.remove(&id);
                    if subscribers.is_empty() {
                        inner.subs.remove(&topic);
                    }
                }
            }
        }
    }

    fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner.lock().subs.get(topic).map_or(0, HashMap::len)
    }

    fn topic_count(&self) -> usize {
        self.inner.lock().subs.len()
    }

    /// Check the per-shard bidirectional agreement between `subs` and
    /// `owned`.
    #[cfg(test)]
    fn agreement_holds(&self) -> bool {
        let inner = self.inner.lock();
        let forward = inner.subs.iter().all(|(topic, subscribers)| {
            subscribers
                .keys()
                .all(|id| inner.owned.get(id).is_some_and(|owned| owned.contains(topic)))
        });
        let backward = inner.owned.iter().all(|(id, owned)| {
            owned
                .iter()
                .all(|topic| inner.subs.get(topic).is_some_and(|subs| subs.contains_key(id)))
        });
        forward && backward
    }

    #[cfg(test)]
    fn holds_mailbox(&self, id: MailboxId) -> bool {
        let inner = self.inner.lock();
        inner.owned.contains_key(&id)
            || inner.subs.values().any(|subscribers| subscribers.contains_key(&id))
    }
}

/// Deterministic shard selector fanning subscribe/unsubscribe/publish
/// traffic across a fixed, immutable array of shards.
#[derive(Debug)]
pub struct Router {
    shards: Vec<RouterShard>,
    min_fanout_to_warn: usize,
    min_publish_to_topics_to_warn: usize,
}

impl Router {
    /// Create a router with `config.num_shards` empty shards. The shard
    /// count is fixed for the router's lifetime.
    #[must_use]
    pub fn new(config: &RouterConfig) -> Self {
        let mut shards = Vec::with_capacity(config.num_shards);
        shards.resize_with(config.num_shards, RouterShard::default);
        Self {
            shards,
            min_fanout_to_warn: config.min_fanout_to_warn,
            min_publish_to_topics_to_warn: config.min_publish_to_topics_to_warn,
        }
    }

    /// Number of shards, fixed at startup.
    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Shard index owning a topic: a pure function of the topic bytes.
    #[must_use]
    pub fn shard_of(&self, topic: &Topic) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write(topic.as_bytes());
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Group topics by the shard that owns them.
    fn partition(&self, topics: &[Topic]) -> Vec<Vec<Topic>> {
        let mut partitions: Vec<Vec<Topic>> = Vec::new();
        partitions.resize_with(self.shards.len(), Vec::new);
        for topic in topics {
            partitions[self.shard_of(topic)].push(topic.clone());
        }
        partitions
    }

    /// Subscribe a mailbox to topics. Returns after every involved shard
    /// has applied its partition.
    pub fn subscribe(&self, mailbox: &Arc<Mailbox>, topics: &[Topic]) {
        for (index, partition) in self.partition(topics).into_iter().enumerate() {
            self.shards[index].subscribe(mailbox, &partition);
        }
    }

    /// Unsubscribe a mailbox from topics.
    pub fn unsubscribe(&self, mailbox: &Arc<Mailbox>, topics: &[Topic]) {
        for (index, partition) in self.partition(topics).into_iter().enumerate() {
            self.shards[index].unsubscribe(mailbox, &partition);
        }
    }

    /// Publish one payload to the given topics, fanning out per shard.
    ///
    /// The origin mailbox is not filtered out: a publisher subscribed to
    /// its own topic receives its own message. A publish spanning
    /// several shards is not atomic across them: a concurrent fetch may
    /// observe some shards' deliveries and not others, but none are
    /// lost. Returns the total number of mailboxes enqueued into.
    pub fn publish(&self, origin: MailboxId, topics: &[Topic], payload: &Bytes) -> usize {
        if topics.len() > self.min_publish_to_topics_to_warn {
            warn!(
                origin = %origin,
                topics = topics.len(),
                threshold = self.min_publish_to_topics_to_warn,
                "publish touches many topics"
            );
        }

        let mut delivered = 0;
        for (index, partition) in self.partition(topics).into_iter().enumerate() {
            if partition.is_empty() {
                continue;
            }
            delivered += self.shards[index].publish(&partition, payload, self.min_fanout_to_warn);
        }

        debug!(origin = %origin, topics = topics.len(), delivered, "published");
        delivered
    }

    /// Remove a mailbox from every shard. Runs to completion before
    /// returning, so the caller may release the mailbox storage
    /// afterwards with no dangling shard reference left behind.
    pub fn drop_queue(&self, id: MailboxId) {
        for shard in &self.shards {
            shard.drop_queue(id);
        }
    }

    /// Diagnostic: number of live subscriber entries for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.shards[self.shard_of(topic)].subscriber_count(topic)
    }

    /// Diagnostic: number of topics with at least one subscriber entry.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.shards.iter().map(RouterShard::topic_count).sum()
    }

    #[cfg(test)]
    fn agreement_holds(&self) -> bool {
        self.shards.iter().all(RouterShard::agreement_holds)
    }

    #[cfg(test)]
    fn holds_mailbox(&self, id: MailboxId) -> bool {
        self.shards.iter().any(|shard| shard.holds_mailbox(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    fn topics(names: &[&str]) -> Vec<Topic> {
        names.iter().map(|n| topic(n)).collect()
    }

    fn test_router() -> Router {
        Router::new(&RouterConfig {
            num_shards: 4,
            min_fanout_to_warn: 100,
            min_publish_to_topics_to_warn: 20,
        })
    }

    #[test]
    fn test_shard_of_is_pure_and_stable() {
        let router = test_router();
        let t = topic("stable-topic");
        let first = router.shard_of(&t);
        for _ in 0..100 {
            assert_eq!(router.shard_of(&t), first);
        }
        // Independent router instance with the same shard count agrees.
        assert_eq!(test_router().shard_of(&t), first);
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["a"]));

        let delivered =
            router.publish(MailboxId::new(), &topics(&["a"]), &Bytes::from_static(b"m1"));
        assert_eq!(delivered, 1);

        let drained = mailbox.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].topics, topics(&["a"]));
        assert_eq!(drained[0].payload.as_ref(), b"m1");
    }

    #[test]
    fn test_publish_without_subscribers_delivers_nothing() {
        let router = test_router();
        let delivered =
            router.publish(MailboxId::new(), &topics(&["nobody"]), &Bytes::from_static(b"m"));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_multi_topic_publish_enqueues_once_per_mailbox() {
        // All topics forced onto one shard would be fragile; instead use
        // many topics and assert the per-shard dedup by total entries.
        let router = Router::new(&RouterConfig {
            num_shards: 1,
            min_fanout_to_warn: 100,
            min_publish_to_topics_to_warn: 20,
        });
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["a", "b", "c"]));

        let delivered =
            router.publish(MailboxId::new(), &topics(&["a", "b", "c"]), &Bytes::from_static(b"ok"));
        assert_eq!(delivered, 1);

        let drained = mailbox.drain();
        assert_eq!(drained.len(), 1);
        let mut matched = drained[0].topics.clone();
        matched.sort();
        assert_eq!(matched, topics(&["a", "b", "c"]));
    }

    #[test]
    fn test_entry_topics_are_restricted_to_matches() {
        let router = Router::new(&RouterConfig {
            num_shards: 1,
            min_fanout_to_warn: 100,
            min_publish_to_topics_to_warn: 20,
        });
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["a"]));

        router.publish(MailboxId::new(), &topics(&["a", "b"]), &Bytes::from_static(b"m"));
        let drained = mailbox.drain();
        assert_eq!(drained[0].topics, topics(&["a"]));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["x"]));
        router.unsubscribe(&mailbox, &topics(&["x"]));

        let delivered =
            router.publish(MailboxId::new(), &topics(&["x"]), &Bytes::from_static(b"m"));
        assert_eq!(delivered, 0);
        assert!(mailbox.drain().is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_and_absent_unsubscribe_are_noops() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["t"]));
        router.subscribe(&mailbox, &topics(&["t"]));
        assert_eq!(router.subscriber_count(&topic("t")), 1);

        router.unsubscribe(&mailbox, &topics(&["never-subscribed"]));
        assert!(router.agreement_holds());
    }

    #[test]
    fn test_bidirectional_agreement_under_interleaving() {
        let router = test_router();
        let first = Arc::new(Mailbox::new());
        let second = Arc::new(Mailbox::new());

        router.subscribe(&first, &topics(&["a", "b", "c", "d"]));
        router.subscribe(&second, &topics(&["c", "d", "e"]));
        router.unsubscribe(&first, &topics(&["b", "d"]));
        router.subscribe(&first, &topics(&["e", "f"]));
        router.unsubscribe(&second, &topics(&["c"]));

        assert!(router.agreement_holds());
    }

    #[test]
    fn test_drop_queue_leaves_no_reference() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        let names: Vec<String> = (0..100).map(|i| format!("topic-{i}")).collect();
        let many: Vec<Topic> = names.iter().map(|n| topic(n)).collect();
        router.subscribe(&mailbox, &many);

        router.drop_queue(mailbox.id());

        assert!(!router.holds_mailbox(mailbox.id()));
        for t in &many {
            assert_eq!(router.subscriber_count(t), 0);
        }
        assert_eq!(router.topic_count(), 0);
        assert!(router.agreement_holds());
    }

    #[test]
    fn test_drop_queue_is_idempotent() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &topics(&["t"]));
        router.drop_queue(mailbox.id());
        router.drop_queue(mailbox.id());
        assert!(!router.holds_mailbox(mailbox.id()));
    }

    #[test]
    fn test_shards_do_not_keep_mailboxes_alive() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        let id = mailbox.id();
        router.subscribe(&mailbox, &topics(&["t"]));

        // The shard holds only a weak handle; dropping the owner frees it.
        drop(mailbox);

        let delivered = router.publish(MailboxId::new(), &topics(&["t"]), &Bytes::from_static(b"m"));
        assert_eq!(delivered, 0);
        // The dead reference was evicted during the publish.
        assert_eq!(router.subscriber_count(&topic("t")), 0);
        assert!(!router.holds_mailbox(id));
    }

    #[test]
    fn test_empty_topic_list_operations_are_noops() {
        let router = test_router();
        let mailbox = Arc::new(Mailbox::new());
        router.subscribe(&mailbox, &[]);
        router.unsubscribe(&mailbox, &[]);
        assert_eq!(router.publish(MailboxId::new(), &[], &Bytes::from_static(b"m")), 0);
        assert_eq!(router.topic_count(), 0);
    }
}
