//! Topic-first subscription index.
//!
//! Concurrent two-level mapping from topic to per-client subscriptions.
//! Indexing by topic first keeps the hot publish path from scanning every
//! subscription: geofence containment is only evaluated among topic-matching
//! candidates. Entries are updated under the owning shard lock, so a match
//! running concurrently with a removal sees either the old or the new state,
//! never a half-removed one. No lock is held across geometry evaluation on
//! the write paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{Geofence, Location};
use crate::topic::Topic;
use crate::types::*;

/// A client's standing interest in a topic, bounded by a geofence.
///
/// Identified by `(client_id, seq)`; `seq` increments per client and is never
/// reused. At most one subscription exists per (client, topic): re-subscribing
/// to the same topic silently replaces the previous one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subscription {
    pub client_id: ClientId,
    pub seq: SubscriptionSeq,
    pub topic: Topic,
    pub geofence: Geofence,
}

impl Subscription {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        (self.client_id.clone(), self.seq)
    }

    #[inline]
    pub fn topic_name(&self) -> TopicName {
        TopicName::from(self.topic.to_string())
    }
}

#[derive(Clone, Default)]
pub struct SubscriptionIndex {
    relations: Arc<DashMap<TopicName, HashMap<ClientId, Subscription>>>,
    topics_count: Arc<AtomicUsize>,
    subscriptions_count: Arc<AtomicUsize>,
}

impl SubscriptionIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription for `(client, topic)`. Returns the
    /// replaced subscription, if any.
    pub fn put(&self, subscription: Subscription) -> Option<Subscription> {
        let topic_name = subscription.topic_name();
        let old = self
            .relations
            .entry(topic_name)
            .or_insert_with(|| {
                self.topics_count.fetch_add(1, Ordering::SeqCst);
                HashMap::default()
            })
            .insert(subscription.client_id.clone(), subscription);
        if old.is_none() {
            self.subscriptions_count.fetch_add(1, Ordering::SeqCst);
        }
        old
    }

    /// Remove the subscription for `(client, topic)` if present; a no-op
    /// otherwise.
    pub fn remove(&self, client_id: &str, topic: &str) -> Option<Subscription> {
        let removed = if let Some(mut rels) = self.relations.get_mut(topic) {
            let removed = rels.value_mut().remove(client_id);
            if removed.is_some() {
                self.subscriptions_count.fetch_sub(1, Ordering::SeqCst);
            }
            removed
        } else {
            None
        };

        if removed.is_some() {
            // Drop the topic entry if it just became empty.
            if self.relations.remove_if(topic, |_, rels| rels.is_empty()).is_some() {
                self.topics_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
        removed
    }

    /// Remove every subscription of `client_id`; used on disconnect and
    /// expiry. Each topic entry is updated atomically under its shard lock.
    pub fn remove_all_for_client(&self, client_id: &str) -> usize {
        let mut removed = 0;
        self.relations.retain(|_, rels| {
            if rels.remove(client_id).is_some() {
                removed += 1;
                self.subscriptions_count.fetch_sub(1, Ordering::SeqCst);
            }
            if rels.is_empty() {
                self.topics_count.fetch_sub(1, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        removed
    }

    /// All subscriptions whose topic equals `topic` and whose geofence
    /// contains `publisher_location`. Single pass over the state at call
    /// time; the result is a snapshot and is not restartable.
    pub fn find_matches(&self, topic: &str, publisher_location: &Location) -> Vec<Subscription> {
        self.relations
            .get(topic)
            .map(|rels| {
                rels.value()
                    .values()
                    .filter(|sub| sub.geofence.contains(publisher_location))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when `client_id` holds a subscription for `topic`.
    pub fn contains(&self, client_id: &str, topic: &str) -> bool {
        self.relations.get(topic).map(|rels| rels.contains_key(client_id)).unwrap_or(false)
    }

    #[inline]
    pub fn topics(&self) -> usize {
        self.topics_count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn subscriptions(&self) -> usize {
        self.subscriptions_count.load(Ordering::SeqCst)
    }
}
