//! Connected client registry.
//!
//! Owns client session records (identity, last known location, heartbeat and
//! subscription sequence numbers) and is the only component allowed to mutate
//! subscription lifecycle: subscription storage is delegated to the
//! [`SubscriptionIndex`], and every removal path (UNSUBSCRIBE, DISCONNECT,
//! stale purge) goes through here so both structures stay consistent.
//!
//! Operations on distinct clients run fully in parallel; operations on the
//! same client are serialized by the per-key shard locking of the underlying
//! map.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeomqError, Result};
use crate::geometry::{Geofence, Location};
use crate::subscription::{Subscription, SubscriptionIndex};
use crate::topic::Topic;
use crate::types::*;

/// A connected client session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub location: Location,
    /// Last activity, refreshed by every message from this client.
    pub heartbeat: TimestampMillis,
    next_seq: SubscriptionSeq,
}

impl Client {
    fn new(id: ClientId, location: Location, now: TimestampMillis) -> Self {
        Self { id, location, heartbeat: now, next_seq: 1 }
    }

    #[inline]
    fn alloc_seq(&mut self) -> SubscriptionSeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[derive(Clone)]
pub struct ClientDirectory {
    clients: Arc<DashMap<ClientId, Client>>,
    index: SubscriptionIndex,
}

impl ClientDirectory {
    pub fn new(index: SubscriptionIndex) -> Self {
        Self { clients: Arc::new(DashMap::default()), index }
    }

    #[inline]
    pub fn index(&self) -> &SubscriptionIndex {
        &self.index
    }

    /// Upsert the client and refresh its heartbeat. Returns whether this was
    /// a new connection.
    pub fn create_or_update_client(&self, client_id: ClientId, location: Location) -> IsNewConnection {
        let now = timestamp_millis();
        match self.clients.entry(client_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let c = entry.get_mut();
                c.location = location;
                c.heartbeat = now;
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Client::new(client_id, location, now));
                true
            }
        }
    }

    /// Update the client's location and heartbeat.
    pub fn update_location(&self, client_id: &str, location: Location) -> Result<()> {
        let mut c = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| GeomqError::NotConnected(ClientId::from(client_id)))?;
        c.location = location;
        c.heartbeat = timestamp_millis();
        Ok(())
    }

    /// Refresh the heartbeat only; any activity counts.
    pub fn touch(&self, client_id: &str) -> bool {
        if let Some(mut c) = self.clients.get_mut(client_id) {
            c.heartbeat = timestamp_millis();
            true
        } else {
            false
        }
    }

    /// Insert or replace the client's subscription for `topic`. The client
    /// entry guard is held across the index write, so a concurrent
    /// `remove_client` cascade cannot slip between sequence allocation and
    /// insertion and leave an orphan in the index. `remove_client` releases
    /// its clients-map lock before touching the index, so the two paths
    /// cannot deadlock.
    pub fn put_subscription(
        &self,
        client_id: &str,
        topic: Topic,
        geofence: Geofence,
    ) -> Result<SubscriptionSeq> {
        let mut c = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| GeomqError::NotConnected(ClientId::from(client_id)))?;
        c.heartbeat = timestamp_millis();
        let seq = c.alloc_seq();
        self.index.put(Subscription { client_id: ClientId::from(client_id), seq, topic, geofence });
        Ok(seq)
    }

    /// Remove the subscription if present; idempotent.
    pub fn remove_subscription(&self, client_id: &str, topic: &str) -> Option<SubscriptionSeq> {
        self.touch(client_id);
        self.index.remove(client_id, topic).map(|s| s.seq)
    }

    /// Remove the client and cascade removal of all its subscriptions.
    pub fn remove_client(&self, client_id: &str) -> Option<Client> {
        let removed = self.clients.remove(client_id).map(|(_, c)| c);
        if removed.is_some() {
            let n = self.index.remove_all_for_client(client_id);
            log::debug!("client `{client_id}` removed, {n} subscription(s) dropped");
        }
        removed
    }

    #[inline]
    pub fn is_client_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    #[inline]
    pub fn location_of(&self, client_id: &str) -> Option<Location> {
        self.clients.get(client_id).map(|c| c.location)
    }

    #[inline]
    pub fn clients(&self) -> usize {
        self.clients.len()
    }

    /// Remove and return every client silent for longer than `max_silence`.
    /// Runs on its own timer cadence, never on the matching hot path, and
    /// uses the same removal path as DISCONNECT.
    pub fn purge_stale(&self, max_silence: Duration, now: TimestampMillis) -> Vec<Client> {
        let deadline = now - max_silence.as_millis() as TimestampMillis;
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| c.heartbeat < deadline)
            .map(|c| c.id.clone())
            .collect();

        stale.iter().filter_map(|id| self.remove_client(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ClientDirectory {
        ClientDirectory::new(SubscriptionIndex::new())
    }

    fn berlin() -> Location {
        Location::new(52.0, 13.0).unwrap()
    }

    fn topic(s: &str) -> Topic {
        s.parse().expect("")
    }

    #[test]
    fn test_connect_lifecycle() {
        let d = directory();
        assert!(d.create_or_update_client(ClientId::from("c1"), berlin()));
        assert!(d.is_client_connected("c1"));
        assert!(!d.create_or_update_client(ClientId::from("c1"), berlin())); // reconnect

        assert!(d.remove_client("c1").is_some());
        assert!(!d.is_client_connected("c1"));
        assert!(d.remove_client("c1").is_none());
    }

    #[test]
    fn test_update_location_unknown_client() {
        let d = directory();
        let res = d.update_location("ghost", berlin());
        assert!(matches!(res, Err(GeomqError::NotConnected(_))));
    }

    #[test]
    fn test_subscription_seq_increments() {
        let d = directory();
        d.create_or_update_client(ClientId::from("c1"), berlin());

        let s1 = d.put_subscription("c1", topic("t1"), Geofence::world()).expect("");
        let s2 = d.put_subscription("c1", topic("t2"), Geofence::world()).expect("");
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);

        // Re-subscribe to the same topic: fresh identity, old one not reused.
        let s3 = d.put_subscription("c1", topic("t1"), Geofence::empty()).expect("");
        assert_eq!(s3, 3);
        assert_eq!(d.index().subscriptions(), 2);
    }

    #[test]
    fn test_put_subscription_requires_connection() {
        let d = directory();
        let res = d.put_subscription("ghost", topic("t1"), Geofence::world());
        assert!(matches!(res, Err(GeomqError::NotConnected(_))));
    }

    #[test]
    fn test_remove_subscription_idempotent() {
        let d = directory();
        d.create_or_update_client(ClientId::from("c1"), berlin());
        d.put_subscription("c1", topic("t1"), Geofence::world()).expect("");

        assert_eq!(d.remove_subscription("c1", "t1"), Some(1));
        assert_eq!(d.remove_subscription("c1", "t1"), None);
    }

    #[test]
    fn test_remove_client_cascades() {
        let d = directory();
        d.create_or_update_client(ClientId::from("c1"), berlin());
        d.put_subscription("c1", topic("t1"), Geofence::world()).expect("");
        d.put_subscription("c1", topic("t2"), Geofence::world()).expect("");

        d.remove_client("c1");
        for t in ["t1", "t2"] {
            assert!(d.index().find_matches(t, &berlin()).is_empty());
        }
    }

    #[test]
    fn test_no_orphan_subscription_under_concurrent_removal() {
        let d = directory();
        for _ in 0..200 {
            d.create_or_update_client(ClientId::from("c1"), berlin());

            let d2 = d.clone();
            let subscriber = std::thread::spawn(move || {
                let _ = d2.put_subscription("c1", "t1".parse().expect(""), Geofence::world());
            });
            d.remove_client("c1");
            subscriber.join().expect("");

            // Whichever side won the entry lock, a removed client must leave
            // no index entry behind.
            assert!(!d.is_client_connected("c1"));
            assert_eq!(d.index().subscriptions(), 0, "orphan subscription left in index");
        }
    }

    #[test]
    fn test_purge_stale() {
        let d = directory();
        d.create_or_update_client(ClientId::from("c1"), berlin());

        // Within the silence budget: nothing is purged.
        let purged = d.purge_stale(Duration::from_secs(60), timestamp_millis());
        assert!(purged.is_empty());
        assert!(d.is_client_connected("c1"));

        // Evaluated an hour later with the same budget: stale.
        let purged = d.purge_stale(Duration::from_secs(60), timestamp_millis() + 3_600_000);
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, "c1");
        assert!(!d.is_client_connected("c1"));
    }

    #[test]
    fn test_purge_uses_removal_path() {
        let d = directory();
        d.create_or_update_client(ClientId::from("c1"), berlin());
        d.put_subscription("c1", topic("t1"), Geofence::world()).expect("");

        let purged = d.purge_stale(Duration::from_millis(0), timestamp_millis() + 10);
        assert_eq!(purged.len(), 1);
        assert!(!d.is_client_connected("c1"));
        assert!(d.index().find_matches("t1", &berlin()).is_empty());
    }
}
