//! Broker responsibility areas.
//!
//! Every broker instance is authoritative for exactly one geofence and knows
//! a static list of peer broker areas, loaded once at startup. Peer fences
//! may overlap each other and the local one; ambiguity is resolved by the
//! matching protocol (duplicate delivery across overlapping peers is
//! tolerated), never by mutual exclusion. Read-only after startup, so no
//! locking is needed.

use serde::{Deserialize, Serialize};

use crate::geometry::{Geofence, Location};
use crate::types::*;

/// Publicly reachable identity of a broker instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerInfo {
    pub id: BrokerId,
    pub host: Addr,
    pub port: Port,
}

impl std::fmt::Display for BrokerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// A broker and the geofence it is responsible for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BrokerArea {
    pub info: BrokerInfo,
    pub geofence: Geofence,
}

pub struct BrokerAreaManager {
    own: BrokerArea,
    /// Sorted by broker id so peer selection is deterministic for identical
    /// input across all brokers.
    peers: Vec<BrokerArea>,
}

impl BrokerAreaManager {
    pub fn new(own: BrokerArea, mut peers: Vec<BrokerArea>) -> Self {
        peers.retain(|p| {
            if p.info.id == own.info.id {
                log::warn!("peer list contains this broker's own id `{}`, ignoring it", p.info.id);
                false
            } else {
                true
            }
        });
        peers.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        Self { own, peers }
    }

    #[inline]
    pub fn own(&self) -> &BrokerArea {
        &self.own
    }

    #[inline]
    pub fn peers(&self) -> &[BrokerArea] {
        &self.peers
    }

    /// True when this broker's own geofence contains `location`.
    #[inline]
    pub fn is_responsible_for(&self, location: &Location) -> bool {
        self.own.geofence.contains(location)
    }

    /// The first peer (in id order) whose geofence contains `location`.
    pub fn other_broker_for(&self, location: &Location) -> Option<&BrokerInfo> {
        self.peers.iter().find(|p| p.geofence.contains(location)).map(|p| &p.info)
    }

    /// Every peer whose geofence intersects `fence`, in id order. These are
    /// the forward targets for a publish whose fence is not fully covered by
    /// the local area.
    pub fn peers_for_geofence(&self, fence: &Geofence) -> Vec<&BrokerInfo> {
        self.peers.iter().filter(|p| p.geofence.intersects(fence)).map(|p| &p.info).collect()
    }
}
