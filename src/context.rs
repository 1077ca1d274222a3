//! Shared execution context.
//!
//! One [`BrokerContext`] is built at startup from [`Settings`] and cloned
//! into every component that needs it (cheap `Arc` clone). It replaces any
//! process-global state: everything the matching logic touches hangs off the
//! context it was handed.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::area::BrokerAreaManager;
use crate::directory::ClientDirectory;
use crate::error::Result;
use crate::settings::Settings;
use crate::subscription::SubscriptionIndex;

#[derive(Clone)]
pub struct BrokerContext {
    inner: Arc<BrokerContextInner>,
}

pub struct BrokerContextInner {
    pub settings: Settings,
    pub areas: BrokerAreaManager,
    pub directory: ClientDirectory,
    pub stats: Stats,
}

impl Deref for BrokerContext {
    type Target = BrokerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BrokerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerContext")
            .field("broker", &self.areas.own().info.to_string())
            .field("peers", &self.areas.peers().len())
            .field("clients", &self.directory.clients())
            .field("subscriptions", &self.index().subscriptions())
            .finish()
    }
}

impl BrokerContext {
    /// Build the context, validating every configured geofence. A degenerate
    /// own or peer fence fails startup rather than silently matching nothing.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.logs();
        let own = settings.broker.to_area()?;
        let peers = settings.peers.iter().map(|p| p.to_area()).collect::<Result<Vec<_>>>()?;
        let areas = BrokerAreaManager::new(own, peers);
        let directory = ClientDirectory::new(SubscriptionIndex::new());
        Ok(Self {
            inner: Arc::new(BrokerContextInner { settings, areas, directory, stats: Stats::default() }),
        })
    }

    #[inline]
    pub fn index(&self) -> &SubscriptionIndex {
        self.directory.index()
    }
}

/// Monotonic counters for inspection; never read on the matching path.
#[derive(Default)]
pub struct Stats {
    pub publishes: AtomicUsize,
    pub deliveries: AtomicUsize,
    pub forwards: AtomicUsize,
    pub protocol_errors: AtomicUsize,
}

impl Stats {
    #[inline]
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FenceCfg, Inner};

    #[test]
    fn test_new_from_defaults() {
        let cx = BrokerContext::new(Settings::from(Inner::default())).expect("");
        assert_eq!(cx.areas.own().info.id, "geomq1");
        assert!(cx.areas.peers().is_empty());
        assert_eq!(cx.directory.clients(), 0);
    }

    #[test]
    fn test_bad_fence_fails_startup() {
        let mut inner = Inner::default();
        inner.broker.area = FenceCfg::Circle { center: [52.0, 13.0], radius: 0.0 };
        assert!(BrokerContext::new(Settings::from(inner)).is_err());
    }
}
