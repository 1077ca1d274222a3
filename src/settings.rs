//! Static configuration consumed at startup.
//!
//! Loaded from `geomq.toml` (or an explicit file) plus `GEOMQ_*` environment
//! overrides and handed to [`crate::context::BrokerContext`] explicitly;
//! there is no process-global settings instance. Covers this broker's
//! identity and responsibility geofence, the static peer list, the
//! stale-client timeout and the worker pool sizing. The broker list is never
//! mutated at runtime.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, File};
use serde::de::{Deserialize, Deserializer};

use crate::area::{BrokerArea, BrokerInfo};
use crate::error::Result;
use crate::geometry::{Geofence, Location};
use crate::types::*;

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub broker: Broker,
    #[serde(default, rename = "peer")]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub client: ClientCfg,
    #[serde(default)]
    pub task: Task,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl From<Inner> for Settings {
    fn from(inner: Inner) -> Self {
        Settings(Arc::new(inner))
    }
}

impl Settings {
    /// Load from the default file locations, an optional explicit file and
    /// the environment.
    pub fn load(cfg_name: Option<&str>) -> Result<Settings> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/geomq/geomq").required(false))
            .add_source(File::with_name("geomq").required(false))
            .add_source(config::Environment::with_prefix("geomq").try_parsing(true));

        if let Some(cfg) = cfg_name {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Settings(Arc::new(inner)))
    }

    pub fn logs(&self) {
        log::info!("broker id is {}", self.broker.id);
        log::info!("broker addr is {}:{}", self.broker.host, self.broker.port);
        log::info!("peer count is {}", self.peers.len());
        log::info!("client expiry is {:?}", self.client.expiry);
        log::info!("workers is {}", self.task.workers);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Broker {
    #[serde(default = "Broker::id_default")]
    pub id: String,
    #[serde(default = "Broker::host_default")]
    pub host: String,
    #[serde(default = "Broker::port_default")]
    pub port: Port,
    #[serde(default)]
    pub area: FenceCfg,
}

impl Default for Broker {
    #[inline]
    fn default() -> Self {
        Self {
            id: Self::id_default(),
            host: Self::host_default(),
            port: Self::port_default(),
            area: FenceCfg::default(),
        }
    }
}

impl Broker {
    fn id_default() -> String {
        "geomq1".into()
    }
    fn host_default() -> String {
        "127.0.0.1".into()
    }
    fn port_default() -> Port {
        5841
    }

    pub fn info(&self) -> BrokerInfo {
        BrokerInfo { id: BrokerId::from(self.id.as_str()), host: Addr::from(self.host.as_str()), port: self.port }
    }

    pub fn to_area(&self) -> Result<BrokerArea> {
        Ok(BrokerArea { info: self.info(), geofence: self.area.build()? })
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Peer {
    pub id: String,
    pub host: String,
    #[serde(default = "Broker::port_default")]
    pub port: Port,
    pub area: FenceCfg,
}

impl Peer {
    pub fn to_area(&self) -> Result<BrokerArea> {
        Ok(BrokerArea {
            info: BrokerInfo {
                id: BrokerId::from(self.id.as_str()),
                host: Addr::from(self.host.as_str()),
                port: self.port,
            },
            geofence: self.area.build()?,
        })
    }
}

/// Configuration shape of a geofence. Built into a validated [`Geofence`]
/// via [`FenceCfg::build`]; a degenerate fence rejects the whole config load.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum FenceCfg {
    World,
    Circle { center: [f64; 2], radius: f64 },
    Polygon { vertices: Vec<[f64; 2]> },
}

impl Default for FenceCfg {
    #[inline]
    fn default() -> Self {
        FenceCfg::World
    }
}

impl FenceCfg {
    pub fn build(&self) -> Result<Geofence> {
        match self {
            FenceCfg::World => Ok(Geofence::world()),
            FenceCfg::Circle { center, radius } => {
                Geofence::circle(Location::new(center[0], center[1])?, *radius)
            }
            FenceCfg::Polygon { vertices } => Geofence::polygon(
                vertices.iter().map(|v| Location::new(v[0], v[1])).collect::<Result<Vec<_>>>()?,
            ),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientCfg {
    /// Clients silent longer than this are considered stale and purged.
    #[serde(default = "ClientCfg::expiry_default", deserialize_with = "deserialize_duration")]
    pub expiry: Duration,
    /// Cadence of the stale-client purge timer.
    #[serde(default = "ClientCfg::purge_interval_default", deserialize_with = "deserialize_duration")]
    pub purge_interval: Duration,
}

impl Default for ClientCfg {
    #[inline]
    fn default() -> Self {
        Self { expiry: Self::expiry_default(), purge_interval: Self::purge_interval_default() }
    }
}

impl ClientCfg {
    fn expiry_default() -> Duration {
        Duration::from_secs(300)
    }
    fn purge_interval_default() -> Duration {
        Duration::from_secs(30)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Task {
    /// Number of message processors pulling from the shared ingress queue.
    #[serde(default = "Task::workers_default")]
    pub workers: usize,
    /// Ingress queue capacity.
    #[serde(default = "Task::queue_max_default")]
    pub queue_max: usize,
}

impl Default for Task {
    #[inline]
    fn default() -> Self {
        Self { workers: Self::workers_default(), queue_max: Self::queue_max_default() }
    }
}

impl Task {
    fn workers_default() -> usize {
        4
    }
    fn queue_max_default() -> usize {
        10_000
    }
}

#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Parse "30s", "5m", "1h30m", "250ms" style duration strings.
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_duration() {
        assert_eq!(to_duration("30s"), Duration::from_secs(30));
        assert_eq!(to_duration("5m"), Duration::from_secs(300));
        assert_eq!(to_duration("1h30m"), Duration::from_secs(5400));
        assert_eq!(to_duration("250ms"), Duration::from_millis(250));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from(Inner::default());
        assert_eq!(settings.broker.id, "geomq1");
        assert_eq!(settings.task.workers, 4);
        assert_eq!(settings.client.expiry, Duration::from_secs(300));
        assert!(settings.peers.is_empty());
        assert_eq!(settings.broker.to_area().expect("").geofence, Geofence::world());
    }

    #[test]
    fn test_fence_cfg_build() {
        let circle = FenceCfg::Circle { center: [52.0, 13.0], radius: 1_000.0 };
        assert!(matches!(circle.build().expect(""), Geofence::Circle { .. }));

        let bad_radius = FenceCfg::Circle { center: [52.0, 13.0], radius: -1.0 };
        assert!(bad_radius.build().is_err());

        let bad_center = FenceCfg::Circle { center: [952.0, 13.0], radius: 10.0 };
        assert!(bad_center.build().is_err());

        let triangle = FenceCfg::Polygon {
            vertices: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        };
        assert!(matches!(triangle.build().expect(""), Geofence::Polygon { .. }));

        let degenerate = FenceCfg::Polygon { vertices: vec![[0.0, 0.0], [1.0, 0.0]] };
        assert!(degenerate.build().is_err());
    }
}
