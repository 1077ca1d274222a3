#![deny(unsafe_code)]

//! Geo-context-aware publish/subscribe broker core.
//!
//! Clients connect with a physical location, subscribe to topics bounded by a
//! geofence, and publish messages bounded by a geofence. A message reaches a
//! subscriber only when the topic matches, the subscriber's current location
//! lies inside the publish geofence, and the subscription geofence intersects
//! this broker's area of responsibility. Brokers partition the world into
//! (possibly overlapping) responsibility areas and forward publishes to the
//! peers whose areas the publish geofence touches.
//!
//! The crate owns the in-memory matching and distribution engine only. Socket
//! framing, byte-level codecs and process bootstrap live outside and exchange
//! the message shapes from [`message`] with the core.
//!
//! # Overall Example
//! ```rust,no_run
//! use tokio::sync::mpsc;
//!
//! use geomq::context::BrokerContext;
//! use geomq::processor::ProcessorPool;
//! use geomq::settings::Settings;
//! use geomq::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::load(None)?;
//!     let cx = BrokerContext::new(settings)?;
//!
//!     let (egress_tx, _egress_rx) = mpsc::channel(10_000);
//!     let pool = ProcessorPool::start(cx, egress_tx);
//!     let _ingress = pool.sender();
//!
//!     // Hand `_ingress` to the transport layer; decoded inbound messages are
//!     // pushed there, outbound deliveries and peer forwards appear on
//!     // `_egress_rx`.
//!     Ok(())
//! }
//! ```

/// Core Broker Components
pub mod area; // Broker responsibility areas and peer directory
pub mod context; // Shared execution context
pub mod directory; // Connected client registry
pub mod error; // Error taxonomy
pub mod geometry; // Locations and geofence predicates
pub mod matching; // Protocol state machine
pub mod message; // Control packet and message shapes
pub mod processor; // Message processor pool
pub mod settings; // Static configuration
pub mod subscription; // Topic-first subscription index
pub mod topic; // Topic parsing and matching
pub mod types; // Common type aliases

pub use error::{GeomqError, Result};
