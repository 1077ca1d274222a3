//! Message processor pool.
//!
//! A router task takes decoded inbound messages off one shared bounded
//! ingress queue and shards them to a fixed number of workers by sender
//! client id; each worker runs its messages through the [`MatchEngine`] and
//! pushes the resulting deliveries and peer forwards onto the egress channel
//! the transport drains. All messages from one client land on the same
//! worker queue, so per-client submission order is preserved while distinct
//! clients still process in parallel. There is no cross-client ordering.
//!
//! Shutdown is signalled through a watch channel observed between messages,
//! never by polling a flag in a busy loop. [`ProcessorPool::stop`] waits a
//! bounded grace period for in-flight work, then reports and aborts any
//! straggler.
//!
//! A separate timer task purges stale clients on its own cadence so expiry
//! work never rides the matching hot path.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::context::BrokerContext;
use crate::matching::MatchEngine;
use crate::message::{InboundMessage, Outbound};
use crate::types::*;

pub struct ProcessorPool {
    ingress_tx: mpsc::Sender<InboundMessage>,
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    purger: JoinHandle<()>,
}

impl ProcessorPool {
    /// Spawn the configured number of workers and the purge timer. The pool
    /// runs until [`stop`](Self::stop) is called or every ingress sender is
    /// dropped.
    pub fn start(cx: BrokerContext, egress_tx: mpsc::Sender<Outbound>) -> Self {
        let queue_max = cx.settings.task.queue_max;
        let (ingress_tx, ingress_rx) = mpsc::channel(queue_max);
        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = MatchEngine::new(cx.clone());

        let mut worker_txs = Vec::new();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        for i in 0..cx.settings.task.workers.max(1) {
            let (tx, rx) = mpsc::channel(queue_max);
            worker_txs.push(tx);
            workers.push(tokio::spawn(worker_loop(
                i,
                engine.clone(),
                rx,
                egress_tx.clone(),
                stop_rx.clone(),
            )));
        }
        workers.push(tokio::spawn(route_loop(worker_txs, ingress_rx, stop_rx.clone())));

        let purger = tokio::spawn(purge_loop(cx, stop_rx));

        Self { ingress_tx, stop_tx, workers, purger }
    }

    /// Handle the transport pushes inbound messages through.
    #[inline]
    pub fn sender(&self) -> mpsc::Sender<InboundMessage> {
        self.ingress_tx.clone()
    }

    /// Signal shutdown and wait up to `grace` for the workers to finish their
    /// in-flight message. Stragglers are logged and aborted. Returns true
    /// when everything stopped within the grace period.
    pub async fn stop(self, grace: Duration) -> bool {
        if self.stop_tx.send(true).is_err() {
            log::warn!("processors already stopped");
        }
        drop(self.ingress_tx);

        let mut tasks = self.workers;
        tasks.push(self.purger);
        let total = tasks.len();

        match tokio::time::timeout(grace, join_all(&mut tasks)).await {
            Ok(results) => {
                for r in results {
                    if let Err(e) = r {
                        log::error!("processor task failed: {e:?}");
                    }
                }
                log::info!("{total} processor task(s) stopped");
                true
            }
            Err(_) => {
                let stragglers = tasks.iter().filter(|t| !t.is_finished()).count();
                log::warn!(
                    "{stragglers} of {total} processor task(s) still running after {grace:?}, aborting"
                );
                for t in tasks {
                    t.abort();
                }
                false
            }
        }
    }
}

/// Shards inbound messages to the workers by sender client id, keeping each
/// client's messages on one queue and thus in submission order.
async fn route_loop(
    worker_txs: Vec<mpsc::Sender<InboundMessage>>,
    mut ingress_rx: mpsc::Receiver<InboundMessage>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let hasher = ahash::RandomState::new();
    loop {
        let msg = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            msg = ingress_rx.recv() => match msg {
                Some(msg) => msg,
                None => break, // every ingress sender dropped
            },
        };
        let i = (hasher.hash_one(&msg.sender_client_id) % worker_txs.len() as u64) as usize;
        if worker_txs[i].send(msg).await.is_err() {
            log::warn!("processor {i} queue closed, router exiting");
            break;
        }
    }
}

async fn worker_loop(
    id: usize,
    engine: MatchEngine,
    mut queue_rx: mpsc::Receiver<InboundMessage>,
    egress_tx: mpsc::Sender<Outbound>,
    mut stop_rx: watch::Receiver<bool>,
) {
    log::debug!("processor {id} started");
    loop {
        if *stop_rx.borrow() {
            break;
        }
        // The stop branch must win even while this worker is parked waiting
        // for the next message.
        let msg = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            msg = queue_rx.recv() => match msg {
                Some(msg) => msg,
                None => break, // router gone
            },
        };

        let outcome = engine.handle(&msg);
        if let Some(packet) = outcome.reply {
            let delivery = Outbound::Delivery { target: msg.sender_client_id.clone(), packet };
            if egress_tx.send(delivery).await.is_err() {
                log::warn!("egress channel closed, processor {id} exiting");
                return;
            }
        }
        for out in outcome.outbound {
            if egress_tx.send(out).await.is_err() {
                log::warn!("egress channel closed, processor {id} exiting");
                return;
            }
        }
    }
    log::debug!("processor {id} stopped");
}

async fn purge_loop(cx: BrokerContext, mut stop_rx: watch::Receiver<bool>) {
    let expiry = cx.settings.client.expiry;
    let mut ticker = tokio::time::interval(cx.settings.client.purge_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let purged = cx.directory.purge_stale(expiry, timestamp_millis());
                if !purged.is_empty() {
                    log::info!(
                        "purged {} stale client(s): {:?}",
                        purged.len(),
                        purged.iter().map(|c| c.id.to_string()).collect::<Vec<_>>()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geofence, Location};
    use crate::message::ControlPacket;
    use crate::settings::{FenceCfg, Inner, Settings};

    fn context(workers: usize, expiry: Duration, purge_interval: Duration) -> BrokerContext {
        let mut inner = Inner::default();
        inner.broker.area = FenceCfg::World;
        inner.task.workers = workers;
        inner.client.expiry = expiry;
        inner.client.purge_interval = purge_interval;
        BrokerContext::new(Settings::from(inner)).expect("")
    }

    fn berlin() -> Location {
        Location::new(52.52, 13.40).unwrap()
    }

    #[tokio::test]
    async fn test_connect_roundtrip_through_pool() {
        let cx = context(2, Duration::from_secs(300), Duration::from_secs(30));
        let (egress_tx, mut egress_rx) = mpsc::channel(16);
        let pool = ProcessorPool::start(cx, egress_tx);

        pool.sender()
            .send(InboundMessage::new(
                ClientId::from("c1"),
                ControlPacket::Connect { location: berlin() },
            ))
            .await
            .expect("");

        match egress_rx.recv().await.expect("reply") {
            Outbound::Delivery { target, packet } => {
                assert_eq!(target, "c1");
                assert_eq!(
                    packet,
                    ControlPacket::ConnAck {
                        reason: ReasonCode::Success,
                        responsible_broker: None
                    }
                );
            }
            other => panic!("expected Delivery, got {other:?}"),
        }

        assert!(pool.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    // One worker: "sub" and "pub" are distinct clients, and the publish must
    // not run before the subscription lands.
    async fn test_publish_fans_out_via_egress() {
        let cx = context(1, Duration::from_secs(300), Duration::from_secs(30));
        let (egress_tx, mut egress_rx) = mpsc::channel(16);
        let pool = ProcessorPool::start(cx, egress_tx);
        let tx = pool.sender();

        for (id, packet) in [
            ("sub", ControlPacket::Connect { location: berlin() }),
            ("sub", ControlPacket::Subscribe {
                topic: "t1".parse().expect(""),
                geofence: Geofence::world(),
            }),
            ("pub", ControlPacket::Connect { location: berlin() }),
            ("pub", ControlPacket::Publish {
                topic: "t1".parse().expect(""),
                geofence: Geofence::world(),
                payload: Payload::from_static(b"x"),
            }),
        ] {
            tx.send(InboundMessage::new(ClientId::from(id), packet)).await.expect("");
        }

        // ConnAck, SubAck, ConnAck, then the delivery and the PubAck.
        let mut delivered = false;
        let mut acked = false;
        for _ in 0..5 {
            match egress_rx.recv().await.expect("egress") {
                Outbound::Delivery { target, packet: ControlPacket::Publish { .. } } => {
                    assert_eq!(target, "sub");
                    delivered = true;
                }
                Outbound::Delivery { packet: ControlPacket::PubAck { reason }, .. } => {
                    assert_eq!(reason, ReasonCode::Success);
                    acked = true;
                }
                _ => {}
            }
        }
        assert!(delivered && acked);

        assert!(pool.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_per_client_order_preserved_across_workers() {
        let cx = context(4, Duration::from_secs(300), Duration::from_secs(30));
        let (egress_tx, mut egress_rx) = mpsc::channel(16);
        let pool = ProcessorPool::start(cx, egress_tx);
        let tx = pool.sender();

        // Same client throughout: the replies must come back in submission
        // order even with several workers, or the later operations would see
        // a not-yet-connected client.
        for packet in [
            ControlPacket::Connect { location: berlin() },
            ControlPacket::Subscribe {
                topic: "t1".parse().expect(""),
                geofence: Geofence::world(),
            },
            ControlPacket::Unsubscribe { topic: "t1".parse().expect("") },
        ] {
            tx.send(InboundMessage::new(ClientId::from("c1"), packet)).await.expect("");
        }

        let mut replies = Vec::new();
        for _ in 0..3 {
            match egress_rx.recv().await.expect("egress") {
                Outbound::Delivery { target, packet } => {
                    assert_eq!(target, "c1");
                    replies.push(packet);
                }
                other => panic!("expected Delivery, got {other:?}"),
            }
        }
        assert_eq!(
            replies,
            vec![
                ControlPacket::ConnAck { reason: ReasonCode::Success, responsible_broker: None },
                ControlPacket::SubAck { reason: ReasonCode::GrantedQoS0 },
                ControlPacket::UnsubAck { reason: ReasonCode::Success },
            ]
        );

        assert!(pool.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_is_prompt_when_idle() {
        let cx = context(4, Duration::from_secs(300), Duration::from_secs(30));
        let (egress_tx, _egress_rx) = mpsc::channel(16);
        let pool = ProcessorPool::start(cx, egress_tx);

        let started = std::time::Instant::now();
        assert!(pool.stop(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_purge_timer_removes_stale_clients() {
        let cx = context(2, Duration::from_millis(20), Duration::from_millis(20));
        let (egress_tx, mut egress_rx) = mpsc::channel(16);
        let pool = ProcessorPool::start(cx.clone(), egress_tx);

        pool.sender()
            .send(InboundMessage::new(
                ClientId::from("c1"),
                ControlPacket::Connect { location: berlin() },
            ))
            .await
            .expect("");
        let _ = egress_rx.recv().await;
        assert!(cx.directory.is_client_connected("c1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cx.directory.is_client_connected("c1"));

        assert!(pool.stop(Duration::from_secs(1)).await);
    }
}
