//! Protocol state machine and publish matching.
//!
//! [`MatchEngine::handle`] is the single entry point for decoded inbound
//! messages. It is synchronous and lock-light: all shared state lives in the
//! [`BrokerContext`], so any number of processors may call it concurrently.
//! The engine computes what must happen and hands it back as a
//! [`MatchOutcome`]; actually sending bytes is the transport's job.
//!
//! A publish reaches a local subscriber when all of the following hold:
//!   * the subscription topic equals the publish topic exactly,
//!   * the subscription geofence contains the publisher's location,
//!   * the publish geofence contains the subscriber's current location,
//!   * the subscription geofence intersects this broker's own area.
//!
//! A locally originated publish is additionally forwarded to every peer whose
//! area intersects the publish geofence. Forwarding is deliberately
//! conservative with overlapping areas: a subscriber reachable through two
//! brokers may receive the message twice, but never zero times. Publishes
//! arriving from a peer are matched locally and never forwarded again.

use crate::context::{BrokerContext, Stats};
use crate::error::GeomqError;
use crate::geometry::{Geofence, Location};
use crate::message::{ControlPacket, ForwardEnvelope, InboundMessage, Outbound};
use crate::topic::Topic;
use crate::types::*;

/// Everything the transport has to do in response to one inbound message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Reply packet for the sender, if one is due. Absent for DISCONNECT and
    /// for peer-forwarded publishes, which are never acknowledged.
    pub reply: Option<ControlPacket>,
    pub outbound: Vec<Outbound>,
}

impl MatchOutcome {
    #[inline]
    fn reply(packet: ControlPacket) -> Self {
        Self { reply: Some(packet), outbound: Vec::new() }
    }

    #[inline]
    fn silent() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct MatchEngine {
    cx: BrokerContext,
}

impl MatchEngine {
    pub fn new(cx: BrokerContext) -> Self {
        Self { cx }
    }

    /// Run one inbound message through the protocol state machine.
    pub fn handle(&self, msg: &InboundMessage) -> MatchOutcome {
        if let Err(e) = msg.validate() {
            Stats::incr(&self.cx.stats.protocol_errors);
            log::warn!("malformed message from `{}`: {:?}", msg.sender_client_id, e);
            if msg.from_peer {
                return MatchOutcome::silent();
            }
            return MatchOutcome::reply(ControlPacket::Disconnect {
                reason: ReasonCode::ProtocolError,
            });
        }

        match &msg.packet {
            ControlPacket::Connect { location } => self.connect(&msg.sender_client_id, location),
            ControlPacket::Disconnect { .. } => self.disconnect(&msg.sender_client_id),
            ControlPacket::PingReq { location } => self.ping(&msg.sender_client_id, location),
            ControlPacket::Subscribe { topic, geofence } => {
                self.subscribe(&msg.sender_client_id, topic, geofence)
            }
            ControlPacket::Unsubscribe { topic } => {
                self.unsubscribe(&msg.sender_client_id, topic)
            }
            ControlPacket::Publish { topic, geofence, payload } => {
                self.publish(msg, topic, geofence, payload)
            }
            // Reply packets travel broker-to-client only.
            _ => {
                Stats::incr(&self.cx.stats.protocol_errors);
                log::warn!(
                    "unexpected {:?} from `{}`",
                    msg.control_type,
                    msg.sender_client_id
                );
                MatchOutcome::reply(ControlPacket::Disconnect { reason: ReasonCode::ProtocolError })
            }
        }
    }

    /// CONNECT is only accepted when the client's location lies inside this
    /// broker's own area; otherwise the client is told which peer to try.
    fn connect(&self, client_id: &ClientId, location: &Location) -> MatchOutcome {
        if !self.cx.areas.is_responsible_for(location) {
            let responsible = self.cx.areas.other_broker_for(location).cloned();
            log::info!(
                "connect from `{client_id}` refused, location outside own area, redirect to {:?}",
                responsible.as_ref().map(|b| b.to_string())
            );
            return MatchOutcome::reply(ControlPacket::ConnAck {
                reason: ReasonCode::WrongBroker,
                responsible_broker: responsible,
            });
        }

        let is_new = self.cx.directory.create_or_update_client(client_id.clone(), *location);
        log::info!("client `{client_id}` connected, new={is_new}");
        MatchOutcome::reply(ControlPacket::ConnAck {
            reason: ReasonCode::Success,
            responsible_broker: None,
        })
    }

    /// DISCONNECT is not acknowledged; the session and all of its
    /// subscriptions are dropped. Unknown clients are ignored.
    fn disconnect(&self, client_id: &ClientId) -> MatchOutcome {
        if self.cx.directory.remove_client(client_id).is_some() {
            log::debug!("client `{client_id}` disconnected, {}", ReasonCode::NormalDisconnection);
        }
        MatchOutcome::silent()
    }

    /// PINGREQ doubles as the location update channel.
    fn ping(&self, client_id: &ClientId, location: &Location) -> MatchOutcome {
        match self.cx.directory.update_location(client_id, *location) {
            Ok(()) => {
                MatchOutcome::reply(ControlPacket::PingResp { reason: ReasonCode::LocationUpdated })
            }
            Err(GeomqError::NotConnected(_)) => {
                MatchOutcome::reply(ControlPacket::PingResp { reason: ReasonCode::NotConnected })
            }
            Err(e) => {
                log::error!("location update for `{client_id}` failed: {e:?}");
                MatchOutcome::reply(ControlPacket::PingResp { reason: ReasonCode::ProtocolError })
            }
        }
    }

    fn subscribe(&self, client_id: &ClientId, topic: &Topic, geofence: &Geofence) -> MatchOutcome {
        match self.cx.directory.put_subscription(client_id, topic.clone(), geofence.clone()) {
            Ok(seq) => {
                log::debug!("client `{client_id}` subscribed to `{topic}` (seq {seq})");
                MatchOutcome::reply(ControlPacket::SubAck { reason: ReasonCode::GrantedQoS0 })
            }
            Err(GeomqError::NotConnected(_)) => {
                MatchOutcome::reply(ControlPacket::SubAck { reason: ReasonCode::NotConnected })
            }
            Err(e) => {
                log::error!("subscribe for `{client_id}` failed: {e:?}");
                MatchOutcome::reply(ControlPacket::SubAck { reason: ReasonCode::ProtocolError })
            }
        }
    }

    /// UNSUBSCRIBE succeeds whether or not the subscription existed.
    fn unsubscribe(&self, client_id: &ClientId, topic: &Topic) -> MatchOutcome {
        if !self.cx.directory.is_client_connected(client_id) {
            return MatchOutcome::reply(ControlPacket::UnsubAck {
                reason: ReasonCode::NotConnected,
            });
        }
        self.cx.directory.remove_subscription(client_id, &topic.to_string());
        MatchOutcome::reply(ControlPacket::UnsubAck { reason: ReasonCode::Success })
    }

    fn publish(
        &self,
        msg: &InboundMessage,
        topic: &Topic,
        publish_fence: &Geofence,
        payload: &Payload,
    ) -> MatchOutcome {
        Stats::incr(&self.cx.stats.publishes);

        // Locally originated publishes need a connected sender whose stored
        // location drives the matching; forwarded ones carry the publisher's
        // location in the envelope.
        let publisher_location = if msg.from_peer {
            match msg.origin_location {
                Some(loc) => loc,
                // Unreachable past validate(), but never panic on peer input.
                None => return MatchOutcome::silent(),
            }
        } else {
            match self.cx.directory.location_of(&msg.sender_client_id) {
                Some(loc) => {
                    self.cx.directory.touch(&msg.sender_client_id);
                    loc
                }
                None => {
                    return MatchOutcome::reply(ControlPacket::PubAck {
                        reason: ReasonCode::NotConnected,
                    })
                }
            }
        };

        let topic_name = topic.to_string();
        let own_area = &self.cx.areas.own().geofence;
        let mut outbound = Vec::new();
        let mut delivered = 0usize;

        for sub in self.cx.index().find_matches(&topic_name, &publisher_location) {
            if !sub.geofence.intersects(own_area) {
                continue;
            }
            let subscriber_location = match self.cx.directory.location_of(&sub.client_id) {
                Some(loc) => loc,
                None => continue, // dropped between index lookup and now
            };
            if !publish_fence.contains(&subscriber_location) {
                continue;
            }
            outbound.push(Outbound::Delivery {
                target: sub.client_id.clone(),
                packet: ControlPacket::Publish {
                    topic: topic.clone(),
                    geofence: publish_fence.clone(),
                    payload: payload.clone(),
                },
            });
            delivered += 1;
        }
        Stats::add(&self.cx.stats.deliveries, delivered);

        let mut forwarded = 0usize;
        if !msg.from_peer {
            for peer in self.cx.areas.peers_for_geofence(publish_fence) {
                outbound.push(Outbound::PeerForward {
                    target: peer.clone(),
                    envelope: ForwardEnvelope {
                        origin_broker: self.cx.areas.own().info.id.clone(),
                        sender_client_id: msg.sender_client_id.clone(),
                        publisher_location,
                        packet: msg.packet.clone(),
                    },
                });
                forwarded += 1;
            }
            Stats::add(&self.cx.stats.forwards, forwarded);
        }

        log::debug!(
            "publish on `{topic_name}` from `{}`: {delivered} delivered, {forwarded} forwarded",
            msg.sender_client_id
        );

        let reply = if msg.from_peer {
            None
        } else {
            let reason = if delivered > 0 {
                ReasonCode::Success
            } else if forwarded > 0 {
                ReasonCode::NoMatchingSubscribersButForwarded
            } else {
                ReasonCode::NoMatchingSubscribers
            };
            Some(ControlPacket::PubAck { reason })
        };
        MatchOutcome { reply, outbound }
    }
}
