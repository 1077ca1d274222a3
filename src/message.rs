//! Control packet and message shapes exchanged with the transport layer.
//!
//! The core never touches raw bytes: the transport decodes frames into an
//! [`InboundMessage`] and frames whatever [`Outbound`] values the core hands
//! back. Each control packet kind carries exactly its required fields as one
//! variant of a tagged union; kind-to-shape compatibility is validated once
//! at the boundary via [`InboundMessage::validate`], not scattered through
//! the matching logic.

use serde::{Deserialize, Serialize};

use crate::area::BrokerInfo;
use crate::error::{GeomqError, Result};
use crate::geometry::{Geofence, Location};
use crate::topic::Topic;
use crate::types::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Connect,
    ConnAck,
    Disconnect,
    PingReq,
    PingResp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    Publish,
    PubAck,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlPacket {
    Connect {
        location: Location,
    },
    ConnAck {
        reason: ReasonCode,
        /// On `WrongBroker`, the peer believed responsible, if known, so the
        /// client wrapper can redirect.
        responsible_broker: Option<BrokerInfo>,
    },
    Disconnect {
        reason: ReasonCode,
    },
    PingReq {
        location: Location,
    },
    PingResp {
        reason: ReasonCode,
    },
    Subscribe {
        topic: Topic,
        geofence: Geofence,
    },
    SubAck {
        reason: ReasonCode,
    },
    Unsubscribe {
        topic: Topic,
    },
    UnsubAck {
        reason: ReasonCode,
    },
    Publish {
        topic: Topic,
        geofence: Geofence,
        payload: Payload,
    },
    PubAck {
        reason: ReasonCode,
    },
}

impl ControlPacket {
    pub fn control_type(&self) -> ControlType {
        match self {
            ControlPacket::Connect { .. } => ControlType::Connect,
            ControlPacket::ConnAck { .. } => ControlType::ConnAck,
            ControlPacket::Disconnect { .. } => ControlType::Disconnect,
            ControlPacket::PingReq { .. } => ControlType::PingReq,
            ControlPacket::PingResp { .. } => ControlType::PingResp,
            ControlPacket::Subscribe { .. } => ControlType::Subscribe,
            ControlPacket::SubAck { .. } => ControlType::SubAck,
            ControlPacket::Unsubscribe { .. } => ControlType::Unsubscribe,
            ControlPacket::UnsubAck { .. } => ControlType::UnsubAck,
            ControlPacket::Publish { .. } => ControlType::Publish,
            ControlPacket::PubAck { .. } => ControlType::PubAck,
        }
    }
}

/// A decoded inbound message as delivered by the transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender_client_id: ClientId,
    pub control_type: ControlType,
    pub packet: ControlPacket,
    /// Set when this message was forwarded by a peer broker; such messages
    /// are matched locally and never forwarded again.
    pub from_peer: bool,
    /// The publisher's location as seen by the origin broker; present only
    /// on peer-forwarded publishes.
    pub origin_location: Option<Location>,
}

impl InboundMessage {
    pub fn new(sender_client_id: ClientId, packet: ControlPacket) -> Self {
        Self {
            sender_client_id,
            control_type: packet.control_type(),
            packet,
            from_peer: false,
            origin_location: None,
        }
    }

    /// Fails when the declared control type does not match the payload shape
    /// or the carried geometry breaks its invariants. Transport-decoded
    /// locations and geofences bypass the validating constructors, so this is
    /// the gate; it runs before any directory mutation.
    pub fn validate(&self) -> Result<()> {
        if self.control_type != self.packet.control_type() {
            return Err(GeomqError::Protocol(format!(
                "payload shape {:?} is incompatible with control type {:?}",
                self.packet.control_type(),
                self.control_type
            )));
        }
        if self.from_peer && self.origin_location.is_none() {
            return Err(GeomqError::Protocol("peer-forwarded message without origin location".into()));
        }
        if let Some(loc) = &self.origin_location {
            loc.validate()?;
        }
        match &self.packet {
            ControlPacket::Connect { location } | ControlPacket::PingReq { location } => {
                location.validate()
            }
            ControlPacket::Subscribe { geofence, .. }
            | ControlPacket::Publish { geofence, .. } => geofence.validate(),
            _ => Ok(()),
        }
    }
}

/// Envelope for publishes forwarded between brokers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForwardEnvelope {
    pub origin_broker: BrokerId,
    pub sender_client_id: ClientId,
    pub publisher_location: Location,
    pub packet: ControlPacket,
}

impl ForwardEnvelope {
    #[inline]
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    #[inline]
    pub fn decode(data: &[u8]) -> Result<ForwardEnvelope> {
        Ok(bincode::deserialize::<ForwardEnvelope>(data)?)
    }

    /// The inbound message a receiving broker runs through its own matching,
    /// tagged so it is matched locally and never re-forwarded.
    pub fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            sender_client_id: self.sender_client_id,
            control_type: self.packet.control_type(),
            packet: self.packet,
            from_peer: true,
            origin_location: Some(self.publisher_location),
        }
    }
}

/// What the core hands back to the transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Frame and send `packet` to a locally attached client.
    Delivery { target: ClientId, packet: ControlPacket },
    /// Forward to a peer broker; best effort, failures are logged and never
    /// fail the originating publish.
    PeerForward { target: BrokerInfo, envelope: ForwardEnvelope },
}
