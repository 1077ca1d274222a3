use serde::{Deserialize, Serialize};

pub type ClientId = bytestring::ByteString;
pub type BrokerId = bytestring::ByteString;
pub type Addr = bytestring::ByteString;
pub type Port = u16;
pub type TopicName = bytestring::ByteString;
pub type Payload = bytes::Bytes;

/// Per-client monotonic subscription sequence number, starting at 1.
pub type SubscriptionSeq = u64;
pub type SubscriptionId = (ClientId, SubscriptionSeq);

pub type TimestampMillis = i64;
pub type IsNewConnection = bool;

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    chrono::Local::now().timestamp_millis()
}

/// Reason codes attached to reply packets.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReasonCode {
    Success,
    NoMatchingSubscribers,
    NoMatchingSubscribersButForwarded,
    LocationUpdated,
    NotConnected,
    WrongBroker,
    GrantedQoS0,
    NormalDisconnection,
    ProtocolError,
}

impl ReasonCode {
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ReasonCode::NotConnected | ReasonCode::WrongBroker | ReasonCode::ProtocolError)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
