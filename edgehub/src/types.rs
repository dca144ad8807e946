use std::convert::TryFrom;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use edgehub_utils::{timestamp_millis, TimestampMillis};

use crate::error::HubError;

/// ahash-backed collections, used for all internal lookup tables.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

/// Topic a message was published to. Never contains wildcards.
pub type TopicName = ByteString;
/// Subscription pattern, may contain `+` and `#` wildcards.
pub type TopicFilter = ByteString;

pub type RuleId = ByteString;
pub type SubId = ByteString;

/// Durable position of a source message in the broker log.
pub type Offset = u64;

/// Uid of the shared QoS 0 fan-out rule.
pub const RULE_MSG_Q0: &str = "msgq0";
/// Uid of the static topic bridge rule.
pub const RULE_TOPIC: &str = "topic";

/// Quality of Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// At most once delivery
    ///
    /// The message arrives at the receiver either once or not at all.
    /// No acknowledgment is awaited and no retry is performed.
    AtMostOnce = 0,
    /// At least once delivery
    ///
    /// The publish resolves only after the broker durably accepts the
    /// message, and failed sends are retried.
    AtLeastOnce = 1,
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = HubError;

    #[inline]
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            _ => Err(HubError::Msg(format!("unsupported qos: {v}"))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(v: QoS) -> Self {
        v.value()
    }
}

/// A message moving through the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub topic: TopicName,
    pub qos: QoS,
    pub payload: Bytes,
    /// Durable offset of the source message, if the broker assigned one.
    /// QoS 0 ingress has no offset.
    pub offset: Option<Offset>,
    pub create_time: TimestampMillis,
}

impl Message {
    #[inline]
    pub fn new(topic: impl Into<TopicName>, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), qos, payload: payload.into(), offset: None, create_time: timestamp_millis() }
    }

    #[inline]
    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }
}
