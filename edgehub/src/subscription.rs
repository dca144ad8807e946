use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::HubError;
use crate::rule::RuleTx;
use crate::topic::Topic;
use crate::types::{Message, QoS, RuleId, SubId, TopicFilter, TopicName};
use crate::Result;

/// Binding of a source pattern to a republish target, owned by one rule.
///
/// Identity is (rule, id, filter). Registering a second binding with the
/// same identity replaces the previous target.
#[derive(Clone)]
pub struct SinkSub {
    inner: Arc<SinkSubInner>,
}

pub struct SinkSubInner {
    pub rule: RuleId,
    pub id: SubId,
    pub qos: QoS,
    pub filter: TopicFilter,
    pub topic: Topic,
    pub target_qos: QoS,
    pub target_topic: TopicName,
    tx: RuleTx,
}

impl SinkSub {
    pub(crate) fn new(
        rule: RuleId,
        id: SubId,
        qos: QoS,
        filter: TopicFilter,
        target_qos: QoS,
        target_topic: TopicName,
        tx: RuleTx,
    ) -> Result<Self> {
        let topic = Topic::from_str(filter.as_ref())?;
        let target = Topic::from_str(target_topic.as_ref())?;
        if target.has_wildcards() {
            return Err(HubError::Msg(format!("target topic ({}) contains wildcards", target_topic)));
        }
        Ok(Self {
            inner: Arc::new(SinkSubInner { rule, id, qos, filter, topic, target_qos, target_topic, tx }),
        })
    }

    /// Clone of `msg` addressed to the target topic at the target QoS.
    /// The source offset does not travel across the remap, it is persisted
    /// by the matching rule once fan-out completes.
    #[inline]
    pub(crate) fn remap(&self, msg: &Message) -> Message {
        Message {
            topic: self.target_topic.clone(),
            qos: self.target_qos,
            payload: msg.payload.clone(),
            offset: None,
            create_time: msg.create_time,
        }
    }

    /// Hands a remapped message to the owning rule's channel.
    #[inline]
    pub(crate) fn sink(&self, msg: Message) -> Result<()> {
        self.tx.sink(msg)
    }
}

impl Deref for SinkSub {
    type Target = SinkSubInner;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl PartialEq for SinkSub {
    fn eq(&self, other: &Self) -> bool {
        self.rule == other.rule && self.id == other.id && self.filter == other.filter
    }
}

impl Eq for SinkSub {}

impl Hash for SinkSub {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule.hash(state);
        self.id.hash(state);
        self.filter.hash(state);
    }
}

impl fmt::Debug for SinkSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SinkSub {{ rule: {}, id: {}, source: {}({}), target: {}({}) }}",
            self.rule,
            self.id,
            self.filter,
            self.qos.value(),
            self.target_topic,
            self.target_qos.value()
        )
    }
}
