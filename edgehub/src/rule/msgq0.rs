//! Shared fan-out rule for QoS 0 traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::broker::Broker;
use crate::rule::{Deliver, Rule, RuleCore, RuleTx};
use crate::subscription::SinkSub;
use crate::trie::TopicTree;
use crate::types::{Message, RuleId, RULE_MSG_Q0};
use crate::Result;

/// Fire and forget sink. A failed republish is dropped after the worker
/// logged and counted it, there is nothing to wait for at most once.
struct BestEffortSink {
    broker: Arc<dyn Broker>,
}

#[async_trait]
impl Deliver for BestEffortSink {
    async fn deliver(&self, msg: Message) -> Result<()> {
        self.broker.republish(msg).await
    }
}

pub struct RuleMsgQ0 {
    core: RuleCore,
}

impl RuleMsgQ0 {
    pub(crate) fn new(broker: Arc<dyn Broker>, router: Arc<RwLock<TopicTree<SinkSub>>>) -> Self {
        let sink = Arc::new(BestEffortSink { broker: broker.clone() });
        Self { core: RuleCore::new(RuleId::from(RULE_MSG_Q0), broker, router, sink) }
    }
}

#[async_trait]
impl Rule for RuleMsgQ0 {
    fn uid(&self) -> &str {
        self.core.uid()
    }

    async fn start(&self) -> Result<()> {
        self.core.start().await
    }

    fn stop(&self) {
        self.core.stop();
    }

    async fn wait(&self, force: bool) {
        self.core.wait(force).await;
    }

    fn channel(&self) -> RuleTx {
        self.core.channel()
    }

    async fn register(&self, sub: SinkSub) -> Result<()> {
        self.core.register(sub).await
    }

    async fn remove(&self, id: &str, topic: &str) -> Result<()> {
        self.core.remove(id, topic).await
    }

    fn info(&self) -> serde_json::Value {
        self.core.info()
    }
}
