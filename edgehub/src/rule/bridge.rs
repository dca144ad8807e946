//! Static topic bridge with at least once delivery.

use std::sync::Arc;

use async_trait::async_trait;
use backoff::future::retry;
use tokio::sync::RwLock;

use crate::broker::Broker;
use crate::rule::{Deliver, Rule, RuleCore, RuleTx};
use crate::subscription::SinkSub;
use crate::trie::TopicTree;
use crate::types::{Message, QoS, RuleId, RULE_TOPIC};
use crate::Result;

/// Acknowledged sink. An at least once republish resolves only when the
/// broker durably accepted the message and is retried with the broker
/// strategy until then. At most once messages pass straight through.
struct AckedSink {
    broker: Arc<dyn Broker>,
}

#[async_trait]
impl Deliver for AckedSink {
    async fn deliver(&self, msg: Message) -> Result<()> {
        if msg.qos == QoS::AtMostOnce {
            return self.broker.republish(msg).await;
        }
        retry(self.broker.retry_strategy(), || async { Ok(self.broker.republish(msg.clone()).await?) })
            .await
    }
}

pub struct RuleTopic {
    core: RuleCore,
}

impl RuleTopic {
    pub(crate) fn new(broker: Arc<dyn Broker>, router: Arc<RwLock<TopicTree<SinkSub>>>) -> Self {
        let sink = Arc::new(AckedSink { broker: broker.clone() });
        Self { core: RuleCore::new(RuleId::from(RULE_TOPIC), broker, router, sink) }
    }
}

#[async_trait]
impl Rule for RuleTopic {
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

    use super::*;
    use crate::error::HubError;
    use crate::types::{Offset, SubId, TopicFilter, TopicName};

    /// Rejects the first `fail_first` republishes, accepts the rest.
    struct FlakyBroker {
        fail_first: usize,
        max_elapsed: Duration,
        attempts: AtomicUsize,
        accepted: RwLock<Vec<Message>>,
        offset: AtomicU64,
    }

    impl FlakyBroker {
        fn new(fail_first: usize, max_elapsed: Duration) -> Self {
            Self {
                fail_first,
                max_elapsed,
                attempts: AtomicUsize::new(0),
                accepted: RwLock::new(Vec::new()),
                offset: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        fn retry_strategy(&self) -> ExponentialBackoff {
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(1))
                .with_max_elapsed_time(Some(self.max_elapsed))
                .build()
        }

        async fn republish(&self, msg: Message) -> Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(HubError::Msg("broker unavailable".into()));
            }
            self.accepted.write().await.push(msg);
            Ok(())
        }

        fn persist_offset(&self, offset: Offset) {
            self.offset.store(offset, Ordering::SeqCst);
        }
    }

    fn sink_sub(rule: &RuleTopic, filter: &str, target: &str, qos: QoS) -> SinkSub {
        SinkSub::new(
            RuleId::from(RULE_TOPIC),
            SubId::from(target),
            QoS::AtLeastOnce,
            TopicFilter::from(filter),
            qos,
            TopicName::from(target),
            rule.channel(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_retry_until_accepted() {
        let broker = Arc::new(FlakyBroker::new(2, Duration::from_secs(5)));
        let router = Arc::new(RwLock::new(TopicTree::default()));
        let rule = RuleTopic::new(broker.clone(), router);

        rule.register(sink_sub(&rule, "sensor/+/temp", "bridge/temp", QoS::AtLeastOnce)).await.unwrap();
        rule.start().await.unwrap();

        rule.channel()
            .flow(Message::new("sensor/42/temp", QoS::AtLeastOnce, "21.5").with_offset(3))
            .unwrap();
        rule.stop();
        rule.wait(false).await;

        assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
        let accepted = broker.accepted.read().await;
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].topic, "bridge/temp");
        assert_eq!(accepted[0].qos, QoS::AtLeastOnce);
        assert_eq!(broker.offset.load(Ordering::SeqCst), 3);

        let info = rule.info();
        assert_eq!(info["delivers"], 1);
        assert_eq!(info["fails"], 0);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let broker = Arc::new(FlakyBroker::new(usize::MAX, Duration::from_millis(30)));
        let router = Arc::new(RwLock::new(TopicTree::default()));
        let rule = RuleTopic::new(broker.clone(), router);

        rule.register(sink_sub(&rule, "sensor/+/temp", "bridge/temp", QoS::AtLeastOnce)).await.unwrap();
        rule.start().await.unwrap();

        rule.channel()
            .flow(Message::new("sensor/42/temp", QoS::AtLeastOnce, "21.5").with_offset(8))
            .unwrap();
        rule.stop();
        rule.wait(false).await;

        assert!(broker.accepted.read().await.is_empty());
        assert_eq!(rule.info()["fails"], 1);
        // The source offset is consumed regardless, redelivery is the
        // broker's backstop.
        assert_eq!(broker.offset.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_at_most_once_no_retry() {
        let broker = Arc::new(FlakyBroker::new(1, Duration::from_secs(5)));
        let router = Arc::new(RwLock::new(TopicTree::default()));
        let rule = RuleTopic::new(broker.clone(), router);

        rule.register(sink_sub(&rule, "sensor/+/temp", "bridge/temp", QoS::AtMostOnce)).await.unwrap();
        rule.start().await.unwrap();

        rule.channel().flow(Message::new("sensor/42/temp", QoS::AtMostOnce, "21.5")).unwrap();
        rule.stop();
        rule.wait(false).await;

        assert_eq!(broker.attempts.load(Ordering::SeqCst), 1);
        assert!(broker.accepted.read().await.is_empty());
        assert_eq!(rule.info()["fails"], 1);
    }
}
