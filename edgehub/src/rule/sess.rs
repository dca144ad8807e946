//! Per session rules.
//!
//! A session rule delivers matched messages straight to the owning client
//! connection through delegates supplied by the connection layer.

use std::sync::Arc;

use async_trait::async_trait;
use backoff::future::retry;
use tokio::sync::RwLock;

use crate::broker::Broker;
use crate::rule::{Deliver, DeliverRef, Rule, RuleCore, RuleTx};
use crate::subscription::SinkSub;
use crate::trie::TopicTree;
use crate::types::{Message, QoS, RuleId};
use crate::Result;

/// Session sink. Messages go to the publish delegate. When that fails for
/// an at least once message of a persistent session the republish delegate
/// takes over under the broker retry strategy, transient sessions drop the
/// message instead.
struct SessionSink {
    broker: Arc<dyn Broker>,
    persistent: bool,
    publish: DeliverRef,
    republish: DeliverRef,
}

#[async_trait]
impl Deliver for SessionSink {
    async fn deliver(&self, msg: Message) -> Result<()> {
        match self.publish.deliver(msg.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.persistent && msg.qos == QoS::AtLeastOnce {
                    log::debug!("session publish failed, redelivering, {:?}", e);
                    retry(self.broker.retry_strategy(), || async {
                        Ok(self.republish.deliver(msg.clone()).await?)
                    })
                    .await
                } else {
                    Err(e)
                }
            }
        }
    }
}

pub struct RuleSess {
    core: RuleCore,
    persistent: bool,
}

impl RuleSess {
    pub(crate) fn new(
        uid: RuleId,
        persistent: bool,
        broker: Arc<dyn Broker>,
        router: Arc<RwLock<TopicTree<SinkSub>>>,
        publish: DeliverRef,
        republish: DeliverRef,
    ) -> Self {
        let sink = Arc::new(SessionSink { broker: broker.clone(), persistent, publish, republish });
        Self { core: RuleCore::new(uid, broker, router, sink), persistent }
    }
}

#[async_trait]
impl Rule for RuleSess {
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
        let mut info = self.core.info();
        if let Some(obj) = info.as_object_mut() {
            obj.insert("persistent".into(), self.persistent.into());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use backoff::ExponentialBackoffBuilder;

    use super::*;
    use crate::broker::DefaultBroker;
    use crate::error::HubError;
    use crate::types::{SubId, TopicFilter, TopicName};

    /// Rejects the first `fail_first` deliveries, accepts the rest.
    struct FlakyDeliver {
        fail_first: usize,
        hits: AtomicUsize,
    }

    impl FlakyDeliver {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self { fail_first, hits: AtomicUsize::new(0) })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Deliver for FlakyDeliver {
        async fn deliver(&self, _msg: Message) -> Result<()> {
            if self.hits.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(HubError::Msg("connection lost".into()));
            }
            Ok(())
        }
    }

    fn fast_broker() -> Arc<DefaultBroker> {
        Arc::new(
            DefaultBroker::new().with_retry_strategy(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(Duration::from_millis(1))
                    .with_max_elapsed_time(Some(Duration::from_millis(100)))
                    .build(),
            ),
        )
    }

    fn session_sink(persistent: bool, publish: DeliverRef, republish: DeliverRef) -> SessionSink {
        SessionSink { broker: fast_broker(), persistent, publish, republish }
    }

    #[tokio::test]
    async fn test_persistent_redelivery() {
        let publish = FlakyDeliver::new(usize::MAX);
        let republish = FlakyDeliver::new(2);
        let sink = session_sink(true, publish.clone(), republish.clone());

        sink.deliver(Message::new("chat/in", QoS::AtLeastOnce, "hi")).await.unwrap();
        assert_eq!(publish.hits(), 1);
        assert_eq!(republish.hits(), 3);
    }

    #[tokio::test]
    async fn test_transient_drop() {
        let publish = FlakyDeliver::new(usize::MAX);
        let republish = FlakyDeliver::new(0);
        let sink = session_sink(false, publish.clone(), republish.clone());

        assert!(sink.deliver(Message::new("chat/in", QoS::AtLeastOnce, "hi")).await.is_err());
        assert_eq!(publish.hits(), 1);
        assert_eq!(republish.hits(), 0);
    }

    #[tokio::test]
    async fn test_at_most_once_no_redelivery() {
        let publish = FlakyDeliver::new(usize::MAX);
        let republish = FlakyDeliver::new(0);
        let sink = session_sink(true, publish.clone(), republish.clone());

        assert!(sink.deliver(Message::new("chat/in", QoS::AtMostOnce, "hi")).await.is_err());
        assert_eq!(republish.hits(), 0);
    }

    #[tokio::test]
    async fn test_session_rule_flow() {
        let broker = fast_broker();
        let router = Arc::new(RwLock::new(TopicTree::default()));
        let publish = FlakyDeliver::new(0);
        let republish = FlakyDeliver::new(0);
        let rule = RuleSess::new(
            RuleId::from("client-1"),
            true,
            broker,
            router,
            publish.clone(),
            republish.clone(),
        );

        rule.register(
            SinkSub::new(
                RuleId::from("client-1"),
                SubId::from("client-1"),
                QoS::AtLeastOnce,
                TopicFilter::from("chat/+"),
                QoS::AtLeastOnce,
                TopicName::from("chat/out"),
                rule.channel(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        rule.start().await.unwrap();
        rule.channel().flow(Message::new("chat/42", QoS::AtLeastOnce, "hi").with_offset(5)).unwrap();
        rule.stop();
        rule.wait(false).await;

        assert_eq!(publish.hits(), 1);
        assert_eq!(republish.hits(), 0);

        let info = rule.info();
        assert_eq!(info["delivers"], 1);
        assert_eq!(info["persistent"], true);
        assert_eq!(info["status"], "stopped");
    }
}
