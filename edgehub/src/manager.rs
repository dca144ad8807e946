//! Rule manager.
//!
//! Owns the rule registry, the shared pattern tree and the periodic stats
//! reporting task. The managed lifecycle is initial, started, closed, is
//! driven by compare and swap and never moves backwards.

use std::convert::TryFrom;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use edgehub_conf::Subscription;

use crate::broker::Broker;
use crate::error::HubError;
use crate::rule::bridge::RuleTopic;
use crate::rule::msgq0::RuleMsgQ0;
use crate::rule::sess::RuleSess;
use crate::rule::{DeliverRef, Rule, RuleTx};
use crate::subscription::SinkSub;
use crate::trie::TopicTree;
use crate::types::{DashMap, QoS, RuleId, SubId, TopicFilter, TopicName, RULE_MSG_Q0, RULE_TOPIC};
use crate::Result;

/// Report callback, receives the stats payload on every report tick.
pub type ReportFn = Arc<dyn Fn(serde_json::Value) -> Result<()> + Send + Sync>;

const INITIAL: u8 = 0;
const STARTED: u8 = 1;
const CLOSED: u8 = 2;

/// Floor for the report cadence, a zero interval would spin.
const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(10);

struct StateFlag(AtomicU8);

impl StateFlag {
    #[inline]
    fn get(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    #[inline]
    fn cas(&self, from: u8, to: u8) -> bool {
        self.0.compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

#[derive(Clone)]
pub struct RuleManager {
    inner: Arc<RuleManagerInner>,
}

impl Deref for RuleManager {
    type Target = RuleManagerInner;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

pub struct RuleManagerInner {
    state: StateFlag,
    broker: Arc<dyn Broker>,
    router: Arc<RwLock<TopicTree<SinkSub>>>,
    rules: DashMap<RuleId, Arc<dyn Rule>>,
    token: CancellationToken,
    report_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RuleManager {
    /// Build a manager holding the two built-in rules, with the static
    /// bridge bindings from `subscriptions` already registered. Any bad
    /// binding fails the whole construction. The stats reporting task only
    /// runs when a report callback is given.
    pub async fn new(
        subscriptions: &[Subscription],
        broker: Arc<dyn Broker>,
        report: Option<ReportFn>,
    ) -> Result<Self> {
        let router = Arc::new(RwLock::new(TopicTree::default()));
        let rules: DashMap<RuleId, Arc<dyn Rule>> = DashMap::default();
        rules.insert(RuleId::from(RULE_MSG_Q0), Arc::new(RuleMsgQ0::new(broker.clone(), router.clone())));
        rules.insert(RuleId::from(RULE_TOPIC), Arc::new(RuleTopic::new(broker.clone(), router.clone())));

        let mgr = Self {
            inner: Arc::new(RuleManagerInner {
                state: StateFlag(AtomicU8::new(INITIAL)),
                broker,
                router,
                rules,
                token: CancellationToken::new(),
                report_handle: Mutex::new(None),
            }),
        };

        for sub in subscriptions {
            if let Err(e) = mgr.add_static_sub(sub).await {
                return Err(HubError::Msg(format!("failed to add subscription ({:?}), {}", sub.source, e)));
            }
        }

        if let Some(report) = report {
            let handle = tokio::spawn(reporting(mgr.inner.clone(), report));
            mgr.report_handle.lock().await.replace(handle);
        }

        Ok(mgr)
    }

    /// Static bridge bindings use the target topic as subscription id, so
    /// they can later be removed by target identity.
    async fn add_static_sub(&self, sub: &Subscription) -> Result<()> {
        let source_qos = QoS::try_from(sub.source.qos)?;
        let target_qos = QoS::try_from(sub.target.qos)?;
        self.add_sink_sub(RULE_TOPIC, &sub.target.topic, source_qos, &sub.source.topic, target_qos, &sub.target.topic)
            .await
    }

    /// Activate every registered rule. Idempotent, later calls return
    /// without touching the rules. A rule that fails to start is logged
    /// and skipped, the rest still comes up.
    pub async fn start(&self) {
        if !self.state.cas(INITIAL, STARTED) {
            return;
        }
        for rule in self.all_rules() {
            if let Err(e) = rule.start().await {
                log::warn!("failed to start rule ({}), {:?}", rule.uid(), e);
            }
        }
    }

    /// Close is terminal and idempotent.
    ///
    /// The reporting task goes down first, then every rule channel closes
    /// and drains gracefully, finally the broker flushes its offset queue.
    pub async fn close(&self) {
        if !(self.state.cas(STARTED, CLOSED) || self.state.cas(INITIAL, CLOSED)) {
            return;
        }
        log::info!("rule manager closing");
        self.token.cancel();
        if let Some(handle) = self.report_handle.lock().await.take() {
            let _ = handle.await;
        }
        let rules = self.all_rules();
        for rule in rules.iter() {
            rule.stop();
        }
        for rule in rules.iter() {
            rule.wait(false).await;
        }
        self.broker.wait_offset_persisted().await;
        log::info!("rule manager closed, remaining offsets: {}", self.broker.offset_chan_len());
    }

    /// Activate one rule. Before the bulk `start` this records nothing and
    /// succeeds, the rule comes up with the manager.
    pub async fn start_rule(&self, id: &str) -> Result<()> {
        match self.state.get() {
            CLOSED => Err(HubError::ManagerClosed),
            INITIAL => Ok(()),
            _ => self.rule(id)?.start().await,
        }
    }

    /// Detach a rule and force its worker down, abandoning whatever is
    /// still queued. Unknown ids are a no-op.
    pub async fn remove_rule(&self, id: &str) -> Result<()> {
        if self.state.get() == CLOSED {
            return Err(HubError::ManagerClosed);
        }
        if let Some((_, rule)) = self.rules.remove(id) {
            rule.stop();
            rule.wait(true).await;
        }
        Ok(())
    }

    /// Register a session rule. The caller starts it with `start_rule`
    /// once its subscriptions are in place.
    pub fn add_rule_sess(
        &self,
        id: &str,
        persistent: bool,
        publish: DeliverRef,
        republish: DeliverRef,
    ) -> Result<()> {
        if self.state.get() == CLOSED {
            return Err(HubError::ManagerClosed);
        }
        match self.rules.entry(RuleId::from(id)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HubError::RuleExists(id.into())),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(RuleSess::new(
                    RuleId::from(id),
                    persistent,
                    self.broker.clone(),
                    self.router.clone(),
                    publish,
                    republish,
                )));
                Ok(())
            }
        }
    }

    /// Bind a source pattern to a republish target under the rule named by
    /// `rule_id`.
    pub async fn add_sink_sub(
        &self,
        rule_id: &str,
        sub_id: &str,
        source_qos: QoS,
        source_topic: &str,
        target_qos: QoS,
        target_topic: &str,
    ) -> Result<()> {
        if self.state.get() == CLOSED {
            return Err(HubError::ManagerClosed);
        }
        let rule = self.rule(rule_id)?;
        let sub = SinkSub::new(
            RuleId::from(rule_id),
            SubId::from(sub_id),
            source_qos,
            TopicFilter::from(source_topic),
            target_qos,
            TopicName::from(target_topic),
            rule.channel(),
        )?;
        rule.register(sub).await
    }

    /// Drop the binding of rule `id` whose subscription id equals `id`,
    /// for the given source pattern. Session subscriptions and static
    /// bridge bindings are both keyed this way.
    pub async fn remove_sink_sub(&self, id: &str, topic: &str) -> Result<()> {
        if self.state.get() == CLOSED {
            return Err(HubError::ManagerClosed);
        }
        self.rule(id)?.remove(id, topic).await
    }

    /// Ingress handle of one rule, for the hosting transport.
    pub fn channel(&self, id: &str) -> Result<RuleTx> {
        Ok(self.rule(id)?.channel())
    }

    fn rule(&self, id: &str) -> Result<Arc<dyn Rule>> {
        self.rules.get(id).map(|entry| entry.value().clone()).ok_or_else(|| HubError::RuleNotFound(id.into()))
    }

    fn all_rules(&self) -> Vec<Arc<dyn Rule>> {
        self.rules.iter().map(|entry| entry.value().clone()).collect()
    }
}

async fn reporting(inner: Arc<RuleManagerInner>, report: ReportFn) {
    let mut interval = inner.broker.report_interval();
    if interval < MIN_REPORT_INTERVAL {
        interval = MIN_REPORT_INTERVAL;
    }
    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let rules: Vec<Arc<dyn Rule>> =
                    inner.rules.iter().map(|entry| entry.value().clone()).collect();
                let mut rule_stats = serde_json::Map::new();
                for rule in rules.iter() {
                    rule_stats.insert(rule.uid().into(), rule.info());
                }
                let stats = json!({
                    "rule_count": rules.len(),
                    "rule_stats": rule_stats,
                });
                log::debug!("rule stats: {}", stats);
                if let Err(e) = report(stats) {
                    log::warn!("failed to report rule stats, {:?}", e);
                }
            }
        }
    }
    log::debug!("rule stats reporting task stopped");
}
