//! Routing rules.
//!
//! Every rule owns an unbounded channel and one dispatch worker. Source
//! messages entering through `RuleTx::flow` are matched against the shared
//! pattern tree, remapped per matching sink subscription and emitted. A
//! match owned by another rule is handed over to that rule's channel
//! instead, so delivery always runs under the owning rule's sink policy.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::HubError;
use crate::stats::RuleStats;
use crate::subscription::SinkSub;
use crate::topic::Topic;
use crate::trie::TopicTree;
use crate::types::{DashMap, Message, RuleId, SubId, TopicFilter};
use crate::Result;

pub mod bridge;
pub mod msgq0;
pub mod sess;

pub type Tx = mpsc::UnboundedSender<RuleInput>;
pub type Rx = mpsc::UnboundedReceiver<RuleInput>;

/// Work item in a rule channel.
#[derive(Debug)]
pub enum RuleInput {
    /// Source message to match against the shared pattern tree.
    Flow(Message),
    /// Remapped message to emit through this rule's sink.
    Sink(Message),
}

/// Sending half of a rule channel. Cheap to clone and safe to hold after
/// the rule stopped, sends simply fail from then on.
#[derive(Clone)]
pub struct RuleTx {
    tx: Tx,
    stats: Arc<RuleStats>,
}

impl RuleTx {
    pub(crate) fn new(tx: Tx, stats: Arc<RuleStats>) -> Self {
        Self { tx, stats }
    }

    /// Queue a source message for pattern matching.
    #[inline]
    pub fn flow(&self, msg: Message) -> Result<()> {
        self.send(RuleInput::Flow(msg))
    }

    /// Queue a remapped message for emission.
    #[inline]
    pub(crate) fn sink(&self, msg: Message) -> Result<()> {
        self.send(RuleInput::Sink(msg))
    }

    #[inline]
    fn send(&self, input: RuleInput) -> Result<()> {
        self.stats.queue.inc();
        if let Err(e) = self.tx.unbounded_send(input) {
            self.stats.queue.dec();
            return Err(HubError::Msg(format!("rule channel closed, dropping {:?}", e.into_inner())));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn close(&self) {
        self.tx.close_channel();
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Worker lifecycle, only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Idle,
    Running,
    Stopped,
}

impl RuleStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Idle => "idle",
            RuleStatus::Running => "running",
            RuleStatus::Stopped => "stopped",
        }
    }
}

struct StatusFlag(AtomicU8);

impl StatusFlag {
    fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    #[inline]
    fn get(&self) -> RuleStatus {
        match self.0.load(Ordering::SeqCst) {
            RUNNING => RuleStatus::Running,
            STOPPED => RuleStatus::Stopped,
            _ => RuleStatus::Idle,
        }
    }

    #[inline]
    fn cas(&self, from: u8, to: u8) -> bool {
        self.0.compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    #[inline]
    fn set(&self, to: u8) {
        self.0.store(to, Ordering::SeqCst);
    }
}

/// Common contract of the rule variants held in the manager registry.
#[async_trait]
pub trait Rule: Sync + Send {
    fn uid(&self) -> &str;

    /// Launch the dispatch worker. Fails when the rule is already running
    /// or was stopped.
    async fn start(&self) -> Result<()>;

    /// Stop accepting new inputs. Non blocking, queued inputs still drain
    /// unless the following `wait` forces shutdown.
    fn stop(&self);

    /// Resolve once the worker exited. `force` abandons queued inputs and
    /// drops the rule's bindings from the shared pattern tree.
    async fn wait(&self, force: bool);

    fn channel(&self) -> RuleTx;

    /// Bind a sink subscription under this rule. A binding with the same
    /// id and source pattern is replaced.
    async fn register(&self, sub: SinkSub) -> Result<()>;

    /// Unbind by subscription id and source pattern, a no-op for unknown
    /// pairs.
    async fn remove(&self, id: &str, topic: &str) -> Result<()>;

    /// Counter snapshot for the reporting task. Safe to call while the
    /// worker runs.
    fn info(&self) -> serde_json::Value;
}

/// Emission policy of a rule sink.
#[async_trait]
pub trait Deliver: Sync + Send {
    async fn deliver(&self, msg: Message) -> Result<()>;
}

pub type DeliverRef = Arc<dyn Deliver>;

/// State shared by every rule variant.
pub(crate) struct RuleCore {
    uid: RuleId,
    broker: Arc<dyn Broker>,
    router: Arc<RwLock<TopicTree<SinkSub>>>,
    subs: DashMap<(SubId, TopicFilter), SinkSub>,
    sink: DeliverRef,
    stats: Arc<RuleStats>,
    tx: RuleTx,
    rx: Mutex<Option<Rx>>,
    status: StatusFlag,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RuleCore {
    pub(crate) fn new(
        uid: RuleId,
        broker: Arc<dyn Broker>,
        router: Arc<RwLock<TopicTree<SinkSub>>>,
        sink: DeliverRef,
    ) -> Self {
        let stats = Arc::new(RuleStats::default());
        let (tx, rx) = mpsc::unbounded();
        Self {
            uid,
            broker,
            router,
            subs: DashMap::default(),
            sink,
            stats: stats.clone(),
            tx: RuleTx::new(tx, stats),
            rx: Mutex::new(Some(rx)),
            status: StatusFlag::new(),
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn uid(&self) -> &str {
        self.uid.as_ref()
    }

    pub(crate) async fn start(&self) -> Result<()> {
        if !self.status.cas(IDLE, RUNNING) {
            return match self.status.get() {
                RuleStatus::Running => Err(HubError::Msg(format!("rule ({}) already started", self.uid))),
                _ => Err(HubError::Msg(format!("rule ({}) is stopped", self.uid))),
            };
        }
        let rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => return Err(HubError::Msg(format!("rule ({}) channel already consumed", self.uid))),
        };
        let worker = DispatchWorker {
            uid: self.uid.clone(),
            broker: self.broker.clone(),
            router: self.router.clone(),
            sink: self.sink.clone(),
            stats: self.stats.clone(),
            token: self.token.clone(),
        };
        self.handle.lock().await.replace(tokio::spawn(worker.run(rx)));
        log::debug!("rule ({}) started", self.uid);
        Ok(())
    }

    pub(crate) fn stop(&self) {
        // Closing the channel lets the worker drain what is already queued.
        self.tx.close();
        self.status.set(STOPPED);
    }

    pub(crate) async fn wait(&self, force: bool) {
        if force {
            self.token.cancel();
        }
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("rule ({}) worker terminated abnormally, {:?}", self.uid, e);
            }
        }
        if force {
            self.clear().await;
        }
    }

    /// Drop every binding of this rule from the shared pattern tree.
    async fn clear(&self) {
        let mut router = self.router.write().await;
        for entry in self.subs.iter() {
            router.remove(&entry.value().topic, entry.value());
        }
        self.subs.clear();
    }

    #[inline]
    pub(crate) fn channel(&self) -> RuleTx {
        self.tx.clone()
    }

    pub(crate) async fn register(&self, sub: SinkSub) -> Result<()> {
        let topic = sub.topic.clone();
        // One write lock covers the map and the tree so a replaced binding
        // never coexists with its successor.
        let mut router = self.router.write().await;
        self.subs.insert((sub.id.clone(), sub.filter.clone()), sub.clone());
        router.insert(&topic, sub);
        Ok(())
    }

    pub(crate) async fn remove(&self, id: &str, topic: &str) -> Result<()> {
        let key = (SubId::from(id), TopicFilter::from(topic));
        let mut router = self.router.write().await;
        if let Some((_, sub)) = self.subs.remove(&key) {
            router.remove(&sub.topic, &sub);
        }
        Ok(())
    }

    pub(crate) fn info(&self) -> serde_json::Value {
        let mut info = self.stats.to_json();
        if let Some(obj) = info.as_object_mut() {
            obj.insert("status".into(), self.status.get().as_str().into());
            obj.insert("sinks".into(), self.subs.len().into());
        }
        info
    }
}

/// Consumes a rule channel until it closes or the token fires.
struct DispatchWorker {
    uid: RuleId,
    broker: Arc<dyn Broker>,
    router: Arc<RwLock<TopicTree<SinkSub>>>,
    sink: DeliverRef,
    stats: Arc<RuleStats>,
    token: CancellationToken,
}

impl DispatchWorker {
    async fn run(self, mut rx: Rx) {
        log::debug!("rule ({}) dispatch worker started", self.uid);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                input = rx.next() => {
                    match input {
                        Some(input) => {
                            self.stats.queue.dec();
                            tokio::select! {
                                _ = self.token.cancelled() => break,
                                _ = self.dispatch(input) => {}
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        log::debug!("rule ({}) dispatch worker exited", self.uid);
    }

    async fn dispatch(&self, input: RuleInput) {
        match input {
            RuleInput::Flow(msg) => self.flow(msg).await,
            RuleInput::Sink(msg) => self.emit(msg).await,
        }
    }

    async fn flow(&self, msg: Message) {
        self.stats.flows.inc();
        match Topic::from_str(msg.topic.as_ref()) {
            Ok(topic) if !topic.has_wildcards() => {
                let matched = self.router.read().await.matches(&topic);
                for sub in matched {
                    self.stats.matches.inc();
                    let out = sub.remap(&msg);
                    if sub.rule == self.uid {
                        self.emit(out).await;
                    } else if let Err(e) = sub.sink(out) {
                        self.stats.fails.inc();
                        log::warn!("rule ({}) handoff to rule ({}) failed, {:?}", self.uid, sub.rule, e);
                    }
                }
            }
            // An unmatchable topic is consumed rather than left to wedge the
            // stream on redelivery.
            Ok(_) => {
                log::warn!("rule ({}) dropping message published to wildcard topic {:?}", self.uid, msg.topic)
            }
            Err(e) => {
                log::warn!("rule ({}) dropping message with invalid topic {:?}, {:?}", self.uid, msg.topic, e)
            }
        }
        // Matching alone consumes the source message, zero matches included.
        if let Some(offset) = msg.offset {
            self.broker.persist_offset(offset);
        }
    }

    async fn emit(&self, msg: Message) {
        match self.sink.deliver(msg).await {
            Ok(()) => self.stats.delivers.inc(),
            Err(e) => {
                self.stats.fails.inc();
                log::warn!("rule ({}) sink delivery failed, {:?}", self.uid, e);
            }
        }
    }
}
