//! Broker seam between the routing core and the hosting transport.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::RwLock;

use edgehub_conf::Settings;

use crate::types::{Message, Offset};
use crate::Result;

/// Hook into the hosting broker.
///
/// The routing core pulls its report cadence and retry strategy from here,
/// republishes routed messages through it and hands source offsets back to
/// it once fan-out completes.
#[async_trait]
pub trait Broker: Sync + Send {
    /// Cadence of rule stats reports.
    fn report_interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Strategy applied when an at least once republish has to be retried.
    fn retry_strategy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .with_multiplier(2.5)
            .build()
    }

    /// Republish a routed message.
    ///
    /// For at least once messages the future resolves only after the broker
    /// durably accepted the message.
    async fn republish(&self, msg: Message) -> Result<()>;

    /// Queue the durable offset of a fully routed source message.
    /// Must not block, the call order is the consume order.
    fn persist_offset(&self, offset: Offset);

    /// Offsets queued by `persist_offset` and not yet durable.
    fn offset_chan_len(&self) -> usize {
        0
    }

    /// Resolves once every queued offset is durable.
    async fn wait_offset_persisted(&self) {}
}

/// In process broker. Republishes into a buffer and records offsets
/// immediately, for examples and tests.
pub struct DefaultBroker {
    report_interval: Duration,
    strategy: ExponentialBackoff,
    entries: RwLock<Vec<Message>>,
    offset: AtomicU64,
    offsets_seen: AtomicUsize,
}

impl DefaultBroker {
    pub fn new() -> Self {
        Self {
            report_interval: Duration::from_secs(60),
            strategy: ExponentialBackoffBuilder::new()
                .with_max_elapsed_time(Some(Duration::from_secs(60)))
                .with_multiplier(2.5)
                .build(),
            entries: RwLock::new(Vec::new()),
            offset: AtomicU64::new(0),
            offsets_seen: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut broker = Self::new();
        broker.report_interval = settings.hub.metrics.report_interval;
        broker.strategy = settings.hub.get_backoff_strategy();
        broker
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: ExponentialBackoff) -> Self {
        self.strategy = strategy;
        self
    }

    /// Messages republished so far.
    pub async fn published(&self) -> Vec<Message> {
        self.entries.read().await.clone()
    }

    /// Highest offset handed back by the routing core.
    pub fn last_offset(&self) -> Option<Offset> {
        if self.offsets_seen.load(Ordering::SeqCst) == 0 {
            None
        } else {
            Some(self.offset.load(Ordering::SeqCst))
        }
    }
}

impl Default for DefaultBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for DefaultBroker {
    fn report_interval(&self) -> Duration {
        self.report_interval
    }

    fn retry_strategy(&self) -> ExponentialBackoff {
        self.strategy.clone()
    }

    async fn republish(&self, msg: Message) -> Result<()> {
        self.entries.write().await.push(msg);
        Ok(())
    }

    fn persist_offset(&self, offset: Offset) {
        self.offset.fetch_max(offset, Ordering::SeqCst);
        self.offsets_seen.fetch_add(1, Ordering::SeqCst);
    }
}
