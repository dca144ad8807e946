//! Per-rule flow counters.
//!
//! A rule and its channel handles share one `RuleStats` set. Counters are
//! lock free, `queue` is a gauge of channel depth, the others only grow.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::utils::Counter;

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RuleStats {
    /// Ingress messages pulled from the channel for matching.
    pub flows: Counter,
    /// Sink subscriptions hit during fan-out.
    pub matches: Counter,
    /// Messages the sink accepted.
    pub delivers: Counter,
    /// Messages the sink gave up on.
    pub fails: Counter,
    /// Messages buffered in the rule channel.
    pub queue: Counter,
}

impl RuleStats {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "flows": self.flows.count(),
            "matches": self.matches.count(),
            "delivers": self.delivers.count(),
            "fails": self.fails.count(),
            "queue": self.queue.count(),
            "queue_max": self.queue.max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json() {
        let stats = RuleStats::default();
        stats.flows.incs(3);
        stats.matches.inc();
        stats.queue.inc();
        stats.queue.inc();
        stats.queue.dec();

        let info = stats.to_json();
        assert_eq!(info["flows"], 3);
        assert_eq!(info["matches"], 1);
        assert_eq!(info["delivers"], 0);
        assert_eq!(info["queue"], 1);
        assert_eq!(info["queue_max"], 2);
    }
}
