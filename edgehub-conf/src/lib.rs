#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use edgehub_utils::deserialize_duration;

use self::logging::Log;

pub mod logging;

type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub hub: Hub,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/edgehub/edgehub").required(false))
            .add_source(File::with_name("/etc/edgehub").required(false))
            .add_source(File::with_name("edgehub").required(false))
            .add_source(config::Environment::with_prefix("edgehub").try_parsing(true).list_separator(" "));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;
        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    /// Build settings from a literal TOML document, skipping the file and
    /// environment sources.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let inner: Inner = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() {
        let cfg = Self::instance();
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("subscriptions is {}", cfg.hub.subscriptions.len());
        log::info!("metrics.report_interval is {:?}", cfg.hub.metrics.report_interval);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Config filename
    pub cfg_name: Option<String>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct Hub {
    //Static source/target subscriptions routed by the bridge rule.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,

    #[serde(default)]
    pub metrics: Metrics,

    //Retry window for at-least-once republishes.
    #[serde(
        default = "Hub::retry_max_elapsed_time_default",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_max_elapsed_time: Duration,
    #[serde(default = "Hub::retry_multiplier_default")]
    pub retry_multiplier: f64,
}

impl Hub {
    fn retry_max_elapsed_time_default() -> Duration {
        Duration::from_secs(60)
    }
    fn retry_multiplier_default() -> f64 {
        2.5
    }

    #[inline]
    pub fn get_backoff_strategy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.retry_max_elapsed_time))
            .with_multiplier(self.retry_multiplier)
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    //Interval between rule stats reports.
    #[serde(default = "Metrics::report_interval_default", deserialize_with = "deserialize_duration")]
    pub report_interval: Duration,
}

impl Default for Metrics {
    #[inline]
    fn default() -> Self {
        Self { report_interval: Self::report_interval_default() }
    }
}

impl Metrics {
    fn report_interval_default() -> Duration {
        Duration::from_secs(60)
    }
}

/// One static source-to-target routing binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub source: SinkTopic,
    pub target: SinkTopic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkTopic {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // An empty document, the host files and environment stay out of it.
        let settings = Settings::from_toml("").expect("Settings creation failed");
        assert_eq!(settings.hub.metrics.report_interval, Duration::from_secs(60));
        assert_eq!(settings.hub.retry_max_elapsed_time, Duration::from_secs(60));
        assert_eq!(settings.hub.retry_multiplier, 2.5);
        assert!(settings.hub.subscriptions.is_empty());
        assert!(settings.log.to.console());
    }

    #[test]
    fn test_subscriptions() {
        let toml = r#"
[hub]
retry_max_elapsed_time = "30s"

[hub.metrics]
report_interval = "10s"

[[hub.subscriptions]]
source = { topic = "sensor/+/temp", qos = 1 }
target = { topic = "bridge/temp", qos = 1 }

[[hub.subscriptions]]
source = { topic = "events/#" }
target = { topic = "mirror/events" }
"#;
        let inner: Inner = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("config parse failed");

        assert_eq!(inner.hub.metrics.report_interval, Duration::from_secs(10));
        assert_eq!(inner.hub.retry_max_elapsed_time, Duration::from_secs(30));
        assert_eq!(inner.hub.retry_multiplier, 2.5);
        assert_eq!(inner.hub.subscriptions.len(), 2);
        assert_eq!(inner.hub.subscriptions[0].source.topic, "sensor/+/temp");
        assert_eq!(inner.hub.subscriptions[0].source.qos, 1);
        assert_eq!(inner.hub.subscriptions[1].source.qos, 0);
        assert_eq!(inner.hub.subscriptions[1].target.topic, "mirror/events");
    }
}
