use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simple_logger::SimpleLogger;

use edgehub::broker::DefaultBroker;
use edgehub::conf::Settings;
use edgehub::manager::{ReportFn, RuleManager};
use edgehub::rule::Deliver;
use edgehub::types::{Message, QoS};
use edgehub::{RULE_MSG_Q0, RULE_TOPIC};

struct ConsoleDeliver {
    name: &'static str,
}

#[async_trait]
impl Deliver for ConsoleDeliver {
    async fn deliver(&self, msg: Message) -> edgehub::Result<()> {
        log::info!("[{}] {} <- {:?}", self.name, msg.topic, msg.payload);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new().with_level(log::LevelFilter::Info).init()?;

    let settings = Settings::from_toml(
        r#"
[hub.metrics]
report_interval = "1s"

[[hub.subscriptions]]
source = { topic = "sensor/+/temp", qos = 1 }
target = { topic = "bridge/temp", qos = 1 }
"#,
    )?;

    let broker = Arc::new(DefaultBroker::from_settings(&settings));
    let report: ReportFn = Arc::new(|stats| {
        log::info!("report: {}", stats);
        Ok(())
    });

    let manager = RuleManager::new(&settings.hub.subscriptions, broker.clone(), Some(report)).await?;
    manager.start().await;

    manager.add_rule_sess(
        "console-1",
        false,
        Arc::new(ConsoleDeliver { name: "console-1" }),
        Arc::new(ConsoleDeliver { name: "console-1/redeliver" }),
    )?;
    manager
        .add_sink_sub("console-1", "console-1", QoS::AtMostOnce, "sensor/#", QoS::AtMostOnce, "console/out")
        .await?;
    manager.start_rule("console-1").await?;

    let bridge = manager.channel(RULE_TOPIC)?;
    let fanout = manager.channel(RULE_MSG_Q0)?;
    for (i, temp) in ["18.5", "19.0", "19.5"].into_iter().enumerate() {
        bridge.flow(Message::new("sensor/42/temp", QoS::AtLeastOnce, temp).with_offset(i as u64 + 1))?;
        fanout.flow(Message::new("sensor/42/state", QoS::AtMostOnce, "ok"))?;
    }

    tokio::time::sleep(Duration::from_millis(1500)).await;
    manager.close().await;

    for msg in broker.published().await {
        log::info!("bridged: {} {:?}", msg.topic, msg.payload);
    }
    log::info!("last offset: {:?}", broker.last_offset());
    Ok(())
}
