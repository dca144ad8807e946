#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//!
//! use std::sync::Arc;
//!
//! use edgehub::broker::DefaultBroker;
//! use edgehub::manager::RuleManager;
//! use edgehub::types::{Message, QoS};
//! use edgehub::{Result, RULE_TOPIC};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = Arc::new(DefaultBroker::new());
//!     let manager = RuleManager::new(&[], broker, None).await?;
//!     manager.start().await;
//!
//!     manager
//!         .add_sink_sub(RULE_TOPIC, "bridge/temp", QoS::AtLeastOnce, "sensor/+/temp", QoS::AtLeastOnce, "bridge/temp")
//!         .await?;
//!     manager.channel(RULE_TOPIC)?.flow(Message::new("sensor/42/temp", QoS::AtLeastOnce, "21.5"))?;
//!
//!     manager.close().await;
//!     Ok(())
//! }
//!
//! ```

/// Core Routing Components
pub mod broker; // Broker integration seam
pub mod manager; // Rule registry and lifecycle
pub mod rule; // Rule variants and dispatch workers

/// Topic Handling
pub mod subscription; // Source to target bindings
pub mod topic; // Topic parsing and validation
pub mod trie; // Shared pattern tree

/// Supporting Types
pub mod stats; // Per-rule counters
pub mod types; // Common data types

mod error;

pub use error::HubError;
pub use types::{RULE_MSG_Q0, RULE_TOPIC};

pub type Error = HubError;
pub type Result<T> = anyhow::Result<T, Error>;

/// External Crate Re-exports
pub use edgehub_conf as conf; // Configuration layer
pub use edgehub_utils as utils; // Common utilities
