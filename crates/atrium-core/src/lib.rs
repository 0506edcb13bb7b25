//! # Atrium Core
//!
//! Core types, error handling, configuration, and the event bus for the
//! Atrium plugin host.
//!
//! This crate provides the foundational building blocks for the Atrium system:
//!
//! - **Types**: Core data structures including [`Version`] and the host
//!   core version constant.
//! - **Errors**: Error types using `thiserror` for configuration and event
//!   bus failure modes.
//! - **Configuration**: A host bootstrap configuration supporting YAML files,
//!   environment variable overrides, and validation.
//! - **Event bus**: The topic-based publish/subscribe channel every other
//!   subsystem communicates through.
//!
//! ## Example
//!
//! ```
//! use atrium_core::config::HostConfig;
//! use atrium_core::bus::EventBus;
//! use serde_json::json;
//!
//! let config = HostConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let bus = EventBus::new();
//! bus.subscribe("host:ready", |_event, _data| Ok(()));
//! bus.publish("host:ready", json!({}));
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use bus::{BusMetrics, EventBus, EventRecord, SubscriptionId};
pub use config::{HostConfig, SecurityLevel};
pub use error::{BusError, ConfigError, CoreError, Result};
pub use types::{Version, CORE_VERSION};
