//! queuelink – host/device queue orchestration over a pluggable transport.
//!
//! This crate exports
//!  * `core`      – queue attributes, routes, the broker wire codec and the
//!                  three environment-specific queue processors
//!  * `api`       – the public operation surface, routed through the installed
//!                  `QueueManager`
//!  * `transport` – the primitives consumed from below, plus an in-memory
//!                  simulation with an embedded broker
//!  * `config`    – TOML-driven settings with environment overrides
//!
//! Install a manager once per process, then call into `api`.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod api;
pub mod config;
pub mod core;
pub mod logging;
pub mod transport;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{ConfigError, Settings};
pub use crate::core::attr::QueueAttr;
pub use crate::core::buffer::{BufHandle, BufType, Permission};
pub use crate::core::error::{codes, QueueError, Result};
pub use crate::core::manager::QueueManager;
pub use crate::core::processor::{QueueProcessor, RunEnv};
pub use crate::core::route::{Route, RouteList, RouteQueryInfo, RouteQueryMode};
pub use crate::transport::{RtError, Transport};
