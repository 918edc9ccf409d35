//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, S2SConfig, LogConfig)
//! - [`links`]: Server-to-server link configuration (LinkBlock, LinkDirection)
//! - [`defaults`]: serde default functions
//! - [`validation`]: startup validation collecting every error

mod defaults;
mod links;
mod types;
pub mod validation;

pub use links::{LinkBlock, LinkDirection};
pub use types::{Config, ConfigError, LogConfig, LogFormat, S2SConfig, ServerConfig};
