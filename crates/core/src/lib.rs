//! Core utilities for the Kiln engine.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timer
//! - Engine configuration (TOML)

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AssetConfig, EngineConfig, LoggingConfig, RendererConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging};
pub use timer::Timer;
