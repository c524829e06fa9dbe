//! Relay Common - Shared configuration and logging for assistant-relay.
//!
//! This crate provides:
//! - Configuration types and loading (JSON file + environment overrides)
//! - Configuration validation
//! - Logging setup and trace ID helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    AssistantConfig, ChunkingConfig, Config, DiscordConfig, ObservabilityConfig, PollConfig,
    StoreBackend, StoreConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

