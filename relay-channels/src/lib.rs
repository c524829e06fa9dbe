//! Relay Channels - Chat-platform side of assistant-relay.
//!
//! This crate turns chat messages into assistant turns:
//! - `SessionRouter`: resolve or create the channel's thread, post, run, reply
//! - `ResponseChunker`: split replies to fit platform message limits
//! - `RelayService`: per-channel workers that keep each channel in order
//! - `DiscordChannel`: Gateway listener and REST sender
//!
//! ## Architecture
//!
//! ```text
//! Discord ─▶ DiscordChannel::listen ─▶ RelayService ─▶ SessionRouter ─▶ ThreadStore
//!                                          │                 └────────▶ AssistantClient
//! Discord ◀── Channel::send_text ◀── ResponseChunker ◀── reply
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chunker;
pub mod discord;
pub mod message;
pub mod relay;
pub mod router;
pub mod traits;

pub use chunker::{split, split_on_boundaries, ResponseChunker, DISCORD_MAX_MESSAGE_LENGTH};
pub use discord::DiscordChannel;
pub use message::{ChannelType, InboundEvent};
pub use relay::RelayService;
pub use router::{RouterError, SessionRouter};
pub use traits::{Channel, ChannelError, ChannelResult};

use anyhow::{Context, Result};
use relay_common::config::{Config, StoreBackend};
use relay_store::{MemoryThreadStore, SqliteThreadStore, ThreadStore};
use std::sync::Arc;

/// Open the session store selected by configuration.
pub fn open_store(config: &Config) -> Result<Arc<dyn ThreadStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let path = config.store.db_path();
            let store = SqliteThreadStore::open(&path)
                .with_context(|| format!("Failed to open session store at {}", path.display()))?;
            tracing::info!(path = %store.path().display(), "Session store opened");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory session store; sessions are lost on restart");
            Ok(Arc::new(MemoryThreadStore::new()))
        }
    }
}
