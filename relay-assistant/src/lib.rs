//! Client for a hosted conversational assistant.
//!
//! The provider exposes threads (server-side conversation history), messages
//! posted to a thread, and runs (one asynchronous invocation of the assistant
//! against a thread). This crate wraps those primitives into the operations
//! the relay needs:
//!
//! - `create_thread`
//! - `post_message`
//! - `run_and_wait`: start a run, poll until it reaches a terminal status or a
//!   ceiling is hit, then fetch the reply
//! - `get_assistant_metadata`
//!
//! ```text
//! create_run ─▶ queued ─▶ in_progress ─▶ completed ─▶ list_messages ─▶ reply
//!                               │
//!                               └──────▶ failed | cancelled | expired
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod openai;
pub mod provider;
pub mod types;

pub use client::{select_reply, AssistantClient, PollPolicy};
pub use error::{AssistantError, AssistantResult};
pub use openai::OpenAiProvider;
pub use provider::AssistantProvider;
pub use types::{
    AssistantMetadata, MessageContent, NewAssistant, NewMessage, Role, Run, RunError, RunHandle,
    RunStatus, TextContent, ThreadMessage, ToolSpec, UploadedFile,
};
